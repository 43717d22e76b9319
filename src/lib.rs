//! Declarative remote interfaces with structural validation on both sides of
//! the boundary.
//!
//! A JSON interface document is resolved into an immutable [`Interface`];
//! a [`Contract`] compiles its validators once and is shared by the caller's
//! [`Client`] and the implementer's [`EntryPoint`]s so both enforce the same
//! checks.

pub mod binder;
pub mod config;
pub mod document;
pub mod entry;
pub mod error;
pub mod interface;
pub mod naming;
pub mod payload;
pub mod reference;
pub mod schema;
pub mod validate;

use std::path::Path;
use std::sync::Arc;

pub use binder::{BindingGuard, Bindings, Client, Invoker, Publisher};
pub use config::{BindingConfig, ReservedWords, ResolverOptions};
pub use document::{DocumentCache, DocumentLoader, FsLoader, MapLoader};
pub use entry::{Dispatcher, EntryPoint, MessageEntryPoint};
pub use error::{PathSegment, SkyhookError, TransportErrorKind, Violation};
pub use interface::{resolve_document, Interface, Resolver};
pub use naming::{derive_identifier, IdentifierRules, Role};
pub use schema::Schema;
pub use validate::{compile, Contract, Validator};

/// Parses JSON text and resolves it as a standalone interface document.
pub fn parse_interface(input: &str) -> Result<Interface, SkyhookError> {
    let raw = serde_json::from_str(input).map_err(|e| SkyhookError::Document {
        location: "#".to_string(),
        message: format!("invalid JSON: {e}"),
    })?;
    resolve_document(&raw)
}

/// Loads `path` and resolves it, serving cross-document references from the
/// file's directory.
pub fn load_interface(path: impl AsRef<Path>) -> Result<Arc<Interface>, SkyhookError> {
    let path = path.as_ref();
    let base_dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let key = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| SkyhookError::Config(format!("invalid document path '{}'", path.display())))?;
    Resolver::new(ResolverOptions::default().with_base_dir(base_dir)).load(key)
}

/// Resolves `input` and compiles its contract in one step.
pub fn contract_from_str(input: &str) -> Result<Arc<Contract>, SkyhookError> {
    Ok(Arc::new(Contract::new(Arc::new(parse_interface(input)?))))
}
