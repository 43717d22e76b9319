//! Runtime configuration: resolver options, reserved words and bindings.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::binder::Bindings;
use crate::error::SkyhookError;
use crate::interface::Interface;
use crate::naming::{IdentifierRules, Role};

/// Knobs shared by every document resolved through one resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverOptions {
    /// Reserved words used for target identifier collision checks.
    pub rules: IdentifierRules,
    /// Directory cross-document references are read from.
    pub base_dir: Option<PathBuf>,
}

impl ResolverOptions {
    pub fn with_rules(mut self, rules: IdentifierRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }
}

/// Per-role reserved word lists, as supplied by a code emitter.
///
/// ```json
/// {"function": ["class", "def"], "type": ["True", "None"]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReservedWords {
    #[serde(default)]
    pub service: Vec<String>,
    #[serde(default)]
    pub function: Vec<String>,
    #[serde(default)]
    pub message: Vec<String>,
    #[serde(default, rename = "type")]
    pub type_: Vec<String>,
    #[serde(default)]
    pub field: Vec<String>,
}

impl ReservedWords {
    pub fn from_json_str(input: &str) -> Result<Self, SkyhookError> {
        serde_json::from_str(input)
            .map_err(|e| SkyhookError::Config(format!("invalid reserved words: {e}")))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SkyhookError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn into_rules(self) -> IdentifierRules {
        IdentifierRules::new()
            .with_reserved(Role::Service, self.service)
            .with_reserved(Role::Function, self.function)
            .with_reserved(Role::Message, self.message)
            .with_reserved(Role::Type, self.type_)
            .with_reserved(Role::Field, self.field)
    }
}

/// Endpoint assignments read from a deployment file.
///
/// ```json
/// {"functions": {"add": "arn:...:add"}, "messages": {"sold": "arn:...:sold"}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingConfig {
    #[serde(default)]
    pub functions: BTreeMap<String, String>,
    #[serde(default)]
    pub messages: BTreeMap<String, String>,
}

impl BindingConfig {
    pub fn from_json_str(input: &str) -> Result<Self, SkyhookError> {
        serde_json::from_str(input)
            .map_err(|e| SkyhookError::Config(format!("invalid binding config: {e}")))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SkyhookError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// Converts into [`Bindings`], rejecting names `interface` does not declare.
    pub fn into_bindings(self, interface: &Interface) -> Result<Bindings, SkyhookError> {
        let mut bindings = Bindings::new();
        for (name, endpoint) in self.functions {
            if interface.function(&name).is_none() {
                return Err(SkyhookError::UnknownFunction(name));
            }
            check_endpoint(&name, &endpoint)?;
            bindings = bindings.with_function(name, endpoint);
        }
        for (name, endpoint) in self.messages {
            if interface.message(&name).is_none() {
                return Err(SkyhookError::UnknownMessage(name));
            }
            check_endpoint(&name, &endpoint)?;
            bindings = bindings.with_message(name, endpoint);
        }
        Ok(bindings)
    }
}

fn check_endpoint(name: &str, endpoint: &str) -> Result<(), SkyhookError> {
    if endpoint.trim().is_empty() {
        return Err(SkyhookError::Config(format!(
            "endpoint for '{name}' must not be empty"
        )));
    }
    Ok(())
}
