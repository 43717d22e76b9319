//! Interface definitions and the document resolver that builds them.
//!
//! A document is a mapping with a `service` block and optional `types`,
//! `functions` and `messages` lists plus a `schemas` mapping of reusable
//! fragments:
//!
//! ```json
//! {
//!   "service": {"name": "unicorn-shop", "version": "1.0.0", "description": "..."},
//!   "types": [{"name": "colour", "description": "...", "schema": {"enum": ["red"]}}],
//!   "schemas": {"UnicornColour": {"$ref": "#/types/colour"}},
//!   "functions": [{
//!     "name": "buy", "description": "...",
//!     "arguments": [{"name": "colour", "description": "...", "schema": {"$ref": "#/types/colour"}}],
//!     "returns": {"description": "...", "schema": {"type": "integer"}}
//!   }],
//!   "messages": [{"name": "sold", "description": "...", "schema": {"$ref": "#/schemas/UnicornColour"}}]
//! }
//! ```
//!
//! Resolution is all-or-nothing: any violation fails the whole document.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use semver::Version;
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::ResolverOptions;
use crate::document::{DocumentCache, DocumentLoader, FsLoader};
use crate::error::SkyhookError;
use crate::naming::{check_kebab_case, IdentifierRules, Role};
use crate::reference::{has_finite_value, local_type_refs, ResolutionContext};
use crate::schema::{Schema, TypeRef};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Service {
    pub name: String,
    pub version: Version,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedType {
    pub name: String,
    pub description: String,
    pub schema: Arc<Schema>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Argument {
    pub name: String,
    pub description: String,
    pub schema: Arc<Schema>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Returns {
    pub description: String,
    pub schema: Arc<Schema>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Function {
    pub name: String,
    pub description: String,
    /// Arguments in declaration order; addressed by name at the boundary.
    pub arguments: Vec<Argument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returns: Option<Returns>,
}

impl Function {
    pub fn argument(&self, name: &str) -> Option<&Argument> {
        self.arguments.iter().find(|argument| argument.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub name: String,
    pub description: String,
    pub schema: Arc<Schema>,
}

/// Named types of one document plus the registries of every document its
/// references reach.
#[derive(Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TypeRegistry {
    types: Vec<NamedType>,
    #[serde(skip)]
    externals: BTreeMap<String, Arc<TypeRegistry>>,
}

impl TypeRegistry {
    pub fn types(&self) -> &[NamedType] {
        &self.types
    }

    pub fn local(&self, name: &str) -> Option<&NamedType> {
        self.types.iter().find(|named| named.name == name)
    }

    /// Looks up the named type `type_ref` points at.
    pub fn get(&self, type_ref: &TypeRef) -> Option<&NamedType> {
        self.lookup(type_ref).map(|(named, _)| named)
    }

    /// Like [`TypeRegistry::get`], also returning the registry the type is
    /// local to, against which its own references must be looked up.
    pub(crate) fn lookup(&self, type_ref: &TypeRef) -> Option<(&NamedType, &TypeRegistry)> {
        match &type_ref.document {
            None => self.local(&type_ref.name).map(|named| (named, self)),
            Some(document) => {
                let registry = self.externals.get(document)?;
                registry
                    .local(&type_ref.name)
                    .map(|named| (named, registry.as_ref()))
            }
        }
    }

    /// Keys of the external documents this registry can reach.
    pub fn external_documents(&self) -> impl Iterator<Item = &str> {
        self.externals.keys().map(String::as_str)
    }
}

/// Target identifier derived for one declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identifier {
    pub role: Role,
    pub name: String,
    pub identifier: String,
}

/// The fully resolved, immutable model of a service.
#[derive(Debug, PartialEq, Serialize)]
pub struct Interface {
    #[serde(skip)]
    document: Option<String>,
    service: Service,
    functions: Vec<Function>,
    messages: Vec<Message>,
    types: Arc<TypeRegistry>,
    schemas: BTreeMap<String, Arc<Schema>>,
}

impl Interface {
    /// Key of the document this interface was loaded from, if any.
    pub fn document(&self) -> Option<&str> {
        self.document.as_deref()
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn types(&self) -> &[NamedType] {
        self.types.types()
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|function| function.name == name)
    }

    pub fn message(&self, name: &str) -> Option<&Message> {
        self.messages.iter().find(|message| message.name == name)
    }

    pub fn named_type(&self, name: &str) -> Option<&NamedType> {
        self.types.local(name)
    }

    /// Resolved reusable fragment `key`.
    pub fn schema(&self, key: &str) -> Option<&Arc<Schema>> {
        self.schemas.get(key)
    }

    pub fn schemas(&self) -> &BTreeMap<String, Arc<Schema>> {
        &self.schemas
    }

    /// SHA-256 of the canonical JSON form, including the named types of
    /// every external document the interface reaches. Equal for structurally
    /// identical interfaces, so both parties can compare contracts cheaply.
    pub fn fingerprint(&self) -> Result<String, SkyhookError> {
        let canonical = Canonical {
            interface: self,
            externals: self
                .types
                .externals
                .iter()
                .map(|(key, registry)| (key.as_str(), registry.types()))
                .collect(),
        };
        let bytes =
            serde_json::to_vec(&canonical).map_err(|e| SkyhookError::Serialization(e.to_string()))?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Target identifiers for every declaration, in declaration order.
    pub fn identifiers(&self, rules: &IdentifierRules) -> Result<Vec<Identifier>, SkyhookError> {
        let mut out = Vec::new();
        let mut push = |role: Role, name: &str| -> Result<(), SkyhookError> {
            out.push(Identifier {
                role,
                name: name.to_string(),
                identifier: rules.derive(name, role)?,
            });
            Ok(())
        };
        push(Role::Service, &self.service.name)?;
        for named in self.types() {
            push(Role::Type, &named.name)?;
        }
        for function in &self.functions {
            push(Role::Function, &function.name)?;
            for argument in &function.arguments {
                push(Role::Field, &argument.name)?;
            }
        }
        for message in &self.messages {
            push(Role::Message, &message.name)?;
        }
        Ok(out)
    }
}

#[derive(Serialize)]
struct Canonical<'a> {
    #[serde(flatten)]
    interface: &'a Interface,
    externals: BTreeMap<&'a str, &'a [NamedType]>,
}

/// Resolves a standalone document with default options and no loader.
pub fn resolve_document(raw: &JsonValue) -> Result<Interface, SkyhookError> {
    Resolver::default().resolve(raw)
}

/// Entry point for resolving documents, optionally with cross-document
/// references served by a shared [`DocumentCache`].
#[derive(Clone, Default)]
pub struct Resolver {
    options: ResolverOptions,
    cache: Option<Arc<DocumentCache>>,
}

impl Resolver {
    /// Reads cross-document references from `options.base_dir` when set.
    pub fn new(options: ResolverOptions) -> Self {
        let cache = options.base_dir.as_ref().map(|base_dir| {
            Arc::new(DocumentCache::new(FsLoader::new(base_dir), options.clone()))
        });
        Self { options, cache }
    }

    /// Serves cross-document references from `loader` through a new cache.
    pub fn with_loader(mut self, loader: impl DocumentLoader + 'static) -> Self {
        self.cache = Some(Arc::new(DocumentCache::new(loader, self.options.clone())));
        self
    }

    /// Shares an existing cache between resolvers.
    pub fn with_cache(mut self, cache: Arc<DocumentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    pub fn resolve(&self, raw: &JsonValue) -> Result<Interface, SkyhookError> {
        resolve_in(raw, None, self.cache.as_deref(), &self.options)
    }

    /// Loads and resolves the document stored under `key`.
    pub fn load(&self, key: &str) -> Result<Arc<Interface>, SkyhookError> {
        let cache = self.cache.as_ref().ok_or_else(|| {
            SkyhookError::Config(format!("cannot load '{key}': no document loader configured"))
        })?;
        cache.interface(key)
    }
}

struct Header<'a> {
    name: &'a str,
    description: &'a str,
    raw: &'a JsonMap<String, JsonValue>,
}

pub(crate) fn resolve_in(
    raw: &JsonValue,
    document: Option<&str>,
    cache: Option<&DocumentCache>,
    options: &ResolverOptions,
) -> Result<Interface, SkyhookError> {
    let loc = |fragment: &str| format!("{}#{fragment}", document.unwrap_or(""));

    let root = raw
        .as_object()
        .ok_or_else(|| document_error(loc(""), "document must be a mapping"))?;
    let service = parse_service(root.get("service"), &loc)?;

    let types = headers(root, "types", Role::Type, &loc)?;
    let functions = headers(root, "functions", Role::Function, &loc)?;
    let messages = headers(root, "messages", Role::Message, &loc)?;
    let empty = JsonMap::new();
    let raw_schemas = match root.get("schemas") {
        None => &empty,
        Some(JsonValue::Object(map)) => map,
        Some(_) => return Err(document_error(loc("/schemas"), "'schemas' must be a mapping")),
    };

    let mut arguments = Vec::with_capacity(functions.len());
    for function in &functions {
        arguments.push(argument_headers(function, &loc)?);
    }
    check_identifiers(&types, &functions, &arguments, &messages, &options.rules)?;

    let type_names: BTreeSet<String> = types.iter().map(|t| t.name.to_string()).collect();
    let mut ctx = ResolutionContext::new(document, &type_names, raw_schemas, cache);

    let mut named_types = Vec::with_capacity(types.len());
    for header in &types {
        let fragment = format!("/types/{}/schema", header.name);
        let raw_schema = required(header.raw, "schema", &loc(&fragment))?;
        named_types.push(NamedType {
            name: header.name.to_string(),
            description: header.description.to_string(),
            schema: ctx.resolve(raw_schema, &fragment)?,
        });
    }

    let mut resolved_functions = Vec::with_capacity(functions.len());
    for (header, declared) in functions.iter().zip(&arguments) {
        let mut resolved_arguments = Vec::with_capacity(declared.len());
        for argument in declared {
            let fragment = format!("/functions/{}/arguments/{}/schema", header.name, argument.name);
            let raw_schema = required(argument.raw, "schema", &loc(&fragment))?;
            resolved_arguments.push(Argument {
                name: argument.name.to_string(),
                description: argument.description.to_string(),
                schema: ctx.resolve(raw_schema, &fragment)?,
            });
        }
        let returns = match header.raw.get("returns") {
            None => None,
            Some(raw_returns) => {
                let fragment = format!("/functions/{}/returns", header.name);
                let raw_returns = raw_returns.as_object().ok_or_else(|| {
                    document_error(loc(&fragment), "'returns' must be a mapping")
                })?;
                let description = description(raw_returns, &loc(&fragment))?;
                let schema_fragment = format!("{fragment}/schema");
                let raw_schema = required(raw_returns, "schema", &loc(&schema_fragment))?;
                Some(Returns {
                    description: description.to_string(),
                    schema: ctx.resolve(raw_schema, &schema_fragment)?,
                })
            }
        };
        resolved_functions.push(Function {
            name: header.name.to_string(),
            description: header.description.to_string(),
            arguments: resolved_arguments,
            returns,
        });
    }

    let mut resolved_messages = Vec::with_capacity(messages.len());
    for header in &messages {
        let fragment = format!("/messages/{}/schema", header.name);
        let raw_schema = required(header.raw, "schema", &loc(&fragment))?;
        resolved_messages.push(Message {
            name: header.name.to_string(),
            description: header.description.to_string(),
            schema: ctx.resolve(raw_schema, &fragment)?,
        });
    }

    // Unused fragments are resolved too, so their errors are never hidden.
    for key in raw_schemas.keys() {
        ctx.fragment(key, &loc(&format!("/schemas/{key}")))?;
    }

    check_inhabited(&named_types, &loc)?;

    let (schemas, external_interfaces) = ctx.into_parts();
    let mut externals = BTreeMap::new();
    for (key, interface) in external_interfaces {
        for (transitive, registry) in &interface.types.externals {
            externals
                .entry(transitive.clone())
                .or_insert_with(|| Arc::clone(registry));
        }
        externals.insert(key, Arc::clone(&interface.types));
    }

    debug!(
        service = %service.name,
        version = %service.version,
        functions = resolved_functions.len(),
        messages = resolved_messages.len(),
        types = named_types.len(),
        "resolved interface"
    );

    Ok(Interface {
        document: document.map(str::to_string),
        service,
        functions: resolved_functions,
        messages: resolved_messages,
        types: Arc::new(TypeRegistry {
            types: named_types,
            externals,
        }),
        schemas,
    })
}

fn parse_service(
    raw: Option<&JsonValue>,
    loc: &dyn Fn(&str) -> String,
) -> Result<Service, SkyhookError> {
    let map = raw
        .and_then(JsonValue::as_object)
        .ok_or_else(|| document_error(loc("/service"), "'service' must be a mapping"))?;
    let name = string_field(map, "name", &loc("/service"))?;
    check_kebab_case(name, Role::Service)?;
    let raw_version = string_field(map, "version", &loc("/service"))?;
    let version = Version::parse(raw_version).map_err(|e| {
        document_error(
            loc("/service/version"),
            format!("'{raw_version}' is not a semantic version: {e}"),
        )
    })?;
    let description = description(map, &loc("/service"))?;
    Ok(Service {
        name: name.to_string(),
        version,
        description: description.to_string(),
    })
}

fn headers<'a>(
    root: &'a JsonMap<String, JsonValue>,
    section: &str,
    role: Role,
    loc: &dyn Fn(&str) -> String,
) -> Result<Vec<Header<'a>>, SkyhookError> {
    let items = match root.get(section) {
        None => return Ok(Vec::new()),
        Some(JsonValue::Array(items)) => items,
        Some(_) => {
            return Err(document_error(
                loc(&format!("/{section}")),
                format!("'{section}' must be a list"),
            ))
        }
    };

    let mut out: Vec<Header<'a>> = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let header = header(item, role, &loc(&format!("/{section}/{index}")))?;
        if out.iter().any(|existing| existing.name == header.name) {
            return Err(SkyhookError::IdentifierCollision(format!(
                "{role} '{}' declared more than once at {}",
                header.name,
                loc(&format!("/{section}/{index}"))
            )));
        }
        out.push(header);
    }
    Ok(out)
}

fn argument_headers<'a>(
    function: &Header<'a>,
    loc: &dyn Fn(&str) -> String,
) -> Result<Vec<Header<'a>>, SkyhookError> {
    let fragment = format!("/functions/{}/arguments", function.name);
    let items = match function.raw.get("arguments") {
        None => return Ok(Vec::new()),
        Some(JsonValue::Array(items)) => items,
        Some(_) => return Err(document_error(loc(&fragment), "'arguments' must be a list")),
    };

    let mut out: Vec<Header<'a>> = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let header = header(item, Role::Field, &loc(&format!("{fragment}/{index}")))?;
        if out.iter().any(|existing| existing.name == header.name) {
            return Err(SkyhookError::IdentifierCollision(format!(
                "argument '{}' declared more than once for function '{}'",
                header.name, function.name
            )));
        }
        out.push(header);
    }
    Ok(out)
}

fn header<'a>(item: &'a JsonValue, role: Role, location: &str) -> Result<Header<'a>, SkyhookError> {
    let raw = item
        .as_object()
        .ok_or_else(|| document_error(location, format!("{role} declaration must be a mapping")))?;
    let name = string_field(raw, "name", location)?;
    check_kebab_case(name, role)?;
    let description = description(raw, location)?;
    Ok(Header {
        name,
        description,
        raw,
    })
}

// Distinct kebab-case names can still derive the same target identifier
// (`a-1b` and `a1b` are both `A1b` as types), and functions and messages
// share one callable namespace.
fn check_identifiers(
    types: &[Header<'_>],
    functions: &[Header<'_>],
    arguments: &[Vec<Header<'_>>],
    messages: &[Header<'_>],
    rules: &IdentifierRules,
) -> Result<(), SkyhookError> {
    let mut seen: BTreeMap<String, String> = BTreeMap::new();
    let declarations = types
        .iter()
        .map(|h| (Role::Type, h.name))
        .chain(functions.iter().map(|h| (Role::Function, h.name)))
        .chain(messages.iter().map(|h| (Role::Message, h.name)));
    for (role, name) in declarations {
        let identifier = rules.derive(name, role)?;
        let label = format!("{role} '{name}'");
        if let Some(previous) = seen.insert(identifier.clone(), label.clone()) {
            return Err(SkyhookError::IdentifierCollision(format!(
                "{previous} and {label} both derive identifier '{identifier}'"
            )));
        }
    }

    for (function, declared) in functions.iter().zip(arguments) {
        let mut seen_arguments: BTreeMap<String, &str> = BTreeMap::new();
        for argument in declared {
            let identifier = rules.derive(argument.name, Role::Field)?;
            if let Some(previous) = seen_arguments.insert(identifier.clone(), argument.name) {
                return Err(SkyhookError::IdentifierCollision(format!(
                    "arguments '{previous}' and '{}' of function '{}' both derive identifier '{identifier}'",
                    argument.name, function.name
                )));
            }
        }
    }
    Ok(())
}

// Recursion is fine while some branch bottoms out (`tree = null | [tree]`).
// A type whose every branch needs itself again has no finite value and is
// rejected.
fn check_inhabited(
    named_types: &[NamedType],
    loc: &dyn Fn(&str) -> String,
) -> Result<(), SkyhookError> {
    let mut finite: BTreeSet<&str> = BTreeSet::new();
    loop {
        let known = finite.len();
        for named in named_types {
            if !finite.contains(named.name.as_str()) && has_finite_value(&named.schema, &finite) {
                finite.insert(named.name.as_str());
            }
        }
        if finite.len() == known {
            break;
        }
    }

    let Some(first) = named_types
        .iter()
        .find(|named| !finite.contains(named.name.as_str()))
    else {
        return Ok(());
    };

    // Each type without a finite value refers to another one, so following
    // those references from `first` comes back around.
    let mut path: Vec<&str> = vec![first.name.as_str()];
    loop {
        let current = path[path.len() - 1];
        let mut refs = Vec::new();
        if let Some(named) = named_types.iter().find(|named| named.name == current) {
            local_type_refs(&named.schema, &mut refs);
        }
        let Some(next) = refs.into_iter().find(|name| !finite.contains(name)) else {
            return Err(document_error(
                loc(&format!("/types/{current}/schema")),
                format!("type '{current}' admits no value"),
            ));
        };
        if let Some(start) = path.iter().position(|name| *name == next) {
            let mut cycle: Vec<String> = path[start..]
                .iter()
                .map(|name| format!("#/types/{name}"))
                .collect();
            cycle.push(format!("#/types/{next}"));
            return Err(SkyhookError::CyclicReference {
                location: loc(&format!("/types/{}/schema", path[start])),
                cycle: format!("{} (no finite value)", cycle.join(" -> ")),
            });
        }
        path.push(next);
    }
}

fn required<'a>(
    map: &'a JsonMap<String, JsonValue>,
    key: &str,
    location: &str,
) -> Result<&'a JsonValue, SkyhookError> {
    map.get(key)
        .ok_or_else(|| document_error(location, format!("missing '{key}'")))
}

fn string_field<'a>(
    map: &'a JsonMap<String, JsonValue>,
    key: &str,
    location: &str,
) -> Result<&'a str, SkyhookError> {
    map.get(key)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| document_error(location, format!("'{key}' must be a string")))
}

fn description<'a>(
    map: &'a JsonMap<String, JsonValue>,
    location: &str,
) -> Result<&'a str, SkyhookError> {
    let text = string_field(map, "description", location)?;
    if text.trim().is_empty() {
        return Err(document_error(location, "'description' must not be empty"));
    }
    Ok(text)
}

fn document_error(location: impl Into<String>, message: impl Into<String>) -> SkyhookError {
    SkyhookError::Document {
        location: location.into(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn service() -> JsonValue {
        json!({"name": "test", "version": "0.0.0", "description": "..."})
    }

    #[test]
    fn missing_sections_resolve_to_empty_interface() {
        let interface = resolve_document(&json!({"service": service()})).unwrap();
        assert_eq!(interface.service().name, "test");
        assert_eq!(interface.service().version, Version::new(0, 0, 0));
        assert!(interface.functions().is_empty());
        assert!(interface.messages().is_empty());
        assert!(interface.types().is_empty());
    }

    #[test]
    fn rejects_bad_service_block() {
        let err = resolve_document(&json!({
            "service": {"name": "Test", "version": "0.0.0", "description": "..."}
        }))
        .unwrap_err();
        assert!(matches!(err, SkyhookError::Naming(_)));

        let err = resolve_document(&json!({
            "service": {"name": "test", "version": "1.0", "description": "..."}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("not a semantic version"));

        let err = resolve_document(&json!({
            "service": {"name": "test", "version": "1.0.0", "description": "  "}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn rejects_duplicate_arguments() {
        let err = resolve_document(&json!({
            "service": service(),
            "functions": [{
                "name": "add",
                "description": "Add.",
                "arguments": [
                    {"name": "a", "description": "A.", "schema": {"type": "integer"}},
                    {"name": "a", "description": "A again.", "schema": {"type": "integer"}}
                ]
            }]
        }))
        .unwrap_err();
        assert!(matches!(err, SkyhookError::IdentifierCollision(_)));
    }

    #[test]
    fn rejects_target_identifier_collisions() {
        let err = resolve_document(&json!({
            "service": service(),
            "types": [
                {"name": "a-1b", "description": "One.", "schema": {"type": "string"}},
                {"name": "a1b", "description": "Two.", "schema": {"type": "string"}}
            ]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("both derive identifier 'A1b'"), "{err}");

        let err = resolve_document(&json!({
            "service": service(),
            "functions": [{"name": "ping", "description": "Ping."}],
            "messages": [{"name": "ping", "description": "Ping.", "schema": {"type": "null"}}]
        }))
        .unwrap_err();
        assert!(matches!(err, SkyhookError::IdentifierCollision(_)));
    }

    #[test]
    fn reserved_words_are_not_collisions_once_suffixed() {
        let options = ResolverOptions::default()
            .with_rules(IdentifierRules::new().with_reserved(Role::Function, ["class"]));
        let interface = Resolver::new(options.clone())
            .resolve(&json!({
                "service": service(),
                "functions": [{"name": "class", "description": "A class."}]
            }))
            .unwrap();
        let identifiers = interface.identifiers(&options.rules).unwrap();
        assert!(identifiers
            .iter()
            .any(|i| i.role == Role::Function && i.identifier == "class_"));
    }

    #[test]
    fn recursive_named_types_are_allowed_through_structure() {
        let interface = resolve_document(&json!({
            "service": service(),
            "types": [{
                "name": "tree",
                "description": "A tree.",
                "schema": {
                    "type": "object",
                    "properties": {
                        "children": {"type": "array", "items": {"$ref": "#/types/tree"}}
                    },
                    "required": ["children"]
                }
            }]
        }))
        .unwrap();
        assert!(interface.named_type("tree").is_some());
    }

    #[test]
    fn recursion_through_a_nullable_union_is_allowed() {
        let interface = resolve_document(&json!({
            "service": service(),
            "types": [
                {"name": "chain", "description": "C.", "schema": {"anyOf": [{"type": "null"}, {"$ref": "#/types/link"}]}},
                {"name": "link", "description": "L.", "schema": {"$ref": "#/types/chain"}},
                {"name": "maybe", "description": "M.", "schema": {"anyOf": [{"type": "null"}, {"$ref": "#/types/maybe"}]}}
            ]
        }))
        .unwrap();
        assert!(interface.named_type("chain").is_some());
        assert!(interface.named_type("maybe").is_some());
    }

    #[test]
    fn recursive_named_types_without_finite_value_are_rejected() {
        let err = resolve_document(&json!({
            "service": service(),
            "types": [
                {"name": "a", "description": "A.", "schema": {"anyOf": [
                    {"$ref": "#/types/b"},
                    {"type": "array", "items": {"$ref": "#/types/a"}, "minItems": 1}
                ]}},
                {"name": "b", "description": "B.", "schema": {"$ref": "#/types/a"}}
            ]
        }))
        .unwrap_err();
        match err {
            SkyhookError::CyclicReference { location, cycle } => {
                assert_eq!(location, "#/types/a/schema");
                assert_eq!(cycle, "#/types/a -> #/types/b -> #/types/a (no finite value)");
            }
            other => panic!("expected cycle, got {other}"),
        }

        let err = resolve_document(&json!({
            "service": service(),
            "types": [{"name": "node", "description": "N.", "schema": {
                "type": "object",
                "properties": {"next": {"$ref": "#/types/node"}},
                "required": ["next"]
            }}]
        }))
        .unwrap_err();
        assert!(matches!(err, SkyhookError::CyclicReference { .. }), "{err}");
    }

    #[test]
    fn errors_point_at_the_offending_declaration() {
        let err = resolve_document(&json!({
            "service": service(),
            "functions": [{
                "name": "add",
                "description": "Add.",
                "arguments": [{"name": "a", "description": "A.", "schema": {"$ref": "#/types/nope"}}]
            }]
        }))
        .unwrap_err();
        assert!(
            err.to_string().contains("#/functions/add/arguments/a/schema/$ref"),
            "{err}"
        );
    }

    #[test]
    fn unused_fragments_are_still_checked() {
        let err = resolve_document(&json!({
            "service": service(),
            "schemas": {"Broken": {"type": "widget"}}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("#/schemas/Broken"), "{err}");
    }

    #[test]
    fn fingerprint_is_stable_across_resolutions() {
        let raw = json!({
            "service": service(),
            "types": [{"name": "colour", "description": "C.", "schema": {"enum": ["red", "blue"]}}]
        });
        let first = resolve_document(&raw).unwrap();
        let second = resolve_document(&raw).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.fingerprint().unwrap(), second.fingerprint().unwrap());
        assert_eq!(first.fingerprint().unwrap().len(), 64);
    }
}
