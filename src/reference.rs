//! `$ref` parsing, reference resolution and cycle detection.
//!
//! Named-type references (`#/types/<name>`) stay as [`Schema::Reference`]
//! links so recursive types are expressible. Reusable fragments
//! (`#/schemas/<key>`) are inlined, resolved once and shared, and therefore
//! must not reach themselves.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::document::DocumentCache;
use crate::error::SkyhookError;
use crate::interface::Interface;
use crate::schema::{parse_schema, ArraySchema, Field, ObjectSchema, RefResolver, Schema, TypeRef};

/// What a reference points at inside its document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Type(String),
    Schema(String),
}

/// Parsed form of a `$ref` string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Document key for cross-document references.
    pub document: Option<String>,
    pub target: Target,
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(document) = &self.document {
            f.write_str(document)?;
        }
        match &self.target {
            Target::Type(name) => write!(f, "#/types/{name}"),
            Target::Schema(key) => write!(f, "#/schemas/{key}"),
        }
    }
}

/// Parses `#/types/<name>`, `#/schemas/<key>` or `<document>#<fragment>`.
pub fn parse_reference(raw: &str) -> Result<Reference, String> {
    let (document, fragment) = raw
        .split_once('#')
        .ok_or_else(|| format!("reference '{raw}' has no '#' fragment"))?;
    let document = match document.trim() {
        "" => None,
        path => Some(path.to_string()),
    };
    let target = if let Some(name) = fragment.strip_prefix("/types/") {
        Target::Type(name.to_string())
    } else if let Some(key) = fragment.strip_prefix("/schemas/") {
        Target::Schema(key.to_string())
    } else {
        return Err(format!(
            "reference '{raw}' must point at '/types/<name>' or '/schemas/<key>'"
        ));
    };
    let name = match &target {
        Target::Type(name) | Target::Schema(name) => name,
    };
    if name.is_empty() || name.contains('/') {
        return Err(format!("reference '{raw}' has an invalid target name"));
    }
    Ok(Reference { document, target })
}

/// Collects the document keys of every cross-document `$ref` in `raw`.
pub fn collect_document_refs(raw: &JsonValue, out: &mut BTreeSet<String>) {
    match raw {
        JsonValue::Object(map) => {
            for (key, child) in map {
                if key == "$ref" {
                    if let Some(Ok(Reference {
                        document: Some(document),
                        ..
                    })) = child.as_str().map(parse_reference)
                    {
                        out.insert(document);
                    }
                } else {
                    collect_document_refs(child, out);
                }
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                collect_document_refs(item, out);
            }
        }
        _ => {}
    }
}

/// Per-document resolution state handed to [`parse_schema`].
pub(crate) struct ResolutionContext<'a> {
    document: Option<&'a str>,
    type_names: &'a BTreeSet<String>,
    raw_schemas: &'a JsonMap<String, JsonValue>,
    resolved_schemas: BTreeMap<String, Arc<Schema>>,
    stack: Vec<String>,
    cache: Option<&'a DocumentCache>,
    externals: BTreeMap<String, Arc<Interface>>,
}

impl<'a> ResolutionContext<'a> {
    pub(crate) fn new(
        document: Option<&'a str>,
        type_names: &'a BTreeSet<String>,
        raw_schemas: &'a JsonMap<String, JsonValue>,
        cache: Option<&'a DocumentCache>,
    ) -> Self {
        Self {
            document,
            type_names,
            raw_schemas,
            resolved_schemas: BTreeMap::new(),
            stack: Vec::new(),
            cache,
            externals: BTreeMap::new(),
        }
    }

    /// Location prefix for diagnostics inside this document.
    pub(crate) fn location(&self, fragment: &str) -> String {
        format!("{}#{fragment}", self.document.unwrap_or(""))
    }

    pub(crate) fn resolve(&mut self, raw: &JsonValue, fragment: &str) -> Result<Arc<Schema>, SkyhookError> {
        let location = self.location(fragment);
        parse_schema(raw, &location, self)
    }

    /// Resolves the reusable fragment `key`, memoised so every use site
    /// shares one node.
    pub(crate) fn fragment(&mut self, key: &str, location: &str) -> Result<Arc<Schema>, SkyhookError> {
        if let Some(resolved) = self.resolved_schemas.get(key) {
            return Ok(Arc::clone(resolved));
        }
        if let Some(start) = self.stack.iter().position(|k| k == key) {
            let mut cycle: Vec<String> = self.stack[start..]
                .iter()
                .map(|k| format!("#/schemas/{k}"))
                .collect();
            cycle.push(format!("#/schemas/{key}"));
            return Err(SkyhookError::CyclicReference {
                location: location.to_string(),
                cycle: cycle.join(" -> "),
            });
        }
        let raw_schemas = self.raw_schemas;
        let raw = raw_schemas
            .get(key)
            .ok_or_else(|| SkyhookError::UnresolvedReference {
                location: location.to_string(),
                reference: format!("#/schemas/{key}"),
            })?;

        self.stack.push(key.to_string());
        let result = self.resolve(raw, &format!("/schemas/{key}"));
        self.stack.pop();

        let resolved = result?;
        self.resolved_schemas
            .insert(key.to_string(), Arc::clone(&resolved));
        Ok(resolved)
    }

    fn external(&mut self, document: &str, location: &str) -> Result<Arc<Interface>, SkyhookError> {
        if let Some(found) = self.externals.get(document) {
            return Ok(Arc::clone(found));
        }
        let cache = self.cache.ok_or_else(|| SkyhookError::UnresolvedReference {
            location: location.to_string(),
            reference: format!("{document} (no document loader configured)"),
        })?;
        let interface = cache.interface_at(document)?;
        self.externals
            .insert(document.to_string(), Arc::clone(&interface));
        Ok(interface)
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        BTreeMap<String, Arc<Schema>>,
        BTreeMap<String, Arc<Interface>>,
    ) {
        (self.resolved_schemas, self.externals)
    }
}

impl RefResolver for ResolutionContext<'_> {
    fn resolve_ref(&mut self, raw: &str, location: &str) -> Result<Arc<Schema>, SkyhookError> {
        let reference = parse_reference(raw).map_err(|message| SkyhookError::UnresolvedReference {
            location: location.to_string(),
            reference: message,
        })?;
        let unresolved = || SkyhookError::UnresolvedReference {
            location: location.to_string(),
            reference: raw.to_string(),
        };

        let document = match (reference.document.as_deref(), self.cache) {
            (Some(raw_document), Some(cache)) => {
                Some(cache.resolve_key(self.document, raw_document)?)
            }
            (Some(raw_document), None) => Some(raw_document.to_string()),
            (None, _) => None,
        };
        let document = match document {
            Some(document) if Some(document.as_str()) != self.document => document,
            _ => {
                return match reference.target {
                    Target::Type(name) if self.type_names.contains(&name) => {
                        Ok(Arc::new(Schema::Reference(TypeRef::local(name))))
                    }
                    Target::Type(_) => Err(unresolved()),
                    Target::Schema(key) => self.fragment(&key, location),
                };
            }
        };

        let external = self.external(&document, location)?;
        match reference.target {
            Target::Type(name) => {
                if external.named_type(&name).is_none() {
                    return Err(unresolved());
                }
                Ok(Arc::new(Schema::Reference(TypeRef {
                    document: Some(document),
                    name,
                })))
            }
            Target::Schema(key) => {
                let fragment = external.schema(&key).ok_or_else(unresolved)?;
                Ok(rebase(fragment, &document))
            }
        }
    }
}

/// Rewrites document-local type references inside a fragment borrowed from
/// `document` so they keep pointing at that document once inlined elsewhere.
pub(crate) fn rebase(schema: &Arc<Schema>, document: &str) -> Arc<Schema> {
    if !has_local_refs(schema) {
        return Arc::clone(schema);
    }
    let rebased = match &**schema {
        Schema::Reference(type_ref) if type_ref.document.is_none() => Schema::Reference(TypeRef {
            document: Some(document.to_string()),
            name: type_ref.name.clone(),
        }),
        Schema::Object(object) => Schema::Object(ObjectSchema {
            fields: object
                .fields
                .iter()
                .map(|field| Field {
                    name: field.name.clone(),
                    schema: rebase(&field.schema, document),
                    required: field.required,
                })
                .collect(),
            closed: object.closed,
        }),
        Schema::Tuple { items } => Schema::Tuple {
            items: items.iter().map(|item| rebase(item, document)).collect(),
        },
        Schema::Array(array) => Schema::Array(ArraySchema {
            items: rebase(&array.items, document),
            min_items: array.min_items,
            max_items: array.max_items,
        }),
        Schema::Union { alternatives } => Schema::Union {
            alternatives: alternatives
                .iter()
                .map(|alternative| rebase(alternative, document))
                .collect(),
        },
        other => other.clone(),
    };
    Arc::new(rebased)
}

fn has_local_refs(schema: &Schema) -> bool {
    match schema {
        Schema::Reference(type_ref) => type_ref.document.is_none(),
        Schema::Object(object) => object.fields.iter().any(|f| has_local_refs(&f.schema)),
        Schema::Tuple { items } => items.iter().any(|item| has_local_refs(item)),
        Schema::Array(array) => has_local_refs(&array.items),
        Schema::Union { alternatives } => alternatives.iter().any(|alt| has_local_refs(alt)),
        Schema::Const { .. } | Schema::Enum { .. } | Schema::Primitive(_) | Schema::Opaque => false,
    }
}

/// Whether `schema` admits at least one finite value, given the local named
/// types already known to have one. References to other documents count as
/// finite; those documents were checked when they were resolved.
pub(crate) fn has_finite_value(schema: &Schema, finite: &BTreeSet<&str>) -> bool {
    match schema {
        Schema::Reference(type_ref) => {
            type_ref.document.is_some() || finite.contains(type_ref.name.as_str())
        }
        Schema::Object(object) => object
            .fields
            .iter()
            .filter(|field| field.required)
            .all(|field| has_finite_value(&field.schema, finite)),
        Schema::Tuple { items } => items.iter().all(|item| has_finite_value(item, finite)),
        Schema::Array(array) => {
            array.min_items.unwrap_or(0) == 0 || has_finite_value(&array.items, finite)
        }
        Schema::Union { alternatives } => alternatives
            .iter()
            .any(|alternative| has_finite_value(alternative, finite)),
        Schema::Enum { values } => !values.is_empty(),
        Schema::Const { .. } | Schema::Primitive(_) | Schema::Opaque => true,
    }
}

/// Names of the local named types referenced anywhere inside `schema`.
pub(crate) fn local_type_refs<'a>(schema: &'a Schema, out: &mut Vec<&'a str>) {
    match schema {
        Schema::Reference(type_ref) if type_ref.document.is_none() => out.push(&type_ref.name),
        Schema::Object(object) => {
            for field in &object.fields {
                local_type_refs(&field.schema, out);
            }
        }
        Schema::Tuple { items } => {
            for item in items {
                local_type_refs(item, out);
            }
        }
        Schema::Array(array) => local_type_refs(&array.items, out),
        Schema::Union { alternatives } => {
            for alternative in alternatives {
                local_type_refs(alternative, out);
            }
        }
        _ => {}
    }
}
