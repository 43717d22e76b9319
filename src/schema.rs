//! Canonical schema model and shape parsing.
//!
//! Supported keyword subset:
//! - Literals: `const`, `enum`
//! - Primitives: `type` of `integer`, `number`, `string`, `boolean`, `null`
//!   (or a list of them), with `minimum`, `maximum`, `exclusiveMinimum`,
//!   `exclusiveMaximum`, `minLength`, `maxLength`, `pattern`
//! - Object: `properties`, `required`, `additionalProperties: false`
//! - Array: `items` as a list (tuple) or a single schema, `minItems`, `maxItems`
//! - Unions: `anyOf`, `oneOf`
//! - References: `$ref`
//!
//! Annotation keywords (`description`, `title`, `$comment`, `examples`) are
//! ignored. Shapes outside this subset resolve to [`Schema::Opaque`].

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::{Map as JsonMap, Number, Value as JsonValue};

use crate::error::SkyhookError;

/// A resolved schema node.
///
/// Children are shared through [`Arc`] so that a reusable fragment inlined at
/// several sites is one node, not several copies.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Schema {
    Const { value: JsonValue },
    Enum { values: Vec<JsonValue> },
    Primitive(Primitive),
    Object(ObjectSchema),
    Tuple { items: Vec<Arc<Schema>> },
    Array(ArraySchema),
    /// Alternatives in declared order; the first accepting one wins.
    Union { alternatives: Vec<Arc<Schema>> },
    /// Identity-preserving link to a named type.
    Reference(TypeRef),
    /// Any JSON-compatible value.
    Opaque,
}

impl Schema {
    /// Short label used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Schema::Const { .. } => "const",
            Schema::Enum { .. } => "enum",
            Schema::Primitive(_) => "primitive",
            Schema::Object(_) => "object",
            Schema::Tuple { .. } => "tuple",
            Schema::Array(_) => "array",
            Schema::Union { .. } => "union",
            Schema::Reference(_) => "reference",
            Schema::Opaque => "opaque",
        }
    }

    /// `true` for a bare `type: null` primitive.
    pub fn is_null(&self) -> bool {
        matches!(self, Schema::Primitive(p) if p.kind == PrimitiveKind::Null)
    }

    /// `true` for a union with a bare null alternative next to others.
    pub fn is_nullable_union(&self) -> bool {
        match self {
            Schema::Union { alternatives } => {
                alternatives.len() > 1 && alternatives.iter().any(|alt| alt.is_null())
            }
            _ => false,
        }
    }

    pub fn primitive(kind: PrimitiveKind) -> Self {
        Schema::Primitive(Primitive::new(kind))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    Integer,
    Number,
    String,
    Boolean,
    Null,
}

impl PrimitiveKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "integer" => Some(PrimitiveKind::Integer),
            "number" => Some(PrimitiveKind::Number),
            "string" => Some(PrimitiveKind::String),
            "boolean" => Some(PrimitiveKind::Boolean),
            "null" => Some(PrimitiveKind::Null),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Integer => "integer",
            PrimitiveKind::Number => "number",
            PrimitiveKind::String => "string",
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Null => "null",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Primitive {
    pub kind: PrimitiveKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<Number>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<Number>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive_minimum: Option<Number>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive_maximum: Option<Number>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Pattern>,
}

impl Primitive {
    pub fn new(kind: PrimitiveKind) -> Self {
        Self {
            kind,
            minimum: None,
            maximum: None,
            exclusive_minimum: None,
            exclusive_maximum: None,
            min_length: None,
            max_length: None,
            pattern: None,
        }
    }
}

/// A `pattern` keyword compiled once at resolution time.
#[derive(Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Regex::new(source).map(Pattern)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({:?})", self.as_str())
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectSchema {
    /// Fields in declaration order.
    pub fields: Vec<Field>,
    /// Closed objects reject keys that are not declared fields.
    pub closed: bool,
}

impl ObjectSchema {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    pub schema: Arc<Schema>,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArraySchema {
    pub items: Arc<Schema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_items: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<u64>,
}

/// Key of a named type, optionally living in another document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TypeRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    pub name: String,
}

impl TypeRef {
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            document: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.document {
            Some(document) => write!(f, "{document}#/types/{}", self.name),
            None => write!(f, "#/types/{}", self.name),
        }
    }
}

/// Resolves `$ref` strings met while parsing a schema tree.
pub trait RefResolver {
    /// Returns the node `reference` stands for. `location` points at the
    /// `$ref` site and is used for diagnostics.
    fn resolve_ref(&mut self, reference: &str, location: &str)
        -> Result<Arc<Schema>, SkyhookError>;
}

/// Parses a raw schema tree into a [`Schema`], delegating `$ref` to `refs`.
pub fn parse_schema(
    raw: &JsonValue,
    location: &str,
    refs: &mut dyn RefResolver,
) -> Result<Arc<Schema>, SkyhookError> {
    let map = match raw {
        JsonValue::Bool(true) => return Ok(Arc::new(Schema::Opaque)),
        JsonValue::Object(map) => map,
        JsonValue::Bool(false) => {
            return Err(schema_error(location, "schema 'false' accepts no value"));
        }
        other => {
            return Err(schema_error(
                location,
                format!("schema must be a mapping, found {}", json_type_name(other)),
            ));
        }
    };

    if let Some(reference) = map.get("$ref") {
        let reference = reference
            .as_str()
            .ok_or_else(|| schema_error(location, "'$ref' must be a string"))?;
        return refs.resolve_ref(reference, &format!("{location}/$ref"));
    }

    if let Some(value) = map.get("const") {
        return Ok(Arc::new(Schema::Const {
            value: value.clone(),
        }));
    }

    if let Some(values) = map.get("enum") {
        let values = values
            .as_array()
            .filter(|values| !values.is_empty())
            .ok_or_else(|| schema_error(location, "'enum' must be a non-empty list"))?;
        return Ok(Arc::new(Schema::Enum {
            values: values.clone(),
        }));
    }

    for keyword in ["anyOf", "oneOf"] {
        if let Some(alternatives) = map.get(keyword) {
            return parse_union(alternatives, &format!("{location}/{keyword}"), refs);
        }
    }

    match map.get("type") {
        Some(JsonValue::String(type_name)) => parse_typed(type_name, map, location, refs),
        Some(JsonValue::Array(type_names)) => parse_type_list(type_names, map, location, refs),
        Some(_) => Err(schema_error(
            location,
            "'type' must be a string or a list of strings",
        )),
        None if map.contains_key("properties") => parse_typed("object", map, location, refs),
        None => Ok(Arc::new(Schema::Opaque)),
    }
}

fn parse_union(
    raw: &JsonValue,
    location: &str,
    refs: &mut dyn RefResolver,
) -> Result<Arc<Schema>, SkyhookError> {
    let items = raw
        .as_array()
        .filter(|items| !items.is_empty())
        .ok_or_else(|| schema_error(location, "alternatives must be a non-empty list"))?;
    let mut alternatives = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        alternatives.push(parse_schema(item, &format!("{location}/{index}"), refs)?);
    }
    Ok(Arc::new(Schema::Union { alternatives }))
}

// `type: [a, b]` is sugar for a union of the same schema under each type.
fn parse_type_list(
    type_names: &[JsonValue],
    map: &JsonMap<String, JsonValue>,
    location: &str,
    refs: &mut dyn RefResolver,
) -> Result<Arc<Schema>, SkyhookError> {
    if type_names.is_empty() {
        return Err(schema_error(location, "'type' list must not be empty"));
    }
    let mut alternatives = Vec::with_capacity(type_names.len());
    for (index, type_name) in type_names.iter().enumerate() {
        let type_name = type_name.as_str().ok_or_else(|| {
            schema_error(&format!("{location}/type/{index}"), "type names must be strings")
        })?;
        alternatives.push(parse_typed(type_name, map, location, refs)?);
    }
    if alternatives.len() == 1 {
        return Ok(alternatives.remove(0));
    }
    Ok(Arc::new(Schema::Union { alternatives }))
}

fn parse_typed(
    type_name: &str,
    map: &JsonMap<String, JsonValue>,
    location: &str,
    refs: &mut dyn RefResolver,
) -> Result<Arc<Schema>, SkyhookError> {
    match type_name {
        "object" => parse_object(map, location, refs),
        "array" => parse_array(map, location, refs),
        other => {
            let kind = PrimitiveKind::from_name(other).ok_or_else(|| {
                schema_error(location, format!("unknown type '{other}'"))
            })?;
            Ok(Arc::new(Schema::Primitive(parse_primitive(kind, map, location)?)))
        }
    }
}

fn parse_primitive(
    kind: PrimitiveKind,
    map: &JsonMap<String, JsonValue>,
    location: &str,
) -> Result<Primitive, SkyhookError> {
    let mut primitive = Primitive::new(kind);
    match kind {
        PrimitiveKind::Integer | PrimitiveKind::Number => {
            primitive.minimum = number_keyword(map, "minimum", location)?;
            primitive.maximum = number_keyword(map, "maximum", location)?;
            primitive.exclusive_minimum = number_keyword(map, "exclusiveMinimum", location)?;
            primitive.exclusive_maximum = number_keyword(map, "exclusiveMaximum", location)?;
        }
        PrimitiveKind::String => {
            primitive.min_length = count_keyword(map, "minLength", location)?;
            primitive.max_length = count_keyword(map, "maxLength", location)?;
            if let Some(pattern) = map.get("pattern") {
                let source = pattern
                    .as_str()
                    .ok_or_else(|| schema_error(location, "'pattern' must be a string"))?;
                let compiled = Pattern::new(source).map_err(|e| {
                    schema_error(location, format!("invalid pattern '{source}': {e}"))
                })?;
                primitive.pattern = Some(compiled);
            }
        }
        PrimitiveKind::Boolean | PrimitiveKind::Null => {}
    }
    Ok(primitive)
}

fn parse_object(
    map: &JsonMap<String, JsonValue>,
    location: &str,
    refs: &mut dyn RefResolver,
) -> Result<Arc<Schema>, SkyhookError> {
    let required: Vec<&str> = match map.get("required") {
        None => Vec::new(),
        Some(JsonValue::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| schema_error(location, "'required' entries must be strings"))
            })
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(schema_error(location, "'required' must be a list")),
    };

    let mut fields = Vec::new();
    if let Some(properties) = map.get("properties") {
        let properties = properties
            .as_object()
            .ok_or_else(|| schema_error(location, "'properties' must be a mapping"))?;
        for (name, raw) in properties {
            let schema = parse_schema(raw, &format!("{location}/properties/{name}"), refs)?;
            fields.push(Field {
                name: name.clone(),
                schema,
                required: required.contains(&name.as_str()),
            });
        }
    }
    // Required names without a property schema accept any value.
    for name in &required {
        if !fields.iter().any(|field| field.name == *name) {
            fields.push(Field {
                name: (*name).to_string(),
                schema: Arc::new(Schema::Opaque),
                required: true,
            });
        }
    }

    let closed = matches!(map.get("additionalProperties"), Some(JsonValue::Bool(false)));
    Ok(Arc::new(Schema::Object(ObjectSchema { fields, closed })))
}

fn parse_array(
    map: &JsonMap<String, JsonValue>,
    location: &str,
    refs: &mut dyn RefResolver,
) -> Result<Arc<Schema>, SkyhookError> {
    match map.get("items") {
        Some(JsonValue::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                out.push(parse_schema(item, &format!("{location}/items/{index}"), refs)?);
            }
            Ok(Arc::new(Schema::Tuple { items: out }))
        }
        items => {
            let items = match items {
                Some(raw) => parse_schema(raw, &format!("{location}/items"), refs)?,
                None => Arc::new(Schema::Opaque),
            };
            Ok(Arc::new(Schema::Array(ArraySchema {
                items,
                min_items: count_keyword(map, "minItems", location)?,
                max_items: count_keyword(map, "maxItems", location)?,
            })))
        }
    }
}

fn number_keyword(
    map: &JsonMap<String, JsonValue>,
    keyword: &str,
    location: &str,
) -> Result<Option<Number>, SkyhookError> {
    match map.get(keyword) {
        None => Ok(None),
        Some(JsonValue::Number(n)) => Ok(Some(n.clone())),
        Some(_) => Err(schema_error(location, format!("'{keyword}' must be a number"))),
    }
}

fn count_keyword(
    map: &JsonMap<String, JsonValue>,
    keyword: &str,
    location: &str,
) -> Result<Option<u64>, SkyhookError> {
    match map.get(keyword) {
        None => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            schema_error(location, format!("'{keyword}' must be a non-negative integer"))
        }),
    }
}

fn schema_error(location: &str, message: impl Into<String>) -> SkyhookError {
    SkyhookError::Document {
        location: location.to_string(),
        message: message.into(),
    }
}

pub(crate) fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(n) if n.is_i64() || n.is_u64() => "integer",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct NoRefs;

    impl RefResolver for NoRefs {
        fn resolve_ref(
            &mut self,
            reference: &str,
            location: &str,
        ) -> Result<Arc<Schema>, SkyhookError> {
            Err(SkyhookError::UnresolvedReference {
                location: location.to_string(),
                reference: reference.to_string(),
            })
        }
    }

    fn parse(raw: JsonValue) -> Arc<Schema> {
        parse_schema(&raw, "#", &mut NoRefs).unwrap()
    }

    #[test]
    fn parses_literals() {
        assert_eq!(*parse(json!({"const": "foo"})), Schema::Const { value: json!("foo") });
        assert_eq!(
            *parse(json!({"enum": ["foo", "bar", 50]})),
            Schema::Enum {
                values: vec![json!("foo"), json!("bar"), json!(50)]
            }
        );
    }

    #[test]
    fn parses_primitive_bounds() {
        let schema = parse(json!({"type": "integer", "minimum": 0, "exclusiveMaximum": 9}));
        let Schema::Primitive(primitive) = &*schema else {
            panic!("expected primitive, got {schema:?}");
        };
        assert_eq!(primitive.kind, PrimitiveKind::Integer);
        assert_eq!(primitive.minimum, Some(Number::from(0)));
        assert_eq!(primitive.exclusive_maximum, Some(Number::from(9)));
        assert_eq!(primitive.maximum, None);
    }

    #[test]
    fn literal_items_list_is_tuple_and_single_items_is_array() {
        let tuple = parse(json!({
            "type": "array",
            "items": [{"type": "integer"}, {"type": "string"}, {"const": 500}]
        }));
        assert!(matches!(&*tuple, Schema::Tuple { items } if items.len() == 3));

        let array = parse(json!({"type": "array", "items": {"type": "string"}, "maxItems": 3}));
        let Schema::Array(array) = &*array else {
            panic!("expected array");
        };
        assert_eq!(*array.items, Schema::primitive(PrimitiveKind::String));
        assert_eq!(array.max_items, Some(3));
    }

    #[test]
    fn object_fields_keep_declaration_order_and_requiredness() {
        let schema = parse(json!({
            "type": "object",
            "properties": {"zeta": {"type": "string"}, "alpha": {"type": "integer"}},
            "required": ["alpha"],
            "additionalProperties": false
        }));
        let Schema::Object(object) = &*schema else {
            panic!("expected object");
        };
        let names: Vec<_> = object.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert!(!object.field("zeta").unwrap().required);
        assert!(object.field("alpha").unwrap().required);
        assert!(object.closed);
    }

    #[test]
    fn null_union_is_preserved_in_order() {
        let schema = parse(json!({"anyOf": [{"type": "null"}, {"type": "string"}]}));
        assert!(schema.is_nullable_union());
        let Schema::Union { alternatives } = &*schema else {
            panic!("expected union");
        };
        assert!(alternatives[0].is_null());

        let sugar = parse(json!({"type": ["string", "null"]}));
        let Schema::Union { alternatives } = &*sugar else {
            panic!("expected union");
        };
        assert_eq!(*alternatives[0], Schema::primitive(PrimitiveKind::String));
        assert!(alternatives[1].is_null());
    }

    #[test]
    fn unmappable_shapes_are_opaque() {
        assert_eq!(*parse(json!({})), Schema::Opaque);
        assert_eq!(*parse(json!(true)), Schema::Opaque);
        assert_eq!(*parse(json!({"allOf": [{"type": "string"}]})), Schema::Opaque);
    }

    #[test]
    fn malformed_shapes_report_location() {
        let err = parse_schema(&json!({"type": "widget"}), "#/types/x/schema", &mut NoRefs)
            .unwrap_err();
        assert!(err.to_string().contains("#/types/x/schema"));
        assert!(err.to_string().contains("unknown type 'widget'"));

        let err = parse_schema(&json!({"type": "string", "pattern": "("}), "#", &mut NoRefs)
            .unwrap_err();
        assert!(err.to_string().contains("invalid pattern"));

        let err = parse_schema(&json!({"enum": []}), "#", &mut NoRefs).unwrap_err();
        assert!(err.to_string().contains("non-empty"));
    }
}
