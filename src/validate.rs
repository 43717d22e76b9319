//! Structural validation of decoded values against resolved schemas.
//!
//! A [`Validator`] walks the shared schema graph directly; named-type
//! references are looked up in the interface's [`TypeRegistry`] instead of
//! being expanded, so recursive types cost nothing extra and terminate on
//! finite input.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map as JsonMap, Number, Value as JsonValue};

use crate::error::{PathSegment, SkyhookError, Violation};
use crate::interface::{Function, Interface, TypeRegistry};
use crate::schema::{json_type_name, ArraySchema, ObjectSchema, Primitive, PrimitiveKind, Schema};

/// Nesting limit applied to checked values.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// A compiled, shareable check for one schema node.
#[derive(Debug, Clone)]
pub struct Validator {
    schema: Arc<Schema>,
    types: Arc<TypeRegistry>,
    max_depth: usize,
}

/// Compiles `schema`, resolving named-type references through `types`.
pub fn compile(schema: &Arc<Schema>, types: &Arc<TypeRegistry>) -> Validator {
    Validator::compile(schema, types)
}

impl Validator {
    pub fn compile(schema: &Arc<Schema>, types: &Arc<TypeRegistry>) -> Self {
        Self {
            schema: Arc::clone(schema),
            types: Arc::clone(types),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn check(&self, value: &JsonValue) -> Result<(), Violation> {
        self.walk(&self.schema, &self.types, value, 0)
    }

    /// Index of the first union alternative accepting `value`, after
    /// following named-type references at the root. `None` when the root is
    /// not a union.
    pub fn select_alternative(&self, value: &JsonValue) -> Result<Option<usize>, Violation> {
        let mut schema: &Schema = &self.schema;
        let mut types: &TypeRegistry = &self.types;
        for _ in 0..self.max_depth {
            match schema {
                Schema::Reference(type_ref) => {
                    let (named, owner) = types.lookup(type_ref).ok_or_else(|| {
                        Violation::new(Vec::new(), format!("unknown type {type_ref}"))
                    })?;
                    schema = named.schema.as_ref();
                    types = owner;
                }
                Schema::Union { alternatives } => {
                    let mut reasons = Vec::new();
                    for (index, alternative) in alternatives.iter().enumerate() {
                        match self.walk(alternative, types, value, 0) {
                            Ok(()) => return Ok(Some(index)),
                            Err(violation) => reasons.push(violation),
                        }
                    }
                    return Err(no_alternative(schema, alternatives, &reasons));
                }
                _ => return self.walk(schema, types, value, 0).map(|()| None),
            }
        }
        Err(too_deep(self.max_depth))
    }

    fn walk(
        &self,
        schema: &Schema,
        types: &TypeRegistry,
        value: &JsonValue,
        depth: usize,
    ) -> Result<(), Violation> {
        if depth > self.max_depth {
            return Err(too_deep(self.max_depth));
        }
        match schema {
            Schema::Const { value: expected } => {
                if json_equal(expected, value) {
                    Ok(())
                } else {
                    Err(Violation::new(Vec::new(), format!("expected constant {expected}")))
                }
            }
            Schema::Enum { values } => {
                if values.iter().any(|candidate| json_equal(candidate, value)) {
                    Ok(())
                } else {
                    let allowed: Vec<String> = values.iter().map(JsonValue::to_string).collect();
                    Err(Violation::new(
                        Vec::new(),
                        format!("{value} is not one of [{}]", allowed.join(", ")),
                    ))
                }
            }
            Schema::Primitive(primitive) => check_primitive(primitive, value),
            Schema::Object(object) => self.walk_object(object, types, value, depth),
            Schema::Tuple { items } => {
                let elements = expect_array(value)?;
                if elements.len() != items.len() {
                    return Err(Violation::new(
                        Vec::new(),
                        format!("expected {} elements, found {}", items.len(), elements.len()),
                    ));
                }
                for (index, (item, element)) in items.iter().zip(elements).enumerate() {
                    self.walk(item, types, element, depth + 1)
                        .map_err(|v| v.within(PathSegment::Index(index)))?;
                }
                Ok(())
            }
            Schema::Array(array) => self.walk_array(array, types, value, depth),
            Schema::Union { alternatives } => {
                let mut reasons = Vec::new();
                for alternative in alternatives {
                    match self.walk(alternative, types, value, depth + 1) {
                        Ok(()) => return Ok(()),
                        Err(violation) => reasons.push(violation),
                    }
                }
                Err(no_alternative(schema, alternatives, &reasons))
            }
            Schema::Reference(type_ref) => {
                let (named, owner) = types.lookup(type_ref).ok_or_else(|| {
                    Violation::new(Vec::new(), format!("unknown type {type_ref}"))
                })?;
                self.walk(&named.schema, owner, value, depth + 1)
            }
            Schema::Opaque => Ok(()),
        }
    }

    fn walk_object(
        &self,
        object: &ObjectSchema,
        types: &TypeRegistry,
        value: &JsonValue,
        depth: usize,
    ) -> Result<(), Violation> {
        let map = value.as_object().ok_or_else(|| mismatch("object", value))?;
        for field in &object.fields {
            match map.get(&field.name) {
                Some(child) => self
                    .walk(&field.schema, types, child, depth + 1)
                    .map_err(|v| v.within(PathSegment::Field(field.name.clone())))?,
                None if field.required => {
                    return Err(Violation::new(
                        vec![PathSegment::Field(field.name.clone())],
                        "required field is missing",
                    ));
                }
                None => {}
            }
        }
        if object.closed {
            if let Some(extra) = map.keys().find(|key| object.field(key).is_none()) {
                return Err(Violation::new(
                    vec![PathSegment::Field(extra.clone())],
                    "field is not allowed",
                ));
            }
        }
        Ok(())
    }

    fn walk_array(
        &self,
        array: &ArraySchema,
        types: &TypeRegistry,
        value: &JsonValue,
        depth: usize,
    ) -> Result<(), Violation> {
        let elements = expect_array(value)?;
        let len = elements.len() as u64;
        if let Some(min) = array.min_items {
            if len < min {
                return Err(Violation::new(
                    Vec::new(),
                    format!("expected at least {min} elements, found {len}"),
                ));
            }
        }
        if let Some(max) = array.max_items {
            if len > max {
                return Err(Violation::new(
                    Vec::new(),
                    format!("expected at most {max} elements, found {len}"),
                ));
            }
        }
        for (index, element) in elements.iter().enumerate() {
            self.walk(&array.items, types, element, depth + 1)
                .map_err(|v| v.within(PathSegment::Index(index)))?;
        }
        Ok(())
    }
}

fn check_primitive(primitive: &Primitive, value: &JsonValue) -> Result<(), Violation> {
    match primitive.kind {
        PrimitiveKind::Null if value.is_null() => Ok(()),
        PrimitiveKind::Boolean if value.is_boolean() => Ok(()),
        PrimitiveKind::Integer if is_integer(value) => check_bounds(primitive, value),
        PrimitiveKind::Number if value.is_number() => check_bounds(primitive, value),
        PrimitiveKind::String => {
            let text = value
                .as_str()
                .ok_or_else(|| mismatch(primitive.kind.name(), value))?;
            check_string(primitive, text)
        }
        kind => Err(mismatch(kind.name(), value)),
    }
}

fn check_bounds(primitive: &Primitive, value: &JsonValue) -> Result<(), Violation> {
    let JsonValue::Number(n) = value else {
        return Ok(());
    };
    let fail = |reason: String| Err(Violation::new(Vec::new(), reason));
    let against = |bound: &Number| compare_numbers(n, bound);
    if let Some(min) = &primitive.minimum {
        if against(min) == Some(Ordering::Less) {
            return fail(format!("{value} is less than minimum {min}"));
        }
    }
    if let Some(max) = &primitive.maximum {
        if against(max) == Some(Ordering::Greater) {
            return fail(format!("{value} is greater than maximum {max}"));
        }
    }
    if let Some(min) = &primitive.exclusive_minimum {
        if against(min) != Some(Ordering::Greater) {
            return fail(format!("{value} must be greater than {min}"));
        }
    }
    if let Some(max) = &primitive.exclusive_maximum {
        if against(max) != Some(Ordering::Less) {
            return fail(format!("{value} must be less than {max}"));
        }
    }
    Ok(())
}

fn check_string(primitive: &Primitive, text: &str) -> Result<(), Violation> {
    let len = text.chars().count() as u64;
    if let Some(min) = primitive.min_length {
        if len < min {
            return Err(Violation::new(
                Vec::new(),
                format!("string shorter than {min} characters"),
            ));
        }
    }
    if let Some(max) = primitive.max_length {
        if len > max {
            return Err(Violation::new(
                Vec::new(),
                format!("string longer than {max} characters"),
            ));
        }
    }
    if let Some(pattern) = &primitive.pattern {
        if !pattern.is_match(text) {
            return Err(Violation::new(
                Vec::new(),
                format!("string does not match pattern '{}'", pattern.as_str()),
            ));
        }
    }
    Ok(())
}

fn is_integer(value: &JsonValue) -> bool {
    match value {
        JsonValue::Number(n) if n.is_i64() || n.is_u64() => true,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f.fract() == 0.0),
        _ => false,
    }
}

/// Integers compare exactly; a float on either side falls back to `f64`,
/// so `1` and `1.0` are still the same number.
fn compare_numbers(left: &Number, right: &Number) -> Option<Ordering> {
    match (exact_integer(left), exact_integer(right)) {
        (Some(a), Some(b)) => Some(a.cmp(&b)),
        _ => left.as_f64()?.partial_cmp(&right.as_f64()?),
    }
}

fn exact_integer(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

fn json_equal(left: &JsonValue, right: &JsonValue) -> bool {
    match (left, right) {
        (JsonValue::Number(a), JsonValue::Number(b)) => {
            compare_numbers(a, b) == Some(Ordering::Equal)
        }
        (JsonValue::Array(a), JsonValue::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| json_equal(x, y))
        }
        (JsonValue::Object(a), JsonValue::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| json_equal(x, y)))
        }
        _ => left == right,
    }
}

fn expect_array(value: &JsonValue) -> Result<&Vec<JsonValue>, Violation> {
    value.as_array().ok_or_else(|| mismatch("array", value))
}

fn mismatch(expected: &str, value: &JsonValue) -> Violation {
    Violation::new(
        Vec::new(),
        format!("expected {expected}, found {}", json_type_name(value)),
    )
}

fn no_alternative(union: &Schema, alternatives: &[Arc<Schema>], reasons: &[Violation]) -> Violation {
    // For `T | null` the null alternative's reason is noise.
    let nullable = union.is_nullable_union();
    let details: Vec<String> = alternatives
        .iter()
        .zip(reasons)
        .enumerate()
        .filter(|(_, (alternative, _))| !(nullable && alternative.is_null()))
        .map(|(index, (alternative, violation))| {
            format!("alternative {index} ({}): {violation}", alternative.kind_name())
        })
        .collect();
    let summary = if nullable {
        "value is not null and no other alternative matched"
    } else {
        "no alternative matched"
    };
    Violation::new(Vec::new(), format!("{summary} ({})", details.join("; ")))
}

fn too_deep(max_depth: usize) -> Violation {
    Violation::new(
        Vec::new(),
        format!("value nests deeper than {max_depth} levels"),
    )
}

/// Compiled validators for one function: arguments in declaration order plus
/// the optional return check.
#[derive(Debug, Clone)]
pub struct FunctionContract {
    name: String,
    arguments: Vec<(String, Validator)>,
    returns: Option<Validator>,
}

impl FunctionContract {
    fn compile(function: &Function, types: &Arc<TypeRegistry>, max_depth: usize) -> Self {
        Self {
            name: function.name.clone(),
            arguments: function
                .arguments
                .iter()
                .map(|argument| {
                    let validator = compile(&argument.schema, types).with_max_depth(max_depth);
                    (argument.name.clone(), validator)
                })
                .collect(),
            returns: function
                .returns
                .as_ref()
                .map(|returns| compile(&returns.schema, types).with_max_depth(max_depth)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn argument_names(&self) -> impl Iterator<Item = &str> {
        self.arguments.iter().map(|(name, _)| name.as_str())
    }

    pub fn returns(&self) -> Option<&Validator> {
        self.returns.as_ref()
    }

    /// Checks that `arguments` names exactly the declared arguments and that
    /// each value satisfies its schema, in declaration order.
    pub fn check_arguments(&self, arguments: &JsonMap<String, JsonValue>) -> Result<(), SkyhookError> {
        if let Some(unknown) = arguments
            .keys()
            .find(|key| !self.arguments.iter().any(|(name, _)| name == *key))
        {
            return Err(SkyhookError::UnknownArgument {
                function: self.name.clone(),
                argument: unknown.clone(),
            });
        }
        let missing: Vec<String> = self
            .argument_names()
            .filter(|name| !arguments.contains_key(*name))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(SkyhookError::Arity {
                function: self.name.clone(),
                missing,
            });
        }
        for (name, validator) in &self.arguments {
            if let Some(value) = arguments.get(name) {
                validator
                    .check(value)
                    .map_err(|v| SkyhookError::Validation(v.within(PathSegment::Field(name.clone()))))?;
            }
        }
        Ok(())
    }

    /// Checks a result value; functions without a declared return accept any.
    pub fn check_result(&self, value: &JsonValue) -> Result<(), Violation> {
        match &self.returns {
            Some(validator) => validator.check(value),
            None => Ok(()),
        }
    }
}

/// Every validator of one interface, compiled once and shared by callers
/// and entry points so both sides enforce the same checks.
#[derive(Debug)]
pub struct Contract {
    interface: Arc<Interface>,
    functions: BTreeMap<String, FunctionContract>,
    messages: BTreeMap<String, Validator>,
}

impl Contract {
    pub fn new(interface: Arc<Interface>) -> Self {
        Self::with_max_depth(interface, DEFAULT_MAX_DEPTH)
    }

    pub fn with_max_depth(interface: Arc<Interface>, max_depth: usize) -> Self {
        let types = interface.registry();
        let functions = interface
            .functions()
            .iter()
            .map(|function| {
                (
                    function.name.clone(),
                    FunctionContract::compile(function, types, max_depth),
                )
            })
            .collect();
        let messages = interface
            .messages()
            .iter()
            .map(|message| {
                (
                    message.name.clone(),
                    compile(&message.schema, types).with_max_depth(max_depth),
                )
            })
            .collect();
        Self {
            interface,
            functions,
            messages,
        }
    }

    pub fn interface(&self) -> &Arc<Interface> {
        &self.interface
    }

    pub fn function(&self, name: &str) -> Result<&FunctionContract, SkyhookError> {
        self.functions
            .get(name)
            .ok_or_else(|| SkyhookError::UnknownFunction(name.to_string()))
    }

    pub fn message(&self, name: &str) -> Result<&Validator, SkyhookError> {
        self.messages
            .get(name)
            .ok_or_else(|| SkyhookError::UnknownMessage(name.to_string()))
    }
}
