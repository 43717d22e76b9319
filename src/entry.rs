//! Implementing side: adapters that validate boundary input before a local
//! handler runs and validate the handler's output before it leaves.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{debug, warn};

use crate::binder::Invoker;
use crate::error::{PathSegment, SkyhookError};
use crate::payload::{decode_arguments, decode_message, encode_response, Response};
use crate::validate::{Contract, FunctionContract, Validator};

type FunctionHandler =
    dyn Fn(JsonMap<String, JsonValue>) -> Result<JsonValue, SkyhookError> + Send + Sync;

/// Wraps a handler for exactly one declared function.
pub struct EntryPoint {
    contract: Arc<Contract>,
    function: String,
    handler: Box<FunctionHandler>,
}

impl EntryPoint {
    pub fn new<H>(contract: Arc<Contract>, function: &str, handler: H) -> Result<Self, SkyhookError>
    where
        H: Fn(JsonMap<String, JsonValue>) -> Result<JsonValue, SkyhookError> + Send + Sync + 'static,
    {
        contract.function(function)?;
        Ok(Self {
            contract,
            function: function.to_string(),
            handler: Box::new(handler),
        })
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    fn function_contract(&self) -> Result<&FunctionContract, SkyhookError> {
        self.contract.function(&self.function)
    }

    /// Validates `arguments`, runs the handler and validates its result.
    /// Functions without a declared return yield `null`.
    pub fn invoke(&self, arguments: JsonMap<String, JsonValue>) -> Result<JsonValue, SkyhookError> {
        let contract = self.function_contract()?;
        contract.check_arguments(&arguments)?;
        debug!(function = %self.function, "running handler");
        let value = (self.handler)(arguments)?;
        if contract.returns().is_none() {
            return Ok(JsonValue::Null);
        }
        contract.check_result(&value).map_err(|violation| {
            warn!(function = %self.function, %violation, "handler result violates declared contract");
            SkyhookError::ContractViolation {
                name: self.function.clone(),
                violation,
            }
        })?;
        Ok(value)
    }

    /// Decodes a raw request and runs [`EntryPoint::invoke`].
    pub fn handle(&self, payload: &[u8]) -> Result<JsonValue, SkyhookError> {
        self.invoke(decode_arguments(payload)?)
    }

    /// Like [`EntryPoint::handle`], folding the outcome into a response envelope.
    pub fn respond(&self, payload: &[u8]) -> Result<Vec<u8>, SkyhookError> {
        let response = match self.handle(payload) {
            Ok(value) => Response::Result(value),
            Err(err) => Response::from_error(&err),
        };
        encode_response(&response)
    }
}

type SingleHandler = dyn Fn(JsonValue) -> Result<(), SkyhookError> + Send + Sync;
type BatchHandler = dyn Fn(Vec<JsonValue>) -> Result<(), SkyhookError> + Send + Sync;

enum Delivery {
    Single(Box<SingleHandler>),
    Batched(Box<BatchHandler>),
}

/// Wraps a handler for one declared message.
pub struct MessageEntryPoint {
    message: String,
    validator: Validator,
    delivery: Delivery,
}

impl MessageEntryPoint {
    /// Handler called once per payload.
    pub fn new<H>(contract: &Contract, message: &str, handler: H) -> Result<Self, SkyhookError>
    where
        H: Fn(JsonValue) -> Result<(), SkyhookError> + Send + Sync + 'static,
    {
        Self::build(contract, message, Delivery::Single(Box::new(handler)))
    }

    /// Handler called once per batch with every payload of the batch.
    pub fn batched<H>(contract: &Contract, message: &str, handler: H) -> Result<Self, SkyhookError>
    where
        H: Fn(Vec<JsonValue>) -> Result<(), SkyhookError> + Send + Sync + 'static,
    {
        Self::build(contract, message, Delivery::Batched(Box::new(handler)))
    }

    fn build(contract: &Contract, message: &str, delivery: Delivery) -> Result<Self, SkyhookError> {
        Ok(Self {
            message: message.to_string(),
            validator: contract.message(message)?.clone(),
            delivery,
        })
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_batched(&self) -> bool {
        matches!(self.delivery, Delivery::Batched(_))
    }

    pub fn handle(&self, payload: &[u8]) -> Result<(), SkyhookError> {
        let value = self.decode(payload)?;
        match &self.delivery {
            Delivery::Single(handler) => handler(value),
            Delivery::Batched(handler) => handler(vec![value]),
        }
    }

    /// Validates every payload first; the handler only runs when the whole
    /// batch is valid. Violation paths start at the payload's batch index.
    pub fn handle_batch<I, B>(&self, payloads: I) -> Result<(), SkyhookError>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut values = Vec::new();
        for (index, payload) in payloads.into_iter().enumerate() {
            let value = self.decode(payload.as_ref()).map_err(|err| match err {
                SkyhookError::Validation(violation) => {
                    SkyhookError::Validation(violation.within(PathSegment::Index(index)))
                }
                other => other,
            })?;
            values.push(value);
        }
        debug!(message_name = %self.message, count = values.len(), "delivering batch");
        match &self.delivery {
            Delivery::Single(handler) => values.into_iter().try_for_each(|value| handler(value)),
            Delivery::Batched(handler) => handler(values),
        }
    }

    fn decode(&self, payload: &[u8]) -> Result<JsonValue, SkyhookError> {
        let value = decode_message(payload)?;
        self.validator
            .check(&value)
            .map_err(SkyhookError::Validation)?;
        Ok(value)
    }
}

/// Routes raw invocations to one [`EntryPoint`] per function.
pub struct Dispatcher {
    contract: Arc<Contract>,
    entries: BTreeMap<String, EntryPoint>,
}

impl Dispatcher {
    pub fn new(contract: Arc<Contract>) -> Self {
        Self {
            contract,
            entries: BTreeMap::new(),
        }
    }

    /// Registers `handler` for `function`; each function takes one handler.
    pub fn with_function<H>(mut self, function: &str, handler: H) -> Result<Self, SkyhookError>
    where
        H: Fn(JsonMap<String, JsonValue>) -> Result<JsonValue, SkyhookError> + Send + Sync + 'static,
    {
        if self.entries.contains_key(function) {
            return Err(SkyhookError::Config(format!(
                "function '{function}' already has a handler"
            )));
        }
        let entry = EntryPoint::new(Arc::clone(&self.contract), function, handler)?;
        self.entries.insert(function.to_string(), entry);
        Ok(self)
    }

    /// Declared functions that have no handler yet.
    pub fn missing(&self) -> Vec<&str> {
        self.contract
            .interface()
            .functions()
            .iter()
            .map(|function| function.name.as_str())
            .filter(|name| !self.entries.contains_key(*name))
            .collect()
    }

    pub fn dispatch(&self, function: &str, payload: &[u8]) -> Result<JsonValue, SkyhookError> {
        self.entry(function)?.handle(payload)
    }

    pub fn respond(&self, function: &str, payload: &[u8]) -> Result<Vec<u8>, SkyhookError> {
        match self.entry(function) {
            Ok(entry) => entry.respond(payload),
            Err(err) => encode_response(&Response::from_error(&err)),
        }
    }

    fn entry(&self, function: &str) -> Result<&EntryPoint, SkyhookError> {
        self.contract.function(function)?;
        self.entries
            .get(function)
            .ok_or_else(|| SkyhookError::Handler(format!("no handler registered for '{function}'")))
    }
}

/// In-process transport: the endpoint identifier is the function name.
impl Invoker for Dispatcher {
    fn invoke(&self, endpoint: &str, payload: &[u8]) -> Result<Vec<u8>, SkyhookError> {
        self.respond(endpoint, payload)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::interface::resolve_document;

    fn contract() -> Arc<Contract> {
        let interface = resolve_document(&json!({
            "service": {"name": "calc", "version": "1.0.0", "description": "Calculator."},
            "functions": [
                {
                    "name": "add",
                    "description": "Add.",
                    "arguments": [
                        {"name": "a", "description": "A.", "schema": {"type": "integer"}},
                        {"name": "b", "description": "B.", "schema": {"type": "integer"}}
                    ],
                    "returns": {"description": "Sum.", "schema": {"type": "integer"}}
                },
                {"name": "reset", "description": "Reset."}
            ],
            "messages": [{"name": "tick", "description": "Tick.", "schema": {"type": "integer"}}]
        }))
        .unwrap();
        Arc::new(Contract::new(Arc::new(interface)))
    }

    fn add(arguments: JsonMap<String, JsonValue>) -> Result<JsonValue, SkyhookError> {
        let a = arguments["a"].as_i64().unwrap_or_default();
        let b = arguments["b"].as_i64().unwrap_or_default();
        Ok(json!(a + b))
    }

    #[test]
    fn invalid_input_never_reaches_handler() {
        let calls = Arc::new(Mutex::new(0));
        let seen = Arc::clone(&calls);
        let entry = EntryPoint::new(contract(), "add", move |arguments| {
            *seen.lock().unwrap() += 1;
            add(arguments)
        })
        .unwrap();

        assert_eq!(entry.handle(br#"{"a": 2, "b": 3}"#).unwrap(), json!(5));
        let err = entry.handle(br#"{"a": "2", "b": 3}"#).unwrap_err();
        assert_eq!(err.violation().unwrap().path_labels(), vec!["a"]);
        assert!(matches!(entry.handle(br#"{"a": 2}"#), Err(SkyhookError::Arity { .. })));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn handler_breaking_contract_is_rejected() {
        let entry = EntryPoint::new(contract(), "add", |_| Ok(json!("five"))).unwrap();
        let err = entry.handle(br#"{"a": 2, "b": 3}"#).unwrap_err();
        assert!(matches!(err, SkyhookError::ContractViolation { name, .. } if name == "add"));

        let bytes = entry.respond(br#"{"a": 2, "b": 3}"#).unwrap();
        let envelope: JsonValue = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(envelope["error"]["kind"], json!("contract-violation"));
    }

    #[test]
    fn function_without_return_yields_null() {
        let entry = EntryPoint::new(contract(), "reset", |_| Ok(json!({"ignored": true}))).unwrap();
        assert_eq!(entry.handle(b"{}").unwrap(), JsonValue::Null);
    }

    #[test]
    fn undeclared_function_cannot_be_wrapped() {
        assert!(matches!(
            EntryPoint::new(contract(), "sub", add),
            Err(SkyhookError::UnknownFunction(_))
        ));
    }

    #[test]
    fn dispatcher_routes_and_rejects_duplicates() {
        let dispatcher = Dispatcher::new(contract()).with_function("add", add).unwrap();
        assert_eq!(dispatcher.missing(), vec!["reset"]);
        assert_eq!(dispatcher.dispatch("add", br#"{"a": 1, "b": 1}"#).unwrap(), json!(2));

        let bytes = dispatcher.respond("nope", b"{}").unwrap();
        let envelope: JsonValue = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(envelope["error"]["kind"], json!("unknown-function"));

        let err = dispatcher.with_function("add", add).err().unwrap();
        assert!(matches!(err, SkyhookError::Config(_)));
    }

    #[test]
    fn message_batch_is_validated_before_delivery() {
        let delivered: Arc<Mutex<Vec<Vec<JsonValue>>>> = Arc::default();
        let sink = Arc::clone(&delivered);
        let entry = MessageEntryPoint::batched(&contract(), "tick", move |values| {
            sink.lock().unwrap().push(values);
            Ok(())
        })
        .unwrap();
        assert!(entry.is_batched());

        let err = entry.handle_batch([&b"1"[..], &b"\"x\""[..]]).unwrap_err();
        assert_eq!(err.violation().unwrap().path_labels(), vec!["1"]);
        assert!(delivered.lock().unwrap().is_empty());

        entry.handle_batch([&b"1"[..], &b"2"[..]]).unwrap();
        entry.handle(b"3").unwrap();
        assert_eq!(
            *delivered.lock().unwrap(),
            vec![vec![json!(1), json!(2)], vec![json!(3)]]
        );
    }

    #[test]
    fn single_message_handler_runs_per_payload() {
        let delivered: Arc<Mutex<Vec<JsonValue>>> = Arc::default();
        let sink = Arc::clone(&delivered);
        let entry = MessageEntryPoint::new(&contract(), "tick", move |value| {
            sink.lock().unwrap().push(value);
            Ok(())
        })
        .unwrap();
        entry.handle_batch(vec![b"4".to_vec(), b"5".to_vec()]).unwrap();
        assert_eq!(*delivered.lock().unwrap(), vec![json!(4), json!(5)]);
        assert!(matches!(
            MessageEntryPoint::new(&contract(), "tock", |_| Ok(())),
            Err(SkyhookError::UnknownMessage(_))
        ));
    }
}
