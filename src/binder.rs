//! Caller side: bindings, the active binding context and remote calls.
//!
//! A [`Client`] starts unbound. [`Client::bind`] pushes a binding set onto a
//! thread-local stack and returns a guard; dropping the guard removes exactly
//! that entry, so nested scopes restore the outer binding and other threads
//! never see it. Code that hops threads can pass [`Bindings`] explicitly to
//! [`Client::call_with`] / [`Client::publish_with`] instead.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{debug, warn};

use crate::error::{SkyhookError, TransportErrorKind};
use crate::payload::{decode_response, encode_arguments, encode_message};
use crate::validate::{Contract, FunctionContract};

/// Sends a request to a remote function endpoint and returns the raw response.
pub trait Invoker: Send + Sync {
    fn invoke(&self, endpoint: &str, payload: &[u8]) -> Result<Vec<u8>, SkyhookError>;
}

impl<F> Invoker for F
where
    F: Fn(&str, &[u8]) -> Result<Vec<u8>, SkyhookError> + Send + Sync,
{
    fn invoke(&self, endpoint: &str, payload: &[u8]) -> Result<Vec<u8>, SkyhookError> {
        self(endpoint, payload)
    }
}

/// Hands a message payload to a topic or queue endpoint.
pub trait Publisher: Send + Sync {
    fn publish(&self, endpoint: &str, payload: &[u8]) -> Result<(), SkyhookError>;
}

impl<F> Publisher for F
where
    F: Fn(&str, &[u8]) -> Result<(), SkyhookError> + Send + Sync,
{
    fn publish(&self, endpoint: &str, payload: &[u8]) -> Result<(), SkyhookError> {
        self(endpoint, payload)
    }
}

/// Function and message names mapped to endpoint identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    functions: BTreeMap<String, String>,
    messages: BTreeMap<String, String>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function(mut self, name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        self.functions.insert(name.into(), endpoint.into());
        self
    }

    pub fn with_message(mut self, name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        self.messages.insert(name.into(), endpoint.into());
        self
    }

    pub fn function_endpoint(&self, name: &str) -> Option<&str> {
        self.functions.get(name).map(String::as_str)
    }

    pub fn message_endpoint(&self, name: &str) -> Option<&str> {
        self.messages.get(name).map(String::as_str)
    }
}

struct Frame {
    client: u64,
    token: u64,
    bindings: Arc<Bindings>,
}

thread_local! {
    static ACTIVE: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Keeps a binding active on the current thread until dropped.
#[must_use = "the binding is removed as soon as the guard is dropped"]
pub struct BindingGuard {
    token: u64,
    // Frames live on the creating thread's stack.
    _not_send: PhantomData<*const ()>,
}

impl Drop for BindingGuard {
    fn drop(&mut self) {
        let token = self.token;
        let _ = ACTIVE.try_with(|active| {
            let mut active = active.borrow_mut();
            if let Some(position) = active.iter().rposition(|frame| frame.token == token) {
                let frame = active.remove(position);
                debug!(client = frame.client, "binding scope exited");
            }
        });
    }
}

/// Caller-side handle for one interface.
#[derive(Clone)]
pub struct Client {
    id: u64,
    contract: Arc<Contract>,
    invoker: Arc<dyn Invoker>,
    publisher: Option<Arc<dyn Publisher>>,
}

impl Client {
    pub fn new(contract: Arc<Contract>, invoker: impl Invoker + 'static) -> Self {
        Self {
            id: next_id(),
            contract,
            invoker: Arc::new(invoker),
            publisher: None,
        }
    }

    pub fn with_publisher(mut self, publisher: impl Publisher + 'static) -> Self {
        self.publisher = Some(Arc::new(publisher));
        self
    }

    pub fn contract(&self) -> &Arc<Contract> {
        &self.contract
    }

    /// Activates `bindings` on this thread until the guard is dropped.
    pub fn bind(&self, bindings: Bindings) -> BindingGuard {
        let token = next_id();
        ACTIVE.with(|active| {
            active.borrow_mut().push(Frame {
                client: self.id,
                token,
                bindings: Arc::new(bindings),
            })
        });
        debug!(client = self.id, "binding scope entered");
        BindingGuard {
            token,
            _not_send: PhantomData,
        }
    }

    /// Runs `f` with `bindings` active, restoring the previous state after.
    pub fn scoped<R>(&self, bindings: Bindings, f: impl FnOnce() -> R) -> R {
        let _guard = self.bind(bindings);
        f()
    }

    /// The innermost binding active for this client on this thread.
    pub fn active(&self) -> Option<Arc<Bindings>> {
        ACTIVE.with(|active| {
            active
                .borrow()
                .iter()
                .rev()
                .find(|frame| frame.client == self.id)
                .map(|frame| Arc::clone(&frame.bindings))
        })
    }

    pub fn is_bound(&self) -> bool {
        self.active().is_some()
    }

    /// Calls `function` through the active binding.
    pub fn call(
        &self,
        function: &str,
        arguments: JsonMap<String, JsonValue>,
    ) -> Result<JsonValue, SkyhookError> {
        let bindings = self.require_active(function)?;
        self.call_with(&bindings, function, arguments)
    }

    /// Calls `function` through explicitly passed `bindings`.
    pub fn call_with(
        &self,
        bindings: &Bindings,
        function: &str,
        arguments: JsonMap<String, JsonValue>,
    ) -> Result<JsonValue, SkyhookError> {
        let (contract, endpoint, payload) = self.prepare_call(bindings, function, &arguments)?;
        let response = self
            .invoker
            .invoke(endpoint, &payload)
            .map_err(into_transport)?;
        finish_call(contract, &response)
    }

    /// Like [`Client::call`], giving up with a timeout transport error when
    /// the invoker does not answer within `timeout`.
    ///
    /// The invoker runs on its own worker thread. On timeout that thread is
    /// detached, not cancelled: an invoker that never returns keeps one
    /// thread alive per timed-out call, so invokers should carry their own
    /// transport deadline as well.
    pub fn call_with_timeout(
        &self,
        function: &str,
        arguments: JsonMap<String, JsonValue>,
        timeout: Duration,
    ) -> Result<JsonValue, SkyhookError> {
        let bindings = self.require_active(function)?;
        let (contract, endpoint, payload) = self.prepare_call(&bindings, function, &arguments)?;

        let (tx, rx) = mpsc::channel();
        let invoker = Arc::clone(&self.invoker);
        let endpoint = endpoint.to_string();
        thread::Builder::new()
            .name(format!("skyhook-call-{function}"))
            .spawn(move || {
                let _ = tx.send(invoker.invoke(&endpoint, &payload));
            })
            .map_err(|e| worker_unavailable(function, &e))?;

        match rx.recv_timeout(timeout) {
            Ok(response) => finish_call(contract, &response.map_err(into_transport)?),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(function, ?timeout, "call timed out; detaching worker thread");
                Err(SkyhookError::transport(
                    TransportErrorKind::Timeout,
                    format!("'{function}' did not answer within {timeout:?}"),
                ))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(SkyhookError::transport(
                TransportErrorKind::Unavailable,
                format!("invoker for '{function}' stopped without answering"),
            )),
        }
    }

    /// Publishes `payload` to `message` through the active binding.
    pub fn publish(&self, message: &str, payload: &JsonValue) -> Result<(), SkyhookError> {
        let bindings = self.require_active(message)?;
        self.publish_with(&bindings, message, payload)
    }

    pub fn publish_with(
        &self,
        bindings: &Bindings,
        message: &str,
        payload: &JsonValue,
    ) -> Result<(), SkyhookError> {
        let validator = self.contract.message(message)?;
        let endpoint = bindings
            .message_endpoint(message)
            .ok_or_else(|| SkyhookError::Unbound(message.to_string()))?;
        validator.check(payload).map_err(SkyhookError::Validation)?;
        let publisher = self.publisher.as_ref().ok_or_else(|| {
            SkyhookError::Config(format!("no publisher configured for message '{message}'"))
        })?;

        let bytes = encode_message(payload)?;
        debug!(message_name = message, endpoint, "publishing message");
        publisher.publish(endpoint, &bytes).map_err(into_transport)
    }

    fn require_active(&self, name: &str) -> Result<Arc<Bindings>, SkyhookError> {
        self.active()
            .ok_or_else(|| SkyhookError::Unbound(name.to_string()))
    }

    fn prepare_call<'a>(
        &'a self,
        bindings: &'a Bindings,
        function: &str,
        arguments: &JsonMap<String, JsonValue>,
    ) -> Result<(&'a FunctionContract, &'a str, Vec<u8>), SkyhookError> {
        let contract = self.contract.function(function)?;
        let endpoint = bindings
            .function_endpoint(function)
            .ok_or_else(|| SkyhookError::Unbound(function.to_string()))?;
        contract.check_arguments(arguments)?;
        let payload = encode_arguments(arguments)?;
        debug!(function, endpoint, "invoking function");
        Ok((contract, endpoint, payload))
    }
}

fn finish_call(contract: &FunctionContract, response: &[u8]) -> Result<JsonValue, SkyhookError> {
    let value = decode_response(response)?.into_result()?;
    if contract.returns().is_none() {
        return Ok(JsonValue::Null);
    }
    contract.check_result(&value).map_err(|violation| {
        warn!(function = contract.name(), %violation, "remote result violates declared contract");
        SkyhookError::ContractViolation {
            name: contract.name().to_string(),
            violation,
        }
    })?;
    Ok(value)
}

// Invokers may report anything; only transport failures leave this module.
fn worker_unavailable(function: &str, err: &std::io::Error) -> SkyhookError {
    SkyhookError::transport(
        TransportErrorKind::Unavailable,
        format!("cannot start worker thread for '{function}': {err}"),
    )
}

fn into_transport(err: SkyhookError) -> SkyhookError {
    match err {
        SkyhookError::Transport { .. } => err,
        other => SkyhookError::transport(TransportErrorKind::Unavailable, other.to_string()),
    }
}
