//! Boundary payload encoding.
//!
//! Requests are a JSON object of named arguments. Responses are one of
//! `{"result": <value>}` or `{"error": {"kind": "...", "message": "..."}}`.
//! Message payloads are the bare JSON value.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::{SkyhookError, TransportErrorKind, Violation};
use crate::schema::json_type_name;

/// Failure reported by the implementing side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: String,
    pub message: String,
}

/// Decoded function response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Response {
    Result(JsonValue),
    Error(RemoteError),
}

impl Response {
    pub fn from_error(err: &SkyhookError) -> Self {
        Response::Error(RemoteError {
            kind: err.kind().to_string(),
            message: err.to_string(),
        })
    }

    /// Turns an error envelope into [`SkyhookError::Remote`].
    pub fn into_result(self) -> Result<JsonValue, SkyhookError> {
        match self {
            Response::Result(value) => Ok(value),
            Response::Error(RemoteError { kind, message }) => {
                Err(SkyhookError::Remote { kind, message })
            }
        }
    }
}

pub fn encode_arguments(arguments: &JsonMap<String, JsonValue>) -> Result<Vec<u8>, SkyhookError> {
    to_bytes(arguments)
}

/// Decodes a request; anything but a JSON object is rejected at the root.
pub fn decode_arguments(bytes: &[u8]) -> Result<JsonMap<String, JsonValue>, SkyhookError> {
    match from_bytes(bytes)? {
        JsonValue::Object(arguments) => Ok(arguments),
        other => Err(SkyhookError::Validation(Violation::new(
            Vec::new(),
            format!(
                "expected object of named arguments, found {}",
                json_type_name(&other)
            ),
        ))),
    }
}

pub fn encode_response(response: &Response) -> Result<Vec<u8>, SkyhookError> {
    to_bytes(response)
}

/// Decodes a response envelope. Bytes that are not an envelope are a
/// transport failure, never a validation one.
pub fn decode_response(bytes: &[u8]) -> Result<Response, SkyhookError> {
    serde_json::from_slice(bytes).map_err(|e| {
        SkyhookError::transport(
            TransportErrorKind::MalformedResponse,
            format!("response is not a result or error envelope: {e}"),
        )
    })
}

pub fn encode_message(payload: &JsonValue) -> Result<Vec<u8>, SkyhookError> {
    to_bytes(payload)
}

pub fn decode_message(bytes: &[u8]) -> Result<JsonValue, SkyhookError> {
    from_bytes(bytes)
}

fn to_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, SkyhookError> {
    serde_json::to_vec(value).map_err(|e| SkyhookError::Serialization(e.to_string()))
}

fn from_bytes(bytes: &[u8]) -> Result<JsonValue, SkyhookError> {
    serde_json::from_slice(bytes)
        .map_err(|e| SkyhookError::Serialization(format!("payload is not valid JSON: {e}")))
}
