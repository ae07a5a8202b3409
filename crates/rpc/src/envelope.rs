//! Wire format of requests and replies.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{HandlerError, Result, RpcError};

/// Content type of every envelope.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Named arguments of an operation, in insertion order.
pub type Arguments = Map<String, Value>;

/// Builds an argument bag from a JSON object literal.
///
/// Anything other than an object yields an empty bag.
pub fn arguments(value: Value) -> Arguments {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Token matching a reply to the request that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generates a new random correlation id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a correlation id from message properties.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `{"variables": {...}, "requestedResolver": "<operation>"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    #[serde(default)]
    pub variables: Arguments,
    pub requested_resolver: String,
}

impl RequestEnvelope {
    pub fn new(operation: impl Into<String>, variables: Arguments) -> Self {
        Self {
            variables,
            requested_resolver: operation.into(),
        }
    }

    pub fn operation(&self) -> &str {
        &self.requested_resolver
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// One entry of a reply's `errors` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// `{"data": {"<operation>": <result-or-null>}}`, plus `errors` when the
/// handler failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ReplyError>,
}

impl ReplyEnvelope {
    /// A reply carrying the handler's result.
    pub fn success(operation: &str, result: Value) -> Self {
        let mut data = Map::new();
        data.insert(operation.to_string(), result);
        Self {
            data,
            errors: Vec::new(),
        }
    }

    /// A null-result reply describing a handler failure.
    pub fn failure(operation: &str, err: &HandlerError) -> Self {
        let mut reply = Self::success(operation, Value::Null);
        reply.errors.push(ReplyError {
            message: err.to_string(),
            code: Some(err.code().to_string()),
        });
        reply
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Extracts the result of `operation`, or the first reported error.
    pub fn into_result(mut self, operation: &str) -> Result<Value> {
        if let Some(first) = self.errors.into_iter().next() {
            return Err(RpcError::Remote {
                operation: operation.to_string(),
                code: first.code,
                message: first.message,
            });
        }
        self.data
            .remove(operation)
            .ok_or_else(|| RpcError::MissingProperty(format!("data.{operation}")))
    }
}

/// Deserializes an operation result into a typed value.
pub fn decode_result<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}
