//! Typed access to an operation's argument bag.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{Arguments, HandlerError};

/// Returns a required string argument.
pub fn required_str<'a>(args: &'a Arguments, name: &str) -> Result<&'a str, HandlerError> {
    match args.get(name) {
        Some(Value::String(s)) => Ok(s),
        Some(Value::Null) | None => Err(HandlerError::missing(name)),
        Some(_) => Err(HandlerError::invalid(name, "expected a string")),
    }
}

/// Returns an optional string argument; `null` counts as absent.
pub fn optional_str<'a>(args: &'a Arguments, name: &str) -> Result<Option<&'a str>, HandlerError> {
    match args.get(name) {
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(HandlerError::invalid(name, "expected a string")),
    }
}

/// Deserializes a required argument.
pub fn required<T: DeserializeOwned>(args: &Arguments, name: &str) -> Result<T, HandlerError> {
    match args.get(name) {
        Some(Value::Null) | None => Err(HandlerError::missing(name)),
        Some(value) => {
            serde_json::from_value(value.clone()).map_err(|e| HandlerError::invalid(name, e))
        }
    }
}

/// Deserializes an optional argument; `null` counts as absent.
pub fn optional<T: DeserializeOwned>(args: &Arguments, name: &str) -> Result<Option<T>, HandlerError> {
    match args.get(name) {
        Some(Value::Null) | None => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| HandlerError::invalid(name, e)),
    }
}
