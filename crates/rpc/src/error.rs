use std::time::Duration;

use broker::BrokerError;
use thiserror::Error;

/// Errors surfaced to the caller of an RPC.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The broker was unreachable or the channel failed mid-call.
    #[error("Transport error: {0}")]
    Transport(#[from] BrokerError),

    /// No matching reply arrived before the deadline.
    #[error("timeout waiting for reply from service on {queue} after {timeout:?}")]
    Timeout { queue: String, timeout: Duration },

    /// The envelope could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The reply did not carry the expected field.
    #[error("Reply is missing {0}")]
    MissingProperty(String),

    /// The handler reported an error in the reply envelope.
    #[error("{operation} failed: {message}")]
    Remote {
        operation: String,
        code: Option<String>,
        message: String,
    },

    /// The client shut down while the call was outstanding.
    #[error("RPC client closed")]
    ClientClosed,
}

impl RpcError {
    /// Returns true for [`RpcError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }
}

/// Result type for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Errors returned by operation handlers.
///
/// The dispatcher logs them and reports them to the caller in the reply's
/// `errors` array, with [`HandlerError::code`] as the error code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("Invalid argument {name}: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// A business rule refused the operation.
    #[error("{message}")]
    Rejected { code: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Argument `name` is absent.
    pub fn missing(name: &str) -> Self {
        HandlerError::InvalidArgument {
            name: name.to_string(),
            reason: "missing".to_string(),
        }
    }

    pub fn invalid(name: &str, reason: impl std::fmt::Display) -> Self {
        HandlerError::InvalidArgument {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        HandlerError::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        HandlerError::Internal(err.to_string())
    }

    /// Machine-readable error code for the reply envelope.
    pub fn code(&self) -> &str {
        match self {
            HandlerError::InvalidArgument { .. } => "BAD_USER_INPUT",
            HandlerError::NotFound(_) => "NOT_FOUND",
            HandlerError::Rejected { code, .. } => code,
            HandlerError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::Internal(format!("serialization failed: {err}"))
    }
}

impl From<RpcError> for HandlerError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Remote { code, message, .. } => HandlerError::Rejected {
                code: code.unwrap_or_else(|| "REMOTE_ERROR".to_string()),
                message,
            },
            other => HandlerError::Internal(other.to_string()),
        }
    }
}
