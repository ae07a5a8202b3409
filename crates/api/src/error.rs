//! API error types with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use broker::BrokerError;
use rpc::{ReplyEnvelope, ReplyError, RpcError};
use store::StoreError;
use thiserror::Error;

/// Errors returned by the HTTP gateway.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Rpc(RpcError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Rpc(RpcError::Remote {
                operation,
                code,
                message,
            }) => {
                // The caller gets the reply envelope the service sent.
                let mut reply = ReplyEnvelope::success(operation, serde_json::Value::Null);
                reply.errors.push(ReplyError {
                    message: message.clone(),
                    code: code.clone(),
                });
                return (StatusCode::UNPROCESSABLE_ENTITY, Json(reply)).into_response();
            }
            ApiError::Rpc(_) => StatusCode::BAD_GATEWAY,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, %status, "gateway call failed");
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Errors that stop a node from starting.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
