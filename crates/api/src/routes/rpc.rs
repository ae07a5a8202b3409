//! Gateway: forwards operation calls to the services over the broker.

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use rpc::queues;
use rpc::{ReplyEnvelope, RequestEnvelope};

use crate::AppState;
use crate::error::ApiError;

/// Queues a gateway caller may address. Event queues are not callable.
pub const CALLABLE_QUEUES: &[&str] = &[
    queues::PATRON_SERVICE,
    queues::BORROWING_SERVICE,
    queues::BOOK_SERVICE,
    queues::BOOK_COPY_AVAILABILITY,
    queues::FINE_SERVICE,
];

/// POST /rpc/{queue}
///
/// Takes a request envelope and answers with the reply envelope.
#[tracing::instrument(skip(state, request), fields(operation = %request.requested_resolver))]
pub async fn call(
    State(state): State<Arc<AppState>>,
    Path(queue): Path<String>,
    Json(request): Json<RequestEnvelope>,
) -> Result<Json<ReplyEnvelope>, ApiError> {
    if !CALLABLE_QUEUES.contains(&queue.as_str()) {
        return Err(ApiError::NotFound(format!("no service listens on {queue}")));
    }
    let operation = request.requested_resolver.trim();
    if operation.is_empty() {
        return Err(ApiError::BadRequest("requestedResolver is empty".to_string()));
    }

    let start = Instant::now();
    let result = state
        .caller
        .call(&queue, operation, request.variables)
        .await;
    metrics::histogram!("gateway_call_duration_seconds", "queue" => queue.clone())
        .record(start.elapsed().as_secs_f64());

    Ok(Json(ReplyEnvelope::success(operation, result?)))
}
