//! Operation handlers for the platform's services.
//!
//! Each module builds the [`HandlerRegistry`](rpc::HandlerRegistry) for every
//! queue its service consumes. A queue only answers the operations meant for
//! it:
//! - [`book`]: catalogue, availability checks and copy status updates
//! - [`patron`]: patrons, standing and violation records
//! - [`borrowing`]: the loan service behind the borrowing saga
//! - [`fine`]: late-return fines

pub mod book;
pub mod borrowing;
pub mod fine;
pub mod patron;

use std::future::Future;
use std::sync::Arc;

use rpc::{Arguments, HandlerError, HandlerRegistry};
use serde::Serialize;
use serde_json::Value;
use store::StoreError;

/// One registry per consumed queue.
pub type QueueHandlers = Vec<(&'static str, HandlerRegistry)>;

/// Registers `handler` for `operation`, handing it a shared service.
pub(crate) fn route<T, F, Fut>(
    registry: &mut HandlerRegistry,
    operation: &str,
    service: &Arc<T>,
    handler: F,
) where
    T: Send + Sync + 'static,
    F: Fn(Arc<T>, Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    let service = Arc::clone(service);
    registry.register_fn(operation, move |arguments| {
        handler(Arc::clone(&service), arguments)
    });
}

pub(crate) fn to_json(value: impl Serialize) -> Result<Value, HandlerError> {
    Ok(serde_json::to_value(value)?)
}

/// Maps a store failure onto the handler error the caller sees.
pub(crate) fn store_error(err: StoreError) -> HandlerError {
    match err {
        StoreError::NotFound(what) => HandlerError::NotFound(what),
        StoreError::Duplicate(what) => HandlerError::rejected("DUPLICATE", what),
        err @ StoreError::InvalidCopyTransition { .. } => {
            HandlerError::rejected("INVALID_TRANSITION", err.to_string())
        }
        other => HandlerError::internal(other),
    }
}
