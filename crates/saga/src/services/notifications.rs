//! Loan-returned notifications for the fine service.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use domain::ReturnedEvent;
use rpc::queues::{self, operations};
use rpc::{RpcCaller, RpcError, arguments};

#[async_trait]
pub trait ReturnNotifier: Send + Sync {
    /// Announces a closed loan. Fire-and-forget.
    async fn loan_returned(&self, event: &ReturnedEvent) -> Result<(), RpcError>;
}

/// Publishes [`ReturnedEvent`]s to the `borrowing.returned` queue.
#[derive(Clone)]
pub struct RpcReturnNotifier {
    caller: Arc<dyn RpcCaller>,
}

impl RpcReturnNotifier {
    pub fn new(caller: Arc<dyn RpcCaller>) -> Self {
        Self { caller }
    }
}

#[async_trait]
impl ReturnNotifier for RpcReturnNotifier {
    async fn loan_returned(&self, event: &ReturnedEvent) -> Result<(), RpcError> {
        let payload = serde_json::to_value(event)?;
        self.caller
            .publish(
                queues::BORROWING_RETURNED,
                operations::LOAN_RETURNED,
                arguments(payload),
            )
            .await
    }
}

/// Records events instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReturnNotifier {
    events: Arc<Mutex<Vec<ReturnedEvent>>>,
}

impl InMemoryReturnNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReturnedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ReturnNotifier for InMemoryReturnNotifier {
    async fn loan_returned(&self, event: &ReturnedEvent) -> Result<(), RpcError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}
