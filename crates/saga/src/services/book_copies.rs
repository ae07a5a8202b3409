//! The book service as seen from the borrowing saga.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::{BookCopyId, BookId};
use domain::{Availability, CopyStatus};
use rpc::queues::{self, operations};
use rpc::{BrokerError, RpcCaller, RpcError, arguments, decode_result};
use serde_json::json;

/// Remote copy-availability operations.
#[async_trait]
pub trait BookCopyService: Send + Sync {
    /// Asks for an available copy of `book_id` and waits for the answer.
    async fn check_availability(&self, book_id: &BookId) -> Result<Availability, RpcError>;

    /// Requests a copy status change. Resolves once the request is handed to
    /// the broker; the book service applies it later.
    async fn update_status(&self, copy_id: &BookCopyId, status: CopyStatus)
    -> Result<(), RpcError>;
}

/// [`BookCopyService`] over the RPC bridge.
#[derive(Clone)]
pub struct RpcBookCopyService {
    caller: Arc<dyn RpcCaller>,
}

impl RpcBookCopyService {
    pub fn new(caller: Arc<dyn RpcCaller>) -> Self {
        Self { caller }
    }
}

#[async_trait]
impl BookCopyService for RpcBookCopyService {
    async fn check_availability(&self, book_id: &BookId) -> Result<Availability, RpcError> {
        let result = self
            .caller
            .call(
                queues::BOOK_COPY_AVAILABILITY,
                operations::CHECK_AVAILABILITY,
                arguments(json!({ "book_id": book_id })),
            )
            .await?;
        decode_result(result)
    }

    async fn update_status(
        &self,
        copy_id: &BookCopyId,
        status: CopyStatus,
    ) -> Result<(), RpcError> {
        self.caller
            .publish(
                queues::BOOK_COPY_UPDATES,
                operations::UPDATE_BOOK_COPY_STATUS,
                arguments(json!({ "id": copy_id, "status": status })),
            )
            .await
    }
}

#[derive(Debug, Default)]
struct InMemoryCopiesState {
    copies: HashMap<BookCopyId, (BookId, CopyStatus)>,
    updates: Vec<(BookCopyId, CopyStatus)>,
    fail_on_check: bool,
    fail_on_update: bool,
    lagging: bool,
}

/// In-memory book service for testing.
///
/// Status updates apply immediately unless [`set_lagging`](Self::set_lagging)
/// is on.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBookCopyService {
    state: Arc<Mutex<InMemoryCopiesState>>,
}

impl InMemoryBookCopyService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryCopiesState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shelves an Available copy.
    pub fn add_copy(&self, book_id: impl Into<BookId>, copy_id: impl Into<BookCopyId>) {
        self.lock()
            .copies
            .insert(copy_id.into(), (book_id.into(), CopyStatus::Available));
    }

    pub fn status_of(&self, copy_id: &BookCopyId) -> Option<CopyStatus> {
        self.lock().copies.get(copy_id).map(|(_, status)| *status)
    }

    /// Every status update received, in order.
    pub fn updates(&self) -> Vec<(BookCopyId, CopyStatus)> {
        self.lock().updates.clone()
    }

    /// Makes availability checks fail with a timeout.
    pub fn set_fail_on_check(&self, fail: bool) {
        self.lock().fail_on_check = fail;
    }

    /// Makes status updates fail with a transport error.
    pub fn set_fail_on_update(&self, fail: bool) {
        self.lock().fail_on_update = fail;
    }

    /// Accepts status updates without applying them, like a consumer that
    /// has fallen behind.
    pub fn set_lagging(&self, lagging: bool) {
        self.lock().lagging = lagging;
    }
}

#[async_trait]
impl BookCopyService for InMemoryBookCopyService {
    async fn check_availability(&self, book_id: &BookId) -> Result<Availability, RpcError> {
        let state = self.lock();
        if state.fail_on_check {
            return Err(RpcError::Timeout {
                queue: queues::BOOK_COPY_AVAILABILITY.to_string(),
                timeout: rpc::DEFAULT_TIMEOUT,
            });
        }

        let copy = state
            .copies
            .iter()
            .filter(|(_, (book, status))| book == book_id && *status == CopyStatus::Available)
            .map(|(id, _)| id)
            .min();
        Ok(match copy {
            Some(id) => Availability::available(id.clone()),
            None => Availability::unavailable(),
        })
    }

    async fn update_status(
        &self,
        copy_id: &BookCopyId,
        status: CopyStatus,
    ) -> Result<(), RpcError> {
        let mut state = self.lock();
        if state.fail_on_update {
            return Err(RpcError::Transport(BrokerError::ConnectionClosed));
        }
        state.updates.push((copy_id.clone(), status));
        if state.lagging {
            return Ok(());
        }
        if let Some((_, current)) = state.copies.get_mut(copy_id) {
            *current = status;
        }
        Ok(())
    }
}
