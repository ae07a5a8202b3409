//! The borrowing saga.
//!
//! A patron standing check, then three causally dependent steps with no
//! shared transaction:
//!
//! 1. ask the book service for an available copy (RPC)
//! 2. ask it to mark that copy Borrowed (fire-and-forget publish)
//! 3. insert the ACTIVE borrow record in a local transaction
//!
//! If step 3 fails after step 2 went out, the copy stays Borrowed with no
//! record unless [`SagaOptions::compensate_on_record_failure`] is set.
//!
//! Step 2 lands asynchronously, so step 1 can hand the same copy to two
//! sagas. The store refuses a second outstanding record for one copy and the
//! later saga fails with [`SagaError::NotAvailable`].

use std::time::Instant;

use common::{BookCopyId, BookId, PatronId, SharedClock};
use domain::{BorrowRecord, CopyStatus, LoanPolicy};
use store::{LoanStore, LoanTransaction, StoreError};

use crate::error::{Result, SagaError};
use crate::services::{BookCopyService, PatronDirectory};

pub const SAGA_TYPE: &str = "BorrowBook";

pub const STEP_CHECK_PATRON: &str = "check_patron";
pub const STEP_CHECK_AVAILABILITY: &str = "check_availability";
pub const STEP_MARK_BORROWED: &str = "mark_borrowed";
pub const STEP_INSERT_RECORD: &str = "insert_record";

/// What a failed step 2 does to the saga.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusUpdatePolicy {
    /// The saga aborts and no record is written.
    #[default]
    Required,
    /// The failure is logged and the record is written anyway.
    BestEffort,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SagaOptions {
    pub policy: LoanPolicy,
    pub status_update: StatusUpdatePolicy,
    /// Publish an `Available` update when step 3 fails after step 2.
    pub compensate_on_record_failure: bool,
}

/// Orchestrates `BorrowBook`.
pub struct BorrowingSaga<S, C, P> {
    store: S,
    copies: C,
    patrons: P,
    clock: SharedClock,
    options: SagaOptions,
}

impl<S, C, P> BorrowingSaga<S, C, P>
where
    S: LoanStore,
    C: BookCopyService,
    P: PatronDirectory,
{
    pub fn new(store: S, copies: C, patrons: P, clock: SharedClock, options: SagaOptions) -> Self {
        Self {
            store,
            copies,
            patrons,
            clock,
            options,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn copies(&self) -> &C {
        &self.copies
    }

    /// Fails unless `patron_id` exists and may borrow.
    pub async fn check_patron(&self, patron_id: &PatronId) -> Result<()> {
        let standing = self
            .patrons
            .standing(patron_id)
            .await
            .map_err(SagaError::PatronCheck)?
            .ok_or_else(|| SagaError::UnknownPatron(patron_id.clone()))?;
        if !standing.may_borrow() {
            return Err(SagaError::PatronNotEligible {
                patron_id: patron_id.clone(),
                standing,
            });
        }
        Ok(())
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn options(&self) -> &SagaOptions {
        &self.options
    }

    /// Lends a copy of `book_id` to `patron_id`.
    ///
    /// Returns the new ACTIVE record, or the first failing step's error.
    #[tracing::instrument(skip(self), fields(saga_type = SAGA_TYPE, %book_id, %patron_id))]
    pub async fn borrow_book(&self, book_id: &BookId, patron_id: &PatronId) -> Result<BorrowRecord> {
        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = Instant::now();

        let result = self.execute(book_id, patron_id).await;

        metrics::histogram!("saga_duration_seconds").record(saga_start.elapsed().as_secs_f64());
        match &result {
            Ok(record) => {
                metrics::counter!("saga_completed").increment(1);
                tracing::info!(record_id = %record.id, book_copy_id = %record.book_copy_id, "book borrowed");
            }
            Err(e) => {
                metrics::counter!("saga_failed", "kind" => e.kind().as_str()).increment(1);
                tracing::warn!(error = %e, step = e.step(), "borrow saga failed");
            }
        }
        result
    }

    async fn execute(&self, book_id: &BookId, patron_id: &PatronId) -> Result<BorrowRecord> {
        tracing::debug!(step = STEP_CHECK_PATRON, "saga step started");
        self.check_patron(patron_id).await?;

        tracing::debug!(step = STEP_CHECK_AVAILABILITY, "saga step started");
        let availability = self
            .copies
            .check_availability(book_id)
            .await
            .map_err(SagaError::AvailabilityCheck)?;
        if !availability.is_available() {
            return Err(SagaError::NotAvailable(book_id.clone()));
        }
        let copy_id = availability.book_copy_id;

        tracing::debug!(step = STEP_MARK_BORROWED, %copy_id, "saga step started");
        let marked = match self.copies.update_status(&copy_id, CopyStatus::Borrowed).await {
            Ok(()) => true,
            Err(e) => match self.options.status_update {
                StatusUpdatePolicy::Required => return Err(SagaError::StatusUpdate(e)),
                StatusUpdatePolicy::BestEffort => {
                    tracing::warn!(error = %e, %copy_id, "copy status update failed, continuing");
                    false
                }
            },
        };

        tracing::debug!(step = STEP_INSERT_RECORD, "saga step started");
        let record = BorrowRecord::new_active(
            book_id.clone(),
            patron_id.clone(),
            copy_id.clone(),
            self.clock.now(),
            &self.options.policy,
        );
        match self.insert(&record).await {
            Ok(()) => Ok(record),
            // The copy belongs to the loan that holds it; leave its status alone.
            Err(StoreError::CopyOnLoan(_)) => {
                tracing::info!(%copy_id, "copy already on loan, status update lagging");
                Err(SagaError::NotAvailable(book_id.clone()))
            }
            Err(e) => {
                if marked {
                    self.release_copy(&copy_id).await;
                }
                Err(SagaError::RecordInsert(e))
            }
        }
    }

    /// Publishes an `Available` update for a copy a failed borrow left
    /// Borrowed. Failures are logged.
    pub async fn restore_copy(&self, copy_id: &BookCopyId) {
        match self.copies.update_status(copy_id, CopyStatus::Available).await {
            Ok(()) => tracing::info!(%copy_id, "compensated copy status"),
            Err(e) => tracing::error!(error = %e, %copy_id, "compensation failed"),
        }
    }

    async fn insert(&self, record: &BorrowRecord) -> std::result::Result<(), StoreError> {
        let mut tx = self.store.begin().await?;
        tx.insert_record(record).await?;
        tx.commit().await
    }

    async fn release_copy(&self, copy_id: &BookCopyId) {
        if !self.options.compensate_on_record_failure {
            tracing::error!(%copy_id, "copy marked Borrowed without a borrow record");
            return;
        }
        self.restore_copy(copy_id).await;
    }
}
