//! Loan and reservation workflows around the borrowing saga.

use common::{BookId, PatronId, RecordId, ReservationId};
use domain::{
    BorrowRecord, CopyStatus, LoanError, Reservation, ReservationError, ReturnedEvent,
};
use store::{LoanStore, LoanTransaction, RecordFilter, ReservationFilter};

use crate::borrowing::BorrowingSaga;
use crate::error::{Result, SagaError};
use crate::services::{BookCopyService, PatronDirectory, ReturnNotifier};

/// The borrowing service's operations.
///
/// Each mutation runs in one store transaction; `lock_*` reads make
/// concurrent renewals and returns of one record run one after the other.
/// Remote calls happen only outside a transaction.
pub struct LoanService<S, C, P, N> {
    saga: BorrowingSaga<S, C, P>,
    notifier: N,
}

impl<S, C, P, N> LoanService<S, C, P, N>
where
    S: LoanStore,
    C: BookCopyService,
    P: PatronDirectory,
    N: ReturnNotifier,
{
    pub fn new(saga: BorrowingSaga<S, C, P>, notifier: N) -> Self {
        Self { saga, notifier }
    }

    pub fn saga(&self) -> &BorrowingSaga<S, C, P> {
        &self.saga
    }

    fn store(&self) -> &S {
        self.saga.store()
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.saga.clock().now()
    }

    pub async fn borrow_book(&self, book_id: &BookId, patron_id: &PatronId) -> Result<BorrowRecord> {
        self.saga.borrow_book(book_id, patron_id).await
    }

    /// Closes a loan, then tells the book service the copy is back and the
    /// fine service that the loan ended. Both notices are best effort.
    #[tracing::instrument(skip(self))]
    pub async fn return_book(&self, record_id: RecordId) -> Result<BorrowRecord> {
        let mut tx = self.store().begin().await?;
        let mut record = tx
            .lock_record(record_id)
            .await?
            .ok_or(LoanError::NotFound(record_id))?;
        record.mark_returned(self.now())?;
        tx.update_record(&record).await?;
        tx.commit().await?;

        metrics::counter!("loan_returns_total").increment(1);
        tracing::info!(book_copy_id = %record.book_copy_id, "loan returned");

        if let Err(e) = self
            .saga
            .copies()
            .update_status(&record.book_copy_id, CopyStatus::Available)
            .await
        {
            tracing::warn!(error = %e, book_copy_id = %record.book_copy_id, "failed to release copy");
        }
        if let Some(event) = ReturnedEvent::from_record(&record)
            && let Err(e) = self.notifier.loan_returned(&event).await
        {
            tracing::warn!(error = %e, "failed to publish loan-returned event");
        }

        Ok(record)
    }

    /// Extends a loan by one loan period.
    #[tracing::instrument(skip(self))]
    pub async fn renew_loan(&self, record_id: RecordId) -> Result<BorrowRecord> {
        let result = self.renew_locked(record_id).await;
        let outcome = match &result {
            Ok(_) => "renewed",
            Err(e) => e.kind().as_str(),
        };
        metrics::counter!("loan_renewals_total", "outcome" => outcome).increment(1);
        result
    }

    async fn renew_locked(&self, record_id: RecordId) -> Result<BorrowRecord> {
        let mut tx = self.store().begin().await?;
        let mut record = tx
            .lock_record(record_id)
            .await?
            .ok_or(LoanError::NotFound(record_id))?;
        let reserved = tx.has_pending_reservation(&record.book_id).await?;
        record.renew(self.now(), &self.saga.options().policy, reserved)?;
        tx.update_record(&record).await?;
        tx.commit().await?;

        tracing::info!(
            renewal_count = record.renewal_count,
            due_date = %record.due_date,
            "loan renewed"
        );
        Ok(record)
    }

    /// Places a hold on a title that has no copy on the shelf.
    #[tracing::instrument(skip(self))]
    pub async fn reserve_book(&self, book_id: &BookId, patron_id: &PatronId) -> Result<Reservation> {
        self.saga.check_patron(patron_id).await?;
        let availability = self
            .saga
            .copies()
            .check_availability(book_id)
            .await
            .map_err(SagaError::AvailabilityCheck)?;
        if availability.is_available() {
            return Err(ReservationError::CopyAvailable(book_id.clone()).into());
        }

        let reservation = Reservation::new_pending(
            book_id.clone(),
            patron_id.clone(),
            self.now(),
            self.saga.options().policy.reservation_hold,
        );
        let mut tx = self.store().begin().await?;
        tx.insert_reservation(&reservation).await?;
        tx.commit().await?;

        tracing::info!(reservation_id = %reservation.id, "book reserved");
        Ok(reservation)
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel_reservation(&self, reservation_id: ReservationId) -> Result<Reservation> {
        let mut tx = self.store().begin().await?;
        let mut reservation = tx
            .lock_reservation(reservation_id)
            .await?
            .ok_or(ReservationError::NotFound(reservation_id))?;
        reservation.cancel()?;
        tx.update_reservation(&reservation).await?;
        tx.commit().await?;
        Ok(reservation)
    }

    /// Borrows the reserved title on the reserving patron's behalf.
    ///
    /// A reservation past its hold is marked EXPIRED and the call fails. The
    /// saga runs between two transactions, so the reservation is only marked
    /// FULFILLED once the borrow record exists. When a concurrent call
    /// fulfilled or cancelled it meanwhile, this call's borrow is undone: the
    /// record is deleted in the same transaction and the copy released.
    #[tracing::instrument(skip(self))]
    pub async fn fulfill_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<(Reservation, BorrowRecord)> {
        let mut tx = self.store().begin().await?;
        let mut reservation = tx
            .lock_reservation(reservation_id)
            .await?
            .ok_or(ReservationError::NotFound(reservation_id))?;
        if reservation.expire_if_due(self.now())? {
            tx.update_reservation(&reservation).await?;
            tx.commit().await?;
            tracing::info!("reservation expired before fulfillment");
            return Err(ReservationError::Expired(reservation_id).into());
        }
        drop(tx);

        let record = self
            .saga
            .borrow_book(&reservation.book_id, &reservation.patron_id)
            .await?;

        let mut tx = self.store().begin().await?;
        let mut reservation = tx
            .lock_reservation(reservation_id)
            .await?
            .ok_or(ReservationError::NotFound(reservation_id))?;
        if let Err(e) = reservation.fulfill(self.now()) {
            tracing::warn!(error = %e, record_id = %record.id, "reservation changed while borrowing");
            tx.delete_record(record.id).await?;
            tx.commit().await?;
            self.saga.restore_copy(&record.book_copy_id).await;
            return Err(e.into());
        }
        tx.update_reservation(&reservation).await?;
        tx.commit().await?;

        tracing::info!(record_id = %record.id, "reservation fulfilled");
        Ok((reservation, record))
    }

    /// Moves every outstanding past-due loan to OVERDUE. Returns the records
    /// that changed.
    #[tracing::instrument(skip(self))]
    pub async fn mark_overdue(&self) -> Result<Vec<BorrowRecord>> {
        let now = self.now();
        let mut tx = self.store().begin().await?;
        let mut changed = Vec::new();
        for mut record in tx.lock_past_due(now).await? {
            if record.mark_overdue(now)? {
                tx.update_record(&record).await?;
                changed.push(record);
            }
        }
        tx.commit().await?;

        if !changed.is_empty() {
            tracing::info!(count = changed.len(), "loans marked overdue");
        }
        Ok(changed)
    }

    pub async fn get_record(&self, record_id: RecordId) -> Result<BorrowRecord> {
        self.store()
            .get_record(record_id)
            .await?
            .ok_or_else(|| LoanError::NotFound(record_id).into())
    }

    pub async fn records(&self, filter: &RecordFilter) -> Result<Vec<BorrowRecord>> {
        Ok(self.store().list_records(filter).await?)
    }

    pub async fn reservations(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>> {
        Ok(self.store().list_reservations(filter).await?)
    }
}
