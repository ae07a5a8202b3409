use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookId, PatronId, RecordId, ReservationId};
use domain::{BorrowRecord, BorrowStatus, Reservation, ReservationStatus};

use crate::Result;

/// Which borrow records to list. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub patron_id: Option<PatronId>,
    pub book_id: Option<BookId>,
    pub status: Option<BorrowStatus>,
}

impl RecordFilter {
    pub fn patron(patron_id: PatronId) -> Self {
        Self {
            patron_id: Some(patron_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &BorrowRecord) -> bool {
        self.patron_id.as_ref().is_none_or(|p| *p == record.patron_id)
            && self.book_id.as_ref().is_none_or(|b| *b == record.book_id)
            && self.status.is_none_or(|s| s == record.status)
    }
}

/// Which reservations to list. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub patron_id: Option<PatronId>,
    pub book_id: Option<BookId>,
    pub status: Option<ReservationStatus>,
}

impl ReservationFilter {
    pub fn matches(&self, reservation: &Reservation) -> bool {
        self.patron_id
            .as_ref()
            .is_none_or(|p| *p == reservation.patron_id)
            && self.book_id.as_ref().is_none_or(|b| *b == reservation.book_id)
            && self.status.is_none_or(|s| s == reservation.status)
    }
}

/// Store of borrow records and reservations.
///
/// Reads on the store itself are snapshot reads. Every mutation goes through
/// a [`LoanTransaction`].
#[async_trait]
pub trait LoanStore: Send + Sync {
    type Tx: LoanTransaction;

    /// Starts a transaction.
    async fn begin(&self) -> Result<Self::Tx>;

    async fn get_record(&self, id: RecordId) -> Result<Option<BorrowRecord>>;

    /// Lists records matching `filter`, oldest first.
    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<BorrowRecord>>;

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>>;

    /// Lists reservations matching `filter`, oldest first.
    async fn list_reservations(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>>;
}

/// A unit of work against a [`LoanStore`].
///
/// Dropping the transaction without calling [`commit`](Self::commit) rolls it
/// back. `lock_*` reads hold the row until the transaction ends, so two
/// transactions renewing or returning the same record run one after the other.
#[async_trait]
pub trait LoanTransaction: Send {
    /// Fails with [`StoreError::CopyOnLoan`](crate::StoreError::CopyOnLoan)
    /// while another outstanding record holds the same copy.
    async fn insert_record(&mut self, record: &BorrowRecord) -> Result<()>;

    /// Removes a record, for undoing a borrow that lost a race.
    async fn delete_record(&mut self, id: RecordId) -> Result<()>;

    /// Reads a record and locks it for update.
    async fn lock_record(&mut self, id: RecordId) -> Result<Option<BorrowRecord>>;

    /// Locks every outstanding record due before `now`.
    async fn lock_past_due(&mut self, now: DateTime<Utc>) -> Result<Vec<BorrowRecord>>;

    async fn update_record(&mut self, record: &BorrowRecord) -> Result<()>;

    /// Returns true if any PENDING reservation targets `book_id`.
    async fn has_pending_reservation(&mut self, book_id: &BookId) -> Result<bool>;

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()>;

    /// Reads a reservation and locks it for update.
    async fn lock_reservation(&mut self, id: ReservationId) -> Result<Option<Reservation>>;

    async fn update_reservation(&mut self, reservation: &Reservation) -> Result<()>;

    async fn commit(self) -> Result<()>;
}
