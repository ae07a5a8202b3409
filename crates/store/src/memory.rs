//! In-memory stores for tests and single-process deployments.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookCopyId, BookId, RecordId, ReservationId};
use domain::{Book, BookCopy, BorrowRecord, CopyStatus, Reservation};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    BookCopyStore, LoanStore, LoanTransaction, RecordFilter, ReservationFilter, Result,
    StoreError,
};

#[derive(Debug, Clone, Default)]
struct LoanTables {
    records: HashMap<RecordId, BorrowRecord>,
    reservations: HashMap<ReservationId, Reservation>,
}

/// In-memory loan store.
///
/// One transaction runs at a time: `begin` takes the store-wide lock and the
/// transaction works on a copy of the tables that replaces the originals on
/// commit. That is coarser than row locking but gives the same guarantee
/// that two writers on one record never interleave.
#[derive(Clone, Default)]
pub struct InMemoryLoanStore {
    tables: Arc<Mutex<LoanTables>>,
    fail_on_insert: Arc<AtomicBool>,
}

impl InMemoryLoanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `insert_record` fail, for exercising rollback paths.
    pub fn set_fail_on_insert(&self, fail: bool) {
        self.fail_on_insert.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of borrow records stored.
    pub async fn record_count(&self) -> usize {
        self.tables.lock().await.records.len()
    }
}

#[async_trait]
impl LoanStore for InMemoryLoanStore {
    type Tx = InMemoryLoanTransaction;

    async fn begin(&self) -> Result<InMemoryLoanTransaction> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = (*guard).clone();
        Ok(InMemoryLoanTransaction {
            guard,
            working,
            fail_on_insert: self.fail_on_insert.load(Ordering::SeqCst),
        })
    }

    async fn get_record(&self, id: RecordId) -> Result<Option<BorrowRecord>> {
        Ok(self.tables.lock().await.records.get(&id).cloned())
    }

    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<BorrowRecord>> {
        let tables = self.tables.lock().await;
        let mut records: Vec<BorrowRecord> = tables
            .records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.borrowed_at);
        Ok(records)
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>> {
        Ok(self.tables.lock().await.reservations.get(&id).cloned())
    }

    async fn list_reservations(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>> {
        let tables = self.tables.lock().await;
        let mut reservations: Vec<Reservation> = tables
            .reservations
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        reservations.sort_by_key(|r| r.reserved_at);
        Ok(reservations)
    }
}

/// Transaction on an [`InMemoryLoanStore`].
pub struct InMemoryLoanTransaction {
    guard: OwnedMutexGuard<LoanTables>,
    working: LoanTables,
    fail_on_insert: bool,
}

#[async_trait]
impl LoanTransaction for InMemoryLoanTransaction {
    async fn insert_record(&mut self, record: &BorrowRecord) -> Result<()> {
        if self.fail_on_insert {
            return Err(StoreError::Unavailable("insert rejected".to_string()));
        }
        if self.working.records.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id.to_string()));
        }
        let on_loan = self.working.records.values().any(|r| {
            r.book_copy_id == record.book_copy_id && r.status.is_outstanding()
        });
        if record.status.is_outstanding() && on_loan {
            return Err(StoreError::CopyOnLoan(record.book_copy_id.clone()));
        }
        self.working.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn delete_record(&mut self, id: RecordId) -> Result<()> {
        self.working
            .records
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn lock_record(&mut self, id: RecordId) -> Result<Option<BorrowRecord>> {
        Ok(self.working.records.get(&id).cloned())
    }

    async fn lock_past_due(&mut self, now: DateTime<Utc>) -> Result<Vec<BorrowRecord>> {
        let mut due: Vec<BorrowRecord> = self
            .working
            .records
            .values()
            .filter(|r| r.is_overdue_at(now))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.due_date);
        Ok(due)
    }

    async fn update_record(&mut self, record: &BorrowRecord) -> Result<()> {
        match self.working.records.get_mut(&record.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(record.id.to_string())),
        }
    }

    async fn has_pending_reservation(&mut self, book_id: &BookId) -> Result<bool> {
        Ok(self
            .working
            .reservations
            .values()
            .any(|r| r.book_id == *book_id && r.is_pending()))
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        if self.working.reservations.contains_key(&reservation.id) {
            return Err(StoreError::Duplicate(reservation.id.to_string()));
        }
        self.working
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn lock_reservation(&mut self, id: ReservationId) -> Result<Option<Reservation>> {
        Ok(self.working.reservations.get(&id).cloned())
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        match self.working.reservations.get_mut(&reservation.id) {
            Some(slot) => {
                *slot = reservation.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(reservation.id.to_string())),
        }
    }

    async fn commit(mut self) -> Result<()> {
        *self.guard = std::mem::take(&mut self.working);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Catalogue {
    books: BTreeMap<BookId, Book>,
    copies: BTreeMap<u64, BookCopy>,
}

/// In-memory book catalogue. Copy ids are sequential numbers starting at 1.
#[derive(Clone, Default)]
pub struct InMemoryBookCopyStore {
    catalogue: Arc<RwLock<Catalogue>>,
    next_copy: Arc<AtomicU64>,
}

impl InMemoryBookCopyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn copy_key(id: &BookCopyId) -> Option<u64> {
    id.as_str().parse().ok()
}

#[async_trait]
impl BookCopyStore for InMemoryBookCopyStore {
    async fn add_book(&self, book: &Book, copies: u32) -> Result<Vec<BookCopy>> {
        let mut catalogue = self.catalogue.write().await;
        if catalogue.books.contains_key(&book.id) {
            return Err(StoreError::Duplicate(book.id.to_string()));
        }
        catalogue.books.insert(book.id.clone(), book.clone());

        let mut added = Vec::with_capacity(copies as usize);
        for _ in 0..copies {
            let key = self.next_copy.fetch_add(1, Ordering::Relaxed) + 1;
            let copy = BookCopy {
                id: BookCopyId::new(key.to_string()),
                book_id: book.id.clone(),
                status: CopyStatus::Available,
            };
            catalogue.copies.insert(key, copy.clone());
            added.push(copy);
        }
        Ok(added)
    }

    async fn get_book(&self, id: &BookId) -> Result<Option<Book>> {
        Ok(self.catalogue.read().await.books.get(id).cloned())
    }

    async fn list_books(&self) -> Result<Vec<Book>> {
        Ok(self.catalogue.read().await.books.values().cloned().collect())
    }

    async fn copies_of(&self, book_id: &BookId) -> Result<Vec<BookCopy>> {
        Ok(self
            .catalogue
            .read()
            .await
            .copies
            .values()
            .filter(|c| c.book_id == *book_id)
            .cloned()
            .collect())
    }

    async fn get_copy(&self, id: &BookCopyId) -> Result<Option<BookCopy>> {
        let Some(key) = copy_key(id) else {
            return Ok(None);
        };
        Ok(self.catalogue.read().await.copies.get(&key).cloned())
    }

    async fn find_available_copy(&self, book_id: &BookId) -> Result<Option<BookCopy>> {
        Ok(self
            .catalogue
            .read()
            .await
            .copies
            .values()
            .find(|c| c.book_id == *book_id && c.status == CopyStatus::Available)
            .cloned())
    }

    async fn update_copy_status(&self, id: &BookCopyId, status: CopyStatus) -> Result<BookCopy> {
        let mut catalogue = self.catalogue.write().await;
        let copy = copy_key(id)
            .and_then(|key| catalogue.copies.get_mut(&key))
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if !copy.status.can_transition_to(status) {
            return Err(StoreError::InvalidCopyTransition {
                id: id.clone(),
                from: copy.status,
                to: status,
            });
        }
        copy.status = status;
        Ok(copy.clone())
    }
}
