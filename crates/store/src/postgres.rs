//! PostgreSQL-backed stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookCopyId, BookId, PatronId, RecordId, ReservationId};
use domain::{Book, BookCopy, BorrowRecord, CopyStatus, Reservation};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    BookCopyStore, LoanStore, LoanTransaction, RecordFilter, ReservationFilter, Result,
    StoreError,
};

const RECORD_COLUMNS: &str = "id, book_id, patron_id, borrowed_at, due_date, returned_at, \
     previous_due_date, renewal_count, status, book_copy_id";

const RESERVATION_COLUMNS: &str = "id, book_id, patron_id, reserved_at, expires_at, status";

/// Connects a pool and runs the migrations.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPool::connect(database_url).await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;
    Ok(pool)
}

fn row_to_record(row: &PgRow) -> Result<BorrowRecord> {
    let status: String = row.try_get("status")?;
    let renewal_count: i32 = row.try_get("renewal_count")?;
    Ok(BorrowRecord {
        id: RecordId::from_uuid(row.try_get::<Uuid, _>("id")?),
        book_id: BookId::new(row.try_get::<String, _>("book_id")?),
        patron_id: PatronId::new(row.try_get::<String, _>("patron_id")?),
        borrowed_at: row.try_get("borrowed_at")?,
        due_date: row.try_get("due_date")?,
        returned_at: row.try_get("returned_at")?,
        previous_due_date: row.try_get("previous_due_date")?,
        renewal_count: renewal_count.max(0) as u32,
        status: status.parse()?,
        book_copy_id: BookCopyId::new(row.try_get::<String, _>("book_copy_id")?),
    })
}

fn row_to_reservation(row: &PgRow) -> Result<Reservation> {
    let status: String = row.try_get("status")?;
    Ok(Reservation {
        id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
        book_id: BookId::new(row.try_get::<String, _>("book_id")?),
        patron_id: PatronId::new(row.try_get::<String, _>("patron_id")?),
        reserved_at: row.try_get("reserved_at")?,
        expires_at: row.try_get("expires_at")?,
        status: status.parse()?,
    })
}

/// Partial unique index over outstanding records' copies.
const COPY_ON_LOAN_INDEX: &str = "uq_borrow_records_copy_outstanding";

fn violates(err: &sqlx::Error, constraint: &str) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.constraint() == Some(constraint))
}

fn map_unique_violation(err: sqlx::Error, key: String) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.is_unique_violation()
    {
        return StoreError::Duplicate(key);
    }
    StoreError::Database(err)
}

/// PostgreSQL loan store.
#[derive(Clone)]
pub struct PostgresLoanStore {
    pool: PgPool,
}

impl PostgresLoanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LoanStore for PostgresLoanStore {
    type Tx = PostgresLoanTransaction;

    async fn begin(&self) -> Result<PostgresLoanTransaction> {
        Ok(PostgresLoanTransaction {
            tx: self.pool.begin().await?,
        })
    }

    async fn get_record(&self, id: RecordId) -> Result<Option<BorrowRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM borrow_records WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<BorrowRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM borrow_records \
             WHERE ($1::text IS NULL OR patron_id = $1) \
               AND ($2::text IS NULL OR book_id = $2) \
               AND ($3::text IS NULL OR status = $3) \
             ORDER BY borrowed_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.patron_id.as_ref().map(|p| p.as_str()))
            .bind(filter.book_id.as_ref().map(|b| b.as_str()))
            .bind(filter.status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>> {
        let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_reservation).transpose()
    }

    async fn list_reservations(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE ($1::text IS NULL OR patron_id = $1) \
               AND ($2::text IS NULL OR book_id = $2) \
               AND ($3::text IS NULL OR status = $3) \
             ORDER BY reserved_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.patron_id.as_ref().map(|p| p.as_str()))
            .bind(filter.book_id.as_ref().map(|b| b.as_str()))
            .bind(filter.status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_reservation).collect()
    }
}

/// Transaction on a [`PostgresLoanStore`]. Rolls back on drop.
pub struct PostgresLoanTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LoanTransaction for PostgresLoanTransaction {
    async fn insert_record(&mut self, record: &BorrowRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO borrow_records
                (id, book_id, patron_id, borrowed_at, due_date, returned_at,
                 previous_due_date, renewal_count, status, book_copy_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.book_id.as_str())
        .bind(record.patron_id.as_str())
        .bind(record.borrowed_at)
        .bind(record.due_date)
        .bind(record.returned_at)
        .bind(record.previous_due_date)
        .bind(record.renewal_count as i32)
        .bind(record.status.as_str())
        .bind(record.book_copy_id.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if violates(&e, COPY_ON_LOAN_INDEX) {
                StoreError::CopyOnLoan(record.book_copy_id.clone())
            } else {
                map_unique_violation(e, record.id.to_string())
            }
        })?;
        Ok(())
    }

    async fn delete_record(&mut self, id: RecordId) -> Result<()> {
        let result = sqlx::query("DELETE FROM borrow_records WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn lock_record(&mut self, id: RecordId) -> Result<Option<BorrowRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM borrow_records WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn lock_past_due(&mut self, now: DateTime<Utc>) -> Result<Vec<BorrowRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM borrow_records \
             WHERE status <> 'RETURNED' AND due_date < $1 \
             ORDER BY due_date ASC FOR UPDATE"
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn update_record(&mut self, record: &BorrowRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE borrow_records
            SET due_date = $2, returned_at = $3, previous_due_date = $4,
                renewal_count = $5, status = $6
            WHERE id = $1
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.due_date)
        .bind(record.returned_at)
        .bind(record.previous_due_date)
        .bind(record.renewal_count as i32)
        .bind(record.status.as_str())
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(record.id.to_string()));
        }
        Ok(())
    }

    async fn has_pending_reservation(&mut self, book_id: &BookId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM reservations WHERE book_id = $1 AND status = 'PENDING')",
        )
        .bind(book_id.as_str())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reservations (id, book_id, patron_id, reserved_at, expires_at, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.book_id.as_str())
        .bind(reservation.patron_id.as_str())
        .bind(reservation.reserved_at)
        .bind(reservation.expires_at)
        .bind(reservation.status.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_unique_violation(e, reservation.id.to_string()))?;
        Ok(())
    }

    async fn lock_reservation(&mut self, id: ReservationId) -> Result<Option<Reservation>> {
        let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(row_to_reservation).transpose()
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        let result = sqlx::query("UPDATE reservations SET status = $2 WHERE id = $1")
            .bind(reservation.id.as_uuid())
            .bind(reservation.status.as_str())
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(reservation.id.to_string()));
        }
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// PostgreSQL book catalogue.
#[derive(Clone)]
pub struct PostgresBookCopyStore {
    pool: PgPool,
}

impl PostgresBookCopyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_book(row: &PgRow) -> Result<Book> {
    Ok(Book {
        id: BookId::new(row.try_get::<String, _>("id")?),
        title: row.try_get("title")?,
        author_name: row.try_get("author_name")?,
        date_published: row.try_get("date_published")?,
        description: row.try_get("description")?,
        image: row.try_get("image")?,
    })
}

fn row_to_copy(row: &PgRow) -> Result<BookCopy> {
    let id: i64 = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    Ok(BookCopy {
        id: BookCopyId::new(id.to_string()),
        book_id: BookId::new(row.try_get::<String, _>("book_id")?),
        status: status.parse()?,
    })
}

fn copy_key(id: &BookCopyId) -> Option<i64> {
    id.as_str().parse().ok()
}

#[async_trait]
impl BookCopyStore for PostgresBookCopyStore {
    async fn add_book(&self, book: &Book, copies: u32) -> Result<Vec<BookCopy>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO books (id, title, author_name, date_published, description, image)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(book.id.as_str())
        .bind(&book.title)
        .bind(&book.author_name)
        .bind(&book.date_published)
        .bind(&book.description)
        .bind(&book.image)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, book.id.to_string()))?;

        let mut added = Vec::with_capacity(copies as usize);
        for _ in 0..copies {
            let row = sqlx::query(
                "INSERT INTO book_copies (book_id, status) VALUES ($1, 'Available') \
                 RETURNING id, book_id, status",
            )
            .bind(book.id.as_str())
            .fetch_one(&mut *tx)
            .await?;
            added.push(row_to_copy(&row)?);
        }

        tx.commit().await?;
        Ok(added)
    }

    async fn get_book(&self, id: &BookId) -> Result<Option<Book>> {
        let row = sqlx::query(
            "SELECT id, title, author_name, date_published, description, image FROM books WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_book).transpose()
    }

    async fn list_books(&self) -> Result<Vec<Book>> {
        let rows = sqlx::query(
            "SELECT id, title, author_name, date_published, description, image FROM books ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_book).collect()
    }

    async fn copies_of(&self, book_id: &BookId) -> Result<Vec<BookCopy>> {
        let rows =
            sqlx::query("SELECT id, book_id, status FROM book_copies WHERE book_id = $1 ORDER BY id")
                .bind(book_id.as_str())
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_copy).collect()
    }

    async fn get_copy(&self, id: &BookCopyId) -> Result<Option<BookCopy>> {
        let Some(key) = copy_key(id) else {
            return Ok(None);
        };
        let row = sqlx::query("SELECT id, book_id, status FROM book_copies WHERE id = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_copy).transpose()
    }

    async fn find_available_copy(&self, book_id: &BookId) -> Result<Option<BookCopy>> {
        let row = sqlx::query(
            "SELECT id, book_id, status FROM book_copies \
             WHERE book_id = $1 AND status = 'Available' ORDER BY id LIMIT 1",
        )
        .bind(book_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_copy).transpose()
    }

    async fn update_copy_status(&self, id: &BookCopyId, status: CopyStatus) -> Result<BookCopy> {
        let key = copy_key(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT id, book_id, status FROM book_copies WHERE id = $1 FOR UPDATE")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut copy = row_to_copy(&row)?;
        if !copy.status.can_transition_to(status) {
            return Err(StoreError::InvalidCopyTransition {
                id: id.clone(),
                from: copy.status,
                to: status,
            });
        }

        sqlx::query("UPDATE book_copies SET status = $2 WHERE id = $1")
            .bind(key)
            .bind(status.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        copy.status = status;
        Ok(copy)
    }
}
