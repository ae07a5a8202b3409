//! Persistence for the library platform.
//!
//! - [`LoanStore`] / [`LoanTransaction`]: borrow records and reservations,
//!   mutated inside transactions whose `lock_*` reads serialize concurrent
//!   writers on the same row
//! - [`BookCopyStore`]: the book service's titles and copies
//!
//! Each has an in-memory and a PostgreSQL implementation.

pub mod copies;
pub mod error;
pub mod loans;
pub mod memory;
pub mod postgres;

pub use copies::BookCopyStore;
pub use error::{Result, StoreError};
pub use loans::{LoanStore, LoanTransaction, RecordFilter, ReservationFilter};
pub use memory::{InMemoryBookCopyStore, InMemoryLoanStore, InMemoryLoanTransaction};
pub use postgres::{PostgresBookCopyStore, PostgresLoanStore, PostgresLoanTransaction, connect};
