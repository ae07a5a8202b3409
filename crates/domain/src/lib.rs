//! Domain model of the library platform.
//!
//! Every status is a closed enum with an explicit transition table; the
//! mutating methods on the records check the table and refuse illegal moves
//! instead of overwriting the field.
//! - [`BorrowRecord`] and [`LoanPolicy`]: loans, renewals, returns
//! - [`Reservation`]: holds on titles that had no available copy
//! - [`Book`], [`BookCopy`], [`Availability`]: the book service's catalogue
//! - [`Patron`] and [`ViolationRecord`]: the patron service's records
//! - [`Fine`] and [`ReturnedEvent`]: late-return fines

pub mod book;
pub mod borrow;
pub mod error;
pub mod fine;
pub mod patron;
pub mod reservation;
mod status;

pub use book::{Availability, Book, BookCopy, CopyStatus};
pub use borrow::{BorrowRecord, BorrowStatus, LoanError, LoanPolicy};
pub use error::DomainError;
pub use fine::{Fine, ReturnedEvent};
pub use patron::{
    Patron, PatronStanding, PatronStatus, ViolationError, ViolationRecord, ViolationStatus,
    ViolationType,
};
pub use reservation::{Reservation, ReservationError, ReservationStatus};
pub use status::ParseStatusError;
