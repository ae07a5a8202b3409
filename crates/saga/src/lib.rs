//! Borrowing saga and the loan/reservation workflows built on it.
//!
//! [`BorrowingSaga`] checks the patron's standing, then lends a copy in three
//! steps: availability check over RPC, a fire-and-forget status update, and a
//! local borrow-record insert.
//! There is no transaction spanning them; [`SagaOptions`] chooses how a
//! failure of the later steps is handled.
//!
//! [`LoanService`] adds returns, renewals, reservations and the overdue
//! sweep on top of the saga and the loan store.

pub mod borrowing;
pub mod error;
pub mod loans;
pub mod services;

pub use borrowing::{
    BorrowingSaga, STEP_CHECK_AVAILABILITY, STEP_CHECK_PATRON, STEP_INSERT_RECORD,
    STEP_MARK_BORROWED, SagaOptions, StatusUpdatePolicy,
};
pub use error::{ErrorKind, Result, SagaError};
pub use loans::LoanService;
pub use services::{
    BookCopyService, InMemoryBookCopyService, InMemoryPatronDirectory, InMemoryReturnNotifier,
    PatronDirectory, ReturnNotifier, RpcBookCopyService, RpcPatronDirectory, RpcReturnNotifier,
};
