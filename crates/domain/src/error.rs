//! Domain error types.

use thiserror::Error;

use crate::{LoanError, ParseStatusError, ReservationError, ViolationError};

/// Any rule violation raised by the domain model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("Loan error: {0}")]
    Loan(#[from] LoanError),

    #[error("Reservation error: {0}")]
    Reservation(#[from] ReservationError),

    #[error("Violation error: {0}")]
    Violation(#[from] ViolationError),

    #[error(transparent)]
    InvalidStatus(#[from] ParseStatusError),
}
