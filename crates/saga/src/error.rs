//! Saga error types.

use common::{BookId, PatronId};
use domain::{LoanError, PatronStanding, ReservationError};
use rpc::{HandlerError, RpcError};
use store::StoreError;
use thiserror::Error;

use crate::borrowing::{
    STEP_CHECK_AVAILABILITY, STEP_CHECK_PATRON, STEP_INSERT_RECORD, STEP_MARK_BORROWED,
};

/// Errors returned by the borrowing saga and the loan service.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The patron service has no such patron.
    #[error("Patron {0} not found")]
    UnknownPatron(PatronId),

    /// The patron's standing rules out borrowing and reserving.
    #[error("Patron {patron_id} is {standing} and cannot borrow or reserve")]
    PatronNotEligible {
        patron_id: PatronId,
        standing: PatronStanding,
    },

    /// The patron service could not be reached.
    #[error("Patron standing check failed: {0}")]
    PatronCheck(#[source] RpcError),

    /// Step 1 found no copy on the shelf.
    #[error("No copy of book {0} is available")]
    NotAvailable(BookId),

    /// Step 1 could not reach the book service.
    #[error("Availability check failed: {0}")]
    AvailabilityCheck(#[source] RpcError),

    /// Step 2 could not publish the status update.
    #[error("Copy status update failed: {0}")]
    StatusUpdate(#[source] RpcError),

    /// Step 3 could not store the borrow record.
    #[error("Borrow record insert failed: {0}")]
    RecordInsert(#[source] StoreError),

    #[error(transparent)]
    Loan(#[from] LoanError),

    #[error(transparent)]
    Reservation(#[from] ReservationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

/// Flat classification of a [`SagaError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PatronNotEligible,
    PatronCheck,
    NotAvailable,
    AvailabilityCheck,
    StatusUpdate,
    RecordInsert,
    NotFound,
    AlreadyReturned,
    MaxRenewalsReached,
    ItemReserved,
    InvalidTransition,
    ReservationNotPending,
    ReservationExpired,
    CopyAvailable,
    Timeout,
    Transport,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::PatronNotEligible => "patron_not_eligible",
            ErrorKind::PatronCheck => "patron_check",
            ErrorKind::NotAvailable => "not_available",
            ErrorKind::AvailabilityCheck => "availability_check",
            ErrorKind::StatusUpdate => "status_update",
            ErrorKind::RecordInsert => "record_insert",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyReturned => "already_returned",
            ErrorKind::MaxRenewalsReached => "max_renewals_reached",
            ErrorKind::ItemReserved => "item_reserved",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::ReservationNotPending => "reservation_not_pending",
            ErrorKind::ReservationExpired => "reservation_expired",
            ErrorKind::CopyAvailable => "copy_available",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Transport => "transport",
            ErrorKind::Storage => "storage",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SagaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::UnknownPatron(_) => ErrorKind::NotFound,
            SagaError::PatronNotEligible { .. } => ErrorKind::PatronNotEligible,
            SagaError::PatronCheck(_) => ErrorKind::PatronCheck,
            SagaError::NotAvailable(_) => ErrorKind::NotAvailable,
            SagaError::AvailabilityCheck(_) => ErrorKind::AvailabilityCheck,
            SagaError::StatusUpdate(_) => ErrorKind::StatusUpdate,
            SagaError::RecordInsert(_) => ErrorKind::RecordInsert,
            SagaError::Loan(e) => match e {
                LoanError::NotFound(_) => ErrorKind::NotFound,
                LoanError::AlreadyReturned(_) => ErrorKind::AlreadyReturned,
                LoanError::MaxRenewalsReached { .. } => ErrorKind::MaxRenewalsReached,
                LoanError::ItemReserved(_) => ErrorKind::ItemReserved,
                LoanError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            },
            SagaError::Reservation(e) => match e {
                ReservationError::NotFound(_) => ErrorKind::NotFound,
                ReservationError::NotPending { .. } => ErrorKind::ReservationNotPending,
                ReservationError::Expired(_) => ErrorKind::ReservationExpired,
                ReservationError::CopyAvailable(_) => ErrorKind::CopyAvailable,
            },
            SagaError::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            SagaError::Store(_) => ErrorKind::Storage,
            SagaError::Rpc(e) if e.is_timeout() => ErrorKind::Timeout,
            SagaError::Rpc(_) => ErrorKind::Transport,
        }
    }

    /// The saga step that failed, for the errors that belong to one.
    pub fn step(&self) -> Option<&'static str> {
        match self {
            SagaError::UnknownPatron(_)
            | SagaError::PatronNotEligible { .. }
            | SagaError::PatronCheck(_) => Some(STEP_CHECK_PATRON),
            SagaError::NotAvailable(_) | SagaError::AvailabilityCheck(_) => {
                Some(STEP_CHECK_AVAILABILITY)
            }
            SagaError::StatusUpdate(_) => Some(STEP_MARK_BORROWED),
            SagaError::RecordInsert(_) => Some(STEP_INSERT_RECORD),
            _ => None,
        }
    }

    /// Machine-readable code for typed results.
    pub fn code(&self) -> &'static str {
        match self {
            SagaError::PatronNotEligible { .. } => "PATRON_NOT_ELIGIBLE",
            SagaError::NotAvailable(_) => "NOT_AVAILABLE",
            SagaError::Loan(e) => e.code(),
            SagaError::Reservation(e) => e.code(),
            SagaError::PatronCheck(e)
            | SagaError::AvailabilityCheck(e)
            | SagaError::StatusUpdate(e)
            | SagaError::Rpc(e)
                if e.is_timeout() =>
            {
                "TIMEOUT"
            }
            _ => "INTERNAL_SERVER_ERROR",
        }
    }

    /// True for rule violations the caller can act on, as opposed to
    /// infrastructure failures.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            SagaError::PatronNotEligible { .. }
                | SagaError::NotAvailable(_)
                | SagaError::Loan(_)
                | SagaError::Reservation(_)
        )
    }
}

impl From<SagaError> for HandlerError {
    fn from(err: SagaError) -> Self {
        match err.kind() {
            ErrorKind::NotFound => HandlerError::NotFound(err.to_string()),
            _ if err.is_domain() => HandlerError::rejected(err.code(), err.to_string()),
            _ => HandlerError::internal(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::RecordId;

    use super::*;

    #[test]
    fn test_kind_and_step() {
        let err = SagaError::NotAvailable(BookId::new("B1"));
        assert_eq!(err.kind(), ErrorKind::NotAvailable);
        assert_eq!(err.step(), Some(STEP_CHECK_AVAILABILITY));
        assert_eq!(err.code(), "NOT_AVAILABLE");

        let err = SagaError::from(LoanError::MaxRenewalsReached {
            id: RecordId::new(),
            max: 2,
        });
        assert_eq!(err.kind(), ErrorKind::MaxRenewalsReached);
        assert_eq!(err.step(), None);
        assert_eq!(err.code(), "MAX_RENEWALS_REACHED");
    }

    #[test]
    fn test_patron_errors() {
        let banned = SagaError::PatronNotEligible {
            patron_id: PatronId::new("P1"),
            standing: PatronStanding::Banned,
        };
        assert_eq!(banned.kind(), ErrorKind::PatronNotEligible);
        assert_eq!(banned.step(), Some(STEP_CHECK_PATRON));
        let rejected: HandlerError = banned.into();
        assert_eq!(rejected.code(), "PATRON_NOT_ELIGIBLE");

        let missing: HandlerError = SagaError::UnknownPatron(PatronId::new("P9")).into();
        assert_eq!(missing.code(), "NOT_FOUND");
    }

    #[test]
    fn test_timeout_is_classified() {
        let err = SagaError::AvailabilityCheck(RpcError::Timeout {
            queue: "bookCopyAvailRequests".to_string(),
            timeout: Duration::from_secs(5),
        });
        assert_eq!(err.kind(), ErrorKind::AvailabilityCheck);
        assert_eq!(err.code(), "TIMEOUT");
        assert!(err.to_string().contains("timeout waiting for reply from service"));
    }

    #[test]
    fn test_handler_error_mapping() {
        let rejected: HandlerError = SagaError::from(LoanError::ItemReserved(BookId::new("B1"))).into();
        assert_eq!(rejected.code(), "ITEM_RESERVED");

        let missing: HandlerError = SagaError::from(LoanError::NotFound(RecordId::new())).into();
        assert_eq!(missing.code(), "NOT_FOUND");

        let internal: HandlerError =
            SagaError::RecordInsert(StoreError::Unavailable("down".to_string())).into();
        assert_eq!(internal.code(), "INTERNAL_SERVER_ERROR");
    }
}
