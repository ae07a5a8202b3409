//! Reservations on titles without an available copy.

use chrono::{DateTime, Duration, Utc};
use common::{BookId, PatronId, ReservationId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::status::status_enum;

status_enum! {
    /// Lifecycle of a reservation. Every move starts from PENDING.
    ReservationStatus {
        Pending => "PENDING",
        Fulfilled => "FULFILLED",
        Cancelled => "CANCELLED",
        Expired => "EXPIRED",
    }
}

impl ReservationStatus {
    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        *self == ReservationStatus::Pending && next != ReservationStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReservationError {
    #[error("Reservation not found: {0}")]
    NotFound(ReservationId),

    #[error("Reservation {id} is not pending (status {status})")]
    NotPending {
        id: ReservationId,
        status: ReservationStatus,
    },

    #[error("Reservation {0} has expired")]
    Expired(ReservationId),

    /// Reserving is only for titles with no copy on the shelf.
    #[error("Book {0} has an available copy; borrow it instead")]
    CopyAvailable(BookId),
}

impl ReservationError {
    pub fn code(&self) -> &'static str {
        match self {
            ReservationError::NotFound(_) => "RESERVATION_NOT_FOUND",
            ReservationError::NotPending { .. } => "RESERVATION_NOT_PENDING",
            ReservationError::Expired(_) => "RESERVATION_EXPIRED",
            ReservationError::CopyAvailable(_) => "COPY_AVAILABLE",
        }
    }
}

/// A patron's hold on a title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: ReservationId,
    pub book_id: BookId,
    pub patron_id: PatronId,
    pub reserved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ReservationStatus,
}

impl Reservation {
    pub fn new_pending(
        book_id: BookId,
        patron_id: PatronId,
        now: DateTime<Utc>,
        hold: Duration,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            book_id,
            patron_id,
            reserved_at: now,
            expires_at: now + hold,
            status: ReservationStatus::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ReservationStatus::Pending
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    fn transition(&mut self, next: ReservationStatus) -> Result<(), ReservationError> {
        if !self.status.can_transition_to(next) {
            return Err(ReservationError::NotPending {
                id: self.id,
                status: self.status,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), ReservationError> {
        self.transition(ReservationStatus::Cancelled)
    }

    /// Marks a pending reservation EXPIRED if its hold has run out.
    ///
    /// Returns whether it expired. Non-pending reservations are an error.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> Result<bool, ReservationError> {
        if !self.is_pending() {
            return Err(ReservationError::NotPending {
                id: self.id,
                status: self.status,
            });
        }
        if !self.is_expired_at(now) {
            return Ok(false);
        }
        self.transition(ReservationStatus::Expired)?;
        Ok(true)
    }

    /// Marks the reservation FULFILLED. Fails if it is no longer pending or
    /// has run past its hold.
    pub fn fulfill(&mut self, now: DateTime<Utc>) -> Result<(), ReservationError> {
        if !self.is_pending() {
            return Err(ReservationError::NotPending {
                id: self.id,
                status: self.status,
            });
        }
        if self.is_expired_at(now) {
            return Err(ReservationError::Expired(self.id));
        }
        self.transition(ReservationStatus::Fulfilled)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap()
    }

    fn pending() -> Reservation {
        Reservation::new_pending(BookId::new("B1"), PatronId::new("P2"), now(), Duration::days(7))
    }

    #[test]
    fn test_only_pending_moves() {
        use ReservationStatus::*;
        for next in [Fulfilled, Cancelled, Expired] {
            assert!(Pending.can_transition_to(next));
        }
        for from in [Fulfilled, Cancelled, Expired] {
            for next in ReservationStatus::ALL {
                assert!(!from.can_transition_to(*next));
            }
        }
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_cancel_twice_fails() {
        let mut r = pending();
        r.cancel().unwrap();
        assert_eq!(r.status, ReservationStatus::Cancelled);
        let err = r.cancel().unwrap_err();
        assert_eq!(
            err,
            ReservationError::NotPending {
                id: r.id,
                status: ReservationStatus::Cancelled
            }
        );
    }

    #[test]
    fn test_fulfill_within_hold() {
        let mut r = pending();
        r.fulfill(now() + Duration::days(2)).unwrap();
        assert_eq!(r.status, ReservationStatus::Fulfilled);
    }

    #[test]
    fn test_fulfill_past_hold_is_expired_and_unchanged() {
        let mut r = pending();
        let err = r.fulfill(now() + Duration::days(8)).unwrap_err();
        assert_eq!(err, ReservationError::Expired(r.id));
        assert!(r.is_pending());

        assert!(r.expire_if_due(now() + Duration::days(8)).unwrap());
        assert_eq!(r.status, ReservationStatus::Expired);
    }

    #[test]
    fn test_expire_if_due_before_expiry_is_noop() {
        let mut r = pending();
        assert!(!r.expire_if_due(now() + Duration::days(1)).unwrap());
        assert!(r.is_pending());
    }

    #[test]
    fn test_wire_format() {
        let value = serde_json::to_value(pending()).unwrap();
        assert_eq!(value["status"], "PENDING");
        assert_eq!(value["bookId"], "B1");
        assert!(value.get("expiresAt").is_some());
    }
}
