//! Patrons, their standing and their violation records.

use chrono::{DateTime, Utc};
use common::{PatronId, ViolationId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::status::status_enum;

status_enum! {
    /// Standing of a patron with the library.
    PatronStanding {
        Good => "Good",
        Warned => "Warned",
        Banned => "Banned",
        Pending => "Pending",
    }
}

impl PatronStanding {
    /// `Pending` is only ever an initial standing.
    pub fn can_transition_to(&self, next: PatronStanding) -> bool {
        next != PatronStanding::Pending || *self == PatronStanding::Pending
    }

    /// Banned patrons and patrons still pending approval can neither
    /// borrow nor reserve.
    pub fn may_borrow(&self) -> bool {
        matches!(self, PatronStanding::Good | PatronStanding::Warned)
    }
}

status_enum! {
    ViolationType {
        LateReturn => "Late_Return",
        UnpaidFees => "Unpaid_Fees",
        DamagedBook => "Damaged_Book",
    }
}

status_enum! {
    /// A violation is opened ongoing and can only be resolved.
    ViolationStatus {
        Ongoing => "Ongoing",
        Resolved => "Resolved",
    }
}

impl ViolationStatus {
    pub fn can_transition_to(&self, next: ViolationStatus) -> bool {
        matches!(
            (*self, next),
            (ViolationStatus::Ongoing, ViolationStatus::Resolved)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViolationError {
    #[error("Violation record not found: {0}")]
    NotFound(ViolationId),

    #[error("Invalid violation transition from {from} to {to}")]
    InvalidTransition {
        from: ViolationStatus,
        to: ViolationStatus,
    },

    #[error("Invalid standing transition from {from} to {to}")]
    InvalidStanding {
        from: PatronStanding,
        to: PatronStanding,
    },
}

/// Standing summary kept alongside each patron.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatronStatus {
    pub patron_id: PatronId,
    pub warning_count: u32,
    pub patron_status: PatronStanding,
    pub unpaid_fees: f64,
}

impl PatronStatus {
    pub fn good(patron_id: PatronId) -> Self {
        Self {
            patron_id,
            warning_count: 0,
            patron_status: PatronStanding::Good,
            unpaid_fees: 0.0,
        }
    }

    pub fn set_standing(&mut self, next: PatronStanding) -> Result<(), ViolationError> {
        if !self.patron_status.can_transition_to(next) {
            return Err(ViolationError::InvalidStanding {
                from: self.patron_status,
                to: next,
            });
        }
        self.patron_status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patron {
    pub patron_id: PatronId,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub patron_created: DateTime<Utc>,
    pub status: PatronStatus,
}

impl Patron {
    pub fn new(
        patron_id: PatronId,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        phone_number: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: PatronStatus::good(patron_id.clone()),
            patron_id,
            first_name: first_name.into(),
            last_name: last_name.into(),
            phone_number: phone_number.into(),
            patron_created: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub violation_record_id: ViolationId,
    pub patron_id: PatronId,
    pub violation_type: ViolationType,
    pub violation_info: String,
    pub violation_created: DateTime<Utc>,
    pub violation_status: ViolationStatus,
}

impl ViolationRecord {
    /// Opens an ongoing violation.
    pub fn open(
        patron_id: PatronId,
        violation_type: ViolationType,
        violation_info: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            violation_record_id: ViolationId::new(),
            patron_id,
            violation_type,
            violation_info: violation_info.into(),
            violation_created: now,
            violation_status: ViolationStatus::Ongoing,
        }
    }

    pub fn set_status(&mut self, next: ViolationStatus) -> Result<(), ViolationError> {
        if !self.violation_status.can_transition_to(next) {
            return Err(ViolationError::InvalidTransition {
                from: self.violation_status,
                to: next,
            });
        }
        self.violation_status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_good_and_warned_patrons_may_borrow() {
        let allowed: Vec<PatronStanding> = PatronStanding::ALL
            .iter()
            .copied()
            .filter(PatronStanding::may_borrow)
            .collect();
        assert_eq!(allowed, [PatronStanding::Good, PatronStanding::Warned]);
    }

    #[test]
    fn test_violation_resolves_once() {
        let mut v = ViolationRecord::open(
            PatronId::new("P1"),
            ViolationType::LateReturn,
            "3 days late",
            Utc::now(),
        );
        v.set_status(ViolationStatus::Resolved).unwrap();
        assert_eq!(
            v.set_status(ViolationStatus::Ongoing),
            Err(ViolationError::InvalidTransition {
                from: ViolationStatus::Resolved,
                to: ViolationStatus::Ongoing
            })
        );
        assert!(v.set_status(ViolationStatus::Resolved).is_err());
    }

    #[test]
    fn test_violation_type_wire_names() {
        assert_eq!(
            serde_json::to_value(ViolationType::DamagedBook).unwrap(),
            "Damaged_Book"
        );
        assert_eq!(
            "Unpaid_Fees".parse::<ViolationType>().unwrap(),
            ViolationType::UnpaidFees
        );
    }

    #[test]
    fn test_standing_cannot_return_to_pending() {
        let mut status = PatronStatus::good(PatronId::new("P1"));
        status.set_standing(PatronStanding::Warned).unwrap();
        status.set_standing(PatronStanding::Banned).unwrap();
        status.set_standing(PatronStanding::Good).unwrap();
        assert!(status.set_standing(PatronStanding::Pending).is_err());
        assert_eq!(status.patron_status, PatronStanding::Good);
    }

    #[test]
    fn test_new_patron_is_in_good_standing() {
        let p = Patron::new(PatronId::new("P9"), "Ada", "Lovelace", "555-0100", Utc::now());
        assert_eq!(p.status.patron_status, PatronStanding::Good);
        assert_eq!(p.status.patron_id, p.patron_id);
    }
}
