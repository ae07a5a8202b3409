//! Borrow records and the loan state machine.

use chrono::{DateTime, Duration, Utc};
use common::{BookCopyId, BookId, PatronId, RecordId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::status::status_enum;

status_enum! {
    /// Lifecycle of a borrow record.
    ///
    /// ```text
    /// ACTIVE ──┬──► RENEWED ◄─┐ (repeatable)
    ///          │      │       │
    ///          ├──────┼──► OVERDUE
    ///          │      │       │
    ///          └──────┴───────┴──► RETURNED (terminal)
    /// ```
    BorrowStatus {
        Active => "ACTIVE",
        Renewed => "RENEWED",
        Returned => "RETURNED",
        Overdue => "OVERDUE",
    }
}

impl BorrowStatus {
    /// The transition table.
    pub fn can_transition_to(&self, next: BorrowStatus) -> bool {
        use BorrowStatus::*;
        matches!(
            (*self, next),
            (Active, Renewed)
                | (Active, Overdue)
                | (Active, Returned)
                | (Renewed, Renewed)
                | (Renewed, Overdue)
                | (Renewed, Returned)
                | (Overdue, Renewed)
                | (Overdue, Returned)
        )
    }

    /// Returns true while the copy is still out with the patron.
    pub fn is_outstanding(&self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BorrowStatus::Returned)
    }
}

/// Errors raised by loan operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoanError {
    #[error("Borrow record not found: {0}")]
    NotFound(RecordId),

    #[error("Loan {0} has already been returned")]
    AlreadyReturned(RecordId),

    #[error("Loan {id} has reached the maximum of {max} renewals")]
    MaxRenewalsReached { id: RecordId, max: u32 },

    #[error("Book {0} is reserved by another patron")]
    ItemReserved(BookId),

    #[error("Invalid loan transition from {from} to {to}")]
    InvalidTransition { from: BorrowStatus, to: BorrowStatus },
}

impl LoanError {
    /// Machine-readable code used in typed results.
    pub fn code(&self) -> &'static str {
        match self {
            LoanError::NotFound(_) => "LOAN_NOT_FOUND",
            LoanError::AlreadyReturned(_) => "LOAN_ALREADY_RETURNED",
            LoanError::MaxRenewalsReached { .. } => "MAX_RENEWALS_REACHED",
            LoanError::ItemReserved(_) => "ITEM_RESERVED",
            LoanError::InvalidTransition { .. } => "INVALID_TRANSITION",
        }
    }
}

/// Deployment-specific loan rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoanPolicy {
    /// Length of a loan and of each renewal.
    pub loan_period: Duration,
    /// How many times one loan may be renewed.
    pub max_renewals: u32,
    /// How long a reservation stays pending before it expires.
    pub reservation_hold: Duration,
}

impl Default for LoanPolicy {
    fn default() -> Self {
        Self {
            loan_period: Duration::days(14),
            max_renewals: 2,
            reservation_hold: Duration::days(7),
        }
    }
}

/// A loan of one physical copy to one patron.
///
/// Records are transitioned, never edited in place. The only deletion is
/// the rollback of a fulfilment that lost its race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BorrowRecord {
    pub id: RecordId,
    pub book_id: BookId,
    pub patron_id: PatronId,
    pub borrowed_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    #[serde(default)]
    pub returned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub previous_due_date: Option<DateTime<Utc>>,
    pub renewal_count: u32,
    pub status: BorrowStatus,
    pub book_copy_id: BookCopyId,
}

impl BorrowRecord {
    /// A fresh ACTIVE loan starting at `now`.
    pub fn new_active(
        book_id: BookId,
        patron_id: PatronId,
        book_copy_id: BookCopyId,
        now: DateTime<Utc>,
        policy: &LoanPolicy,
    ) -> Self {
        Self {
            id: RecordId::new(),
            book_id,
            patron_id,
            borrowed_at: now,
            due_date: now + policy.loan_period,
            returned_at: None,
            previous_due_date: None,
            renewal_count: 0,
            status: BorrowStatus::Active,
            book_copy_id,
        }
    }

    fn transition(&mut self, next: BorrowStatus) -> Result<(), LoanError> {
        if !self.status.can_transition_to(next) {
            return Err(LoanError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Extends the loan by one loan period.
    ///
    /// The new due date counts from the later of `now` and the current due
    /// date, so renewing early never shortens a loan and renewing an overdue
    /// loan gives a full period from today. The record is left untouched on
    /// error.
    pub fn renew(
        &mut self,
        now: DateTime<Utc>,
        policy: &LoanPolicy,
        has_pending_reservation: bool,
    ) -> Result<(), LoanError> {
        if self.status == BorrowStatus::Returned {
            return Err(LoanError::AlreadyReturned(self.id));
        }
        if self.renewal_count >= policy.max_renewals {
            return Err(LoanError::MaxRenewalsReached {
                id: self.id,
                max: policy.max_renewals,
            });
        }
        if has_pending_reservation {
            return Err(LoanError::ItemReserved(self.book_id.clone()));
        }

        self.transition(BorrowStatus::Renewed)?;
        let base = self.due_date.max(now);
        self.previous_due_date = Some(self.due_date);
        self.due_date = base + policy.loan_period;
        self.renewal_count += 1;
        Ok(())
    }

    /// Closes the loan.
    pub fn mark_returned(&mut self, now: DateTime<Utc>) -> Result<(), LoanError> {
        if self.status == BorrowStatus::Returned {
            return Err(LoanError::AlreadyReturned(self.id));
        }
        self.transition(BorrowStatus::Returned)?;
        self.returned_at = Some(now);
        Ok(())
    }

    /// Returns true if the loan is outstanding and past its due date.
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_outstanding() && self.due_date < now
    }

    /// Moves a past-due loan to OVERDUE. Returns whether anything changed.
    pub fn mark_overdue(&mut self, now: DateTime<Utc>) -> Result<bool, LoanError> {
        if self.status == BorrowStatus::Overdue || !self.is_overdue_at(now) {
            return Ok(false);
        }
        self.transition(BorrowStatus::Overdue)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn record() -> BorrowRecord {
        BorrowRecord::new_active(
            BookId::new("B1"),
            PatronId::new("P1"),
            BookCopyId::new("17"),
            start(),
            &LoanPolicy::default(),
        )
    }

    #[test]
    fn test_new_record_is_active_for_one_period() {
        let r = record();
        assert_eq!(r.status, BorrowStatus::Active);
        assert_eq!(r.renewal_count, 0);
        assert_eq!(r.due_date, start() + Duration::days(14));
        assert!(r.returned_at.is_none());
    }

    #[test]
    fn test_transition_table() {
        use BorrowStatus::*;
        assert!(Active.can_transition_to(Renewed));
        assert!(Renewed.can_transition_to(Renewed));
        assert!(Overdue.can_transition_to(Returned));
        assert!(!Returned.can_transition_to(Active));
        assert!(!Returned.can_transition_to(Renewed));
        assert!(!Renewed.can_transition_to(Active));
        assert!(!Overdue.can_transition_to(Active));
    }

    #[test]
    fn test_renew_extends_from_due_date() {
        let mut r = record();
        let policy = LoanPolicy::default();
        r.renew(start() + Duration::days(1), &policy, false).unwrap();

        assert_eq!(r.status, BorrowStatus::Renewed);
        assert_eq!(r.renewal_count, 1);
        assert_eq!(r.previous_due_date, Some(start() + Duration::days(14)));
        assert_eq!(r.due_date, start() + Duration::days(28));
    }

    #[test]
    fn test_renew_overdue_loan_counts_from_now() {
        let mut r = record();
        let policy = LoanPolicy::default();
        let late = start() + Duration::days(20);
        assert!(r.mark_overdue(late).unwrap());

        r.renew(late, &policy, false).unwrap();
        assert_eq!(r.status, BorrowStatus::Renewed);
        assert_eq!(r.due_date, late + Duration::days(14));
    }

    #[test]
    fn test_renew_rejects_at_max_and_leaves_record_unchanged() {
        let mut r = record();
        let policy = LoanPolicy::default();
        r.renew(start(), &policy, false).unwrap();
        r.renew(start(), &policy, false).unwrap();
        let before = r.clone();

        let err = r.renew(start(), &policy, false).unwrap_err();
        assert_eq!(err, LoanError::MaxRenewalsReached { id: r.id, max: 2 });
        assert_eq!(err.code(), "MAX_RENEWALS_REACHED");
        assert_eq!(r, before);
    }

    #[test]
    fn test_renew_rejects_when_reserved() {
        let mut r = record();
        let err = r.renew(start(), &LoanPolicy::default(), true).unwrap_err();
        assert_eq!(err, LoanError::ItemReserved(BookId::new("B1")));
        assert_eq!(r.renewal_count, 0);
        assert_eq!(r.status, BorrowStatus::Active);
    }

    #[test]
    fn test_returned_loan_cannot_be_renewed_or_returned_again() {
        let mut r = record();
        let now = start() + Duration::days(3);
        r.mark_returned(now).unwrap();
        assert_eq!(r.returned_at, Some(now));

        assert_eq!(
            r.renew(now, &LoanPolicy::default(), false),
            Err(LoanError::AlreadyReturned(r.id))
        );
        assert_eq!(r.mark_returned(now), Err(LoanError::AlreadyReturned(r.id)));
    }

    #[test]
    fn test_mark_overdue_only_past_due() {
        let mut r = record();
        assert!(!r.mark_overdue(start() + Duration::days(13)).unwrap());
        assert!(r.mark_overdue(start() + Duration::days(15)).unwrap());
        assert_eq!(r.status, BorrowStatus::Overdue);
        // Idempotent.
        assert!(!r.mark_overdue(start() + Duration::days(16)).unwrap());
    }

    #[test]
    fn test_wire_format_is_camel_case_with_upper_status() {
        let r = record();
        let value = serde_json::to_value(&r).unwrap();
        assert_eq!(value["status"], "ACTIVE");
        assert_eq!(value["bookCopyId"], "17");
        assert_eq!(value["renewalCount"], 0);
        assert!(value["returnedAt"].is_null());

        let back: BorrowRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("RENEWED".parse::<BorrowStatus>().unwrap(), BorrowStatus::Renewed);
        assert!("renewed".parse::<BorrowStatus>().is_err());
        assert_eq!(BorrowStatus::ALL.len(), 4);
    }
}
