//! Late-return fines.

use chrono::{DateTime, Utc};
use common::{BookId, FineId, PatronId, RecordId, ViolationId};
use serde::{Deserialize, Serialize};

use crate::BorrowRecord;

/// Published when a loan is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnedEvent {
    pub borrowing_id: RecordId,
    pub patron_id: PatronId,
    pub book_id: BookId,
    pub due_date: DateTime<Utc>,
    pub returned_at: DateTime<Utc>,
}

impl ReturnedEvent {
    /// Builds the event for a returned record; `None` if it is not returned.
    pub fn from_record(record: &BorrowRecord) -> Option<Self> {
        Some(Self {
            borrowing_id: record.id,
            patron_id: record.patron_id.clone(),
            book_id: record.book_id.clone(),
            due_date: record.due_date,
            returned_at: record.returned_at?,
        })
    }

    /// Whole days between the due date and the return, rounded down.
    pub fn days_late(&self) -> i64 {
        (self.returned_at - self.due_date).num_days().max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fine {
    #[serde(rename = "fine_id")]
    pub fine_id: FineId,
    pub patron_id: PatronId,
    pub book_id: BookId,
    pub days_late: i64,
    pub rate_per_day: f64,
    pub amount: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation_record_id: Option<ViolationId>,
}

impl Fine {
    /// Assesses a fine for a return. Returns `None` for on-time returns.
    pub fn assess(event: &ReturnedEvent, rate_per_day: f64, now: DateTime<Utc>) -> Option<Self> {
        let days_late = event.days_late();
        if days_late <= 0 {
            return None;
        }
        Some(Self {
            fine_id: FineId::new(),
            patron_id: event.patron_id.clone(),
            book_id: event.book_id.clone(),
            days_late,
            rate_per_day,
            amount: days_late as f64 * rate_per_day,
            created_at: now,
            violation_record_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn event(late_by: Duration) -> ReturnedEvent {
        let due = Utc.with_ymd_and_hms(2024, 4, 1, 12, 0, 0).unwrap();
        ReturnedEvent {
            borrowing_id: RecordId::new(),
            patron_id: PatronId::new("P1"),
            book_id: BookId::new("B1"),
            due_date: due,
            returned_at: due + late_by,
        }
    }

    #[test]
    fn test_partial_days_round_down() {
        let e = event(Duration::days(3) + Duration::hours(23));
        let fine = Fine::assess(&e, 0.5, Utc::now()).unwrap();
        assert_eq!(fine.days_late, 3);
        assert!((fine.amount - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_no_fine_when_on_time_or_early() {
        assert!(Fine::assess(&event(Duration::hours(20)), 1.0, Utc::now()).is_none());
        assert!(Fine::assess(&event(-Duration::days(2)), 1.0, Utc::now()).is_none());
    }

    #[test]
    fn test_event_wire_names() {
        let value = serde_json::to_value(event(Duration::days(1))).unwrap();
        for key in ["borrowingId", "patronId", "bookId", "dueDate", "returnedAt"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }
}
