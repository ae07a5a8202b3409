//! The book service's catalogue records.

use common::{BookCopyId, BookId};
use serde::{Deserialize, Serialize};

use crate::status::status_enum;

status_enum! {
    /// Shelf status of a physical copy.
    CopyStatus {
        Available => "Available",
        Borrowed => "Borrowed",
        Reserved => "Reserved",
    }
}

impl CopyStatus {
    /// Re-applying the current status is allowed so status updates are idempotent.
    pub fn can_transition_to(&self, next: CopyStatus) -> bool {
        use CopyStatus::*;
        *self == next
            || matches!(
                (*self, next),
                (Available, Borrowed)
                    | (Available, Reserved)
                    | (Reserved, Borrowed)
                    | (Reserved, Available)
                    | (Borrowed, Available)
            )
    }
}

/// A title in the catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author_name: String,
    #[serde(default)]
    pub date_published: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// A physical copy of a [`Book`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookCopy {
    pub id: BookCopyId,
    pub book_id: BookId,
    pub status: CopyStatus,
}

/// Reply to an availability check.
///
/// `book_copy_id` is the sentinel `"0"` when nothing is on the shelf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub book_copy_id: BookCopyId,
    pub status: String,
}

impl Availability {
    pub fn available(book_copy_id: BookCopyId) -> Self {
        Self {
            book_copy_id,
            status: CopyStatus::Available.as_str().to_string(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            book_copy_id: BookCopyId::sentinel(),
            status: CopyStatus::Borrowed.as_str().to_string(),
        }
    }

    /// True only for a real copy id reported as `Available`.
    pub fn is_available(&self) -> bool {
        !self.book_copy_id.is_sentinel() && self.status == CopyStatus::Available.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability_requires_real_copy_and_available_status() {
        assert!(Availability::available(BookCopyId::new("3")).is_available());
        assert!(!Availability::unavailable().is_available());

        let sentinel_but_available = Availability {
            book_copy_id: BookCopyId::sentinel(),
            status: "Available".to_string(),
        };
        assert!(!sentinel_but_available.is_available());

        let other_status = Availability {
            book_copy_id: BookCopyId::new("3"),
            status: "Lost".to_string(),
        };
        assert!(!other_status.is_available());
    }

    #[test]
    fn test_availability_wire_shape() {
        let value = serde_json::to_value(Availability::unavailable()).unwrap();
        assert_eq!(value, serde_json::json!({ "book_copy_id": "0", "status": "Borrowed" }));
    }

    #[test]
    fn test_copy_transitions() {
        use CopyStatus::*;
        assert!(Available.can_transition_to(Borrowed));
        assert!(Borrowed.can_transition_to(Available));
        assert!(Borrowed.can_transition_to(Borrowed));
        assert!(!Borrowed.can_transition_to(Reserved));
    }
}
