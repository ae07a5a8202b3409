//! Shared types for the library platform services.

pub mod clock;
pub mod types;

pub use clock::{Clock, FixedClock, SharedClock, SystemClock};
pub use types::{BookCopyId, BookId, FineId, PatronId, RecordId, ReservationId, ViolationId};
