use domain::{Book, Patron, ViolationRecord};

use crate::Subscribers;

/// The node's subscription feeds.
#[derive(Debug, Clone)]
pub struct Hub {
    pub book_added: Subscribers<Book>,
    pub patron_created: Subscribers<Patron>,
    /// Keyed by patron id so a client can follow one patron's violations.
    pub ongoing_violations: Subscribers<ViolationRecord>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            book_added: Subscribers::new("bookAdded"),
            patron_created: Subscribers::new("patronCreated"),
            ongoing_violations: Subscribers::new("ongoingViolations"),
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
