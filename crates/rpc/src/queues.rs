//! Well-known queue names.

/// Patron service operations.
pub const PATRON_SERVICE: &str = "patron-service-queue";

/// Borrowing service operations.
pub const BORROWING_SERVICE: &str = "borrowing-service-queue";

/// Book catalogue operations.
pub const BOOK_SERVICE: &str = "book-service-queue";

/// Copy availability lookups answered by the book service.
pub const BOOK_COPY_AVAILABILITY: &str = "bookCopyAvailRequests";

/// Fire-and-forget copy status updates consumed by the book service.
pub const BOOK_COPY_UPDATES: &str = "book-copies-queue";

/// Fine lookups.
pub const FINE_SERVICE: &str = "fine-service-queue";

/// Loan-returned events consumed by the fine service.
pub const BORROWING_RETURNED: &str = "borrowing.returned";

/// Newly added books, fanned out to subscribers.
pub const BOOK_ADDED: &str = "book.added";

/// Operation names carried in `requestedResolver`.
pub mod operations {
    pub const CHECK_AVAILABILITY: &str = "checkAvailability";
    pub const UPDATE_BOOK_COPY_STATUS: &str = "updateBookCopyStatus";
    pub const LOAN_RETURNED: &str = "loanReturned";
    pub const GET_PATRON_BY_ID: &str = "getPatronById";
    pub const BOOK_ADDED: &str = "bookAdded";
}
