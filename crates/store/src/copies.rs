use async_trait::async_trait;
use common::{BookCopyId, BookId};
use domain::{Book, BookCopy, CopyStatus};

use crate::Result;

/// The book service's catalogue of titles and physical copies.
#[async_trait]
pub trait BookCopyStore: Send + Sync {
    /// Adds a title with `copies` new copies, all Available.
    ///
    /// The store mints the copy ids; they are never the `"0"` sentinel.
    async fn add_book(&self, book: &Book, copies: u32) -> Result<Vec<BookCopy>>;

    async fn get_book(&self, id: &BookId) -> Result<Option<Book>>;

    async fn list_books(&self) -> Result<Vec<Book>>;

    /// Every copy of a title, lowest id first.
    async fn copies_of(&self, book_id: &BookId) -> Result<Vec<BookCopy>>;

    async fn get_copy(&self, id: &BookCopyId) -> Result<Option<BookCopy>>;

    /// The lowest-numbered Available copy of a title, if any.
    async fn find_available_copy(&self, book_id: &BookId) -> Result<Option<BookCopy>>;

    /// Moves a copy to `status`, checking the copy transition table.
    async fn update_copy_status(&self, id: &BookCopyId, status: CopyStatus) -> Result<BookCopy>;
}
