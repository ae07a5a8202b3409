//! Remote collaborators of the saga, with RPC-backed and in-memory implementations.

pub mod book_copies;
pub mod notifications;
pub mod patrons;

pub use book_copies::{BookCopyService, InMemoryBookCopyService, RpcBookCopyService};
pub use notifications::{InMemoryReturnNotifier, ReturnNotifier, RpcReturnNotifier};
pub use patrons::{InMemoryPatronDirectory, PatronDirectory, RpcPatronDirectory};
