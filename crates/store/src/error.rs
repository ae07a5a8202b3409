use common::BookCopyId;
use domain::{CopyStatus, ParseStatusError};
use thiserror::Error;

/// Errors that can occur when interacting with a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row with this key already exists.
    #[error("Duplicate key: {0}")]
    Duplicate(String),

    /// An outstanding borrow record already holds this copy.
    #[error("Copy {0} is already on loan")]
    CopyOnLoan(BookCopyId),

    /// An update targeted a row that does not exist.
    #[error("Row not found: {0}")]
    NotFound(String),

    /// A copy status change the transition table forbids.
    #[error("Copy {id} cannot move from {from} to {to}")]
    InvalidCopyTransition {
        id: BookCopyId,
        from: CopyStatus,
        to: CopyStatus,
    },

    /// A stored value could not be mapped back into the domain model.
    #[error("Invalid stored data: {0}")]
    InvalidData(#[from] ParseStatusError),

    /// The store refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
