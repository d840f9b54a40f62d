use thiserror::Error;

use crate::lookup::LookupError;
use crate::models::BookStatus;

/// Errors surfaced by the catalog and its stores.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// A required field is missing or empty; the caller should correct the input.
    #[error("validation error: {0}")]
    Validation(String),

    /// The underlying database is unavailable or a transaction did not commit.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The import payload is not a JSON array; nothing was processed.
    #[error("import format error: {0}")]
    ImportFormat(String),

    #[error("book {0} not found")]
    NotFound(i64),

    /// Lend on a lent book, or return on an available one.
    #[error("book {id} is already {status}")]
    InvalidTransition { id: i64, status: BookStatus },

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CatalogError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
