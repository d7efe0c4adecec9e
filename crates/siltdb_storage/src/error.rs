//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No backend factory is registered under the requested name.
    #[error("no backend available for {name:?}")]
    BackendUnavailable {
        /// The factory name that failed to resolve.
        name: String,
    },

    /// The database does not exist and creation was not requested.
    #[error("database {name:?} does not exist")]
    DatabaseMissing {
        /// Name of the missing database.
        name: String,
    },

    /// The backend handle is closed.
    #[error("backend is closed")]
    Closed,

    /// Stored data is corrupted or has an unexpected shape.
    #[error("storage corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },
}

impl StorageError {
    /// Creates a backend-unavailable error.
    pub fn backend_unavailable(name: impl Into<String>) -> Self {
        Self::BackendUnavailable { name: name.into() }
    }

    /// Creates a database-missing error.
    pub fn database_missing(name: impl Into<String>) -> Self {
        Self::DatabaseMissing { name: name.into() }
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}
