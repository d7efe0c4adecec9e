//! Error types for the storage engine.

use siltdb_revtree::TreeError;
use siltdb_storage::StorageError;
use std::fmt;
use thiserror::Error;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Why a document read found nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingReason {
    /// The document (or requested revision body) does not exist.
    Missing,
    /// The document exists but its winning revision is a deletion.
    Deleted,
}

impl fmt::Display for MissingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingReason::Missing => write!(f, "missing"),
            MissingReason::Deleted => write!(f, "deleted"),
        }
    }
}

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Document not found, or found deleted.
    #[error("not found: {reason}")]
    Missing {
        /// Whether the document is absent or deleted.
        reason: MissingReason,
    },

    /// A bulk write referenced an attachment stub whose digest is not in
    /// the attachment store.
    #[error("unknown stub attachment {digest:?}")]
    MissingStub {
        /// The unknown digest.
        digest: String,
    },

    /// An edit did not match the document's current revision.
    #[error("document update conflict on {id:?}")]
    RevConflict {
        /// Id of the conflicting document.
        id: String,
    },

    /// Malformed caller input.
    #[error("invalid argument: {message}")]
    BadArgument {
        /// Description of the problem.
        message: String,
    },

    /// Operation on a closed database.
    #[error("database is not open")]
    NotOpen,

    /// No backend could be loaded at open.
    #[error("no backend available for {name:?}")]
    BackendUnavailable {
        /// The backend factory name.
        name: String,
    },

    /// Stored rows disagree with each other.
    #[error("corruption: {message}")]
    Corruption {
        /// Description of the disagreement.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a missing-document error.
    #[must_use]
    pub fn missing() -> Self {
        Self::Missing {
            reason: MissingReason::Missing,
        }
    }

    /// Creates a deleted-document error.
    #[must_use]
    pub fn deleted() -> Self {
        Self::Missing {
            reason: MissingReason::Deleted,
        }
    }

    /// Creates a missing-stub error.
    pub fn missing_stub(digest: impl Into<String>) -> Self {
        Self::MissingStub {
            digest: digest.into(),
        }
    }

    /// Creates a revision-conflict error.
    pub fn rev_conflict(id: impl Into<String>) -> Self {
        Self::RevConflict { id: id.into() }
    }

    /// Creates a bad-argument error.
    pub fn bad_argument(message: impl Into<String>) -> Self {
        Self::BadArgument {
            message: message.into(),
        }
    }

    /// Creates a backend-unavailable error.
    pub fn backend_unavailable(name: impl Into<String>) -> Self {
        Self::BackendUnavailable { name: name.into() }
    }

    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates an invalid-operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

impl From<TreeError> for CoreError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::Conflict { id } => Self::RevConflict { id },
            other => Self::BadArgument {
                message: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corruption {
            message: err.to_string(),
        }
    }
}
