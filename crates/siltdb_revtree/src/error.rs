//! Error types for revision-tree operations.

use thiserror::Error;

/// Result type for revision-tree operations.
pub type TreeResult<T> = Result<T, TreeError>;

/// Errors that can occur while parsing documents or merging revisions.
#[derive(Debug, Error)]
pub enum TreeError {
    /// A document id is missing, non-string, or reserved.
    #[error("invalid document id: {message}")]
    BadId {
        /// Description of the problem.
        message: String,
    },

    /// A revision string does not have the `<generation>-<hash>` shape.
    #[error("invalid revision: {rev:?}")]
    BadRevision {
        /// The offending revision string.
        rev: String,
    },

    /// The document body is not a JSON object or carries malformed
    /// reserved fields.
    #[error("invalid document: {message}")]
    BadDoc {
        /// Description of the problem.
        message: String,
    },

    /// The edit does not extend a current leaf of the revision tree.
    #[error("document update conflict on {id:?}")]
    Conflict {
        /// Id of the conflicting document.
        id: String,
    },
}

impl TreeError {
    /// Creates a bad-id error.
    pub fn bad_id(message: impl Into<String>) -> Self {
        Self::BadId {
            message: message.into(),
        }
    }

    /// Creates a bad-revision error.
    pub fn bad_revision(rev: impl Into<String>) -> Self {
        Self::BadRevision { rev: rev.into() }
    }

    /// Creates a bad-document error.
    pub fn bad_doc(message: impl Into<String>) -> Self {
        Self::BadDoc {
            message: message.into(),
        }
    }

    /// Creates an update-conflict error.
    pub fn conflict(id: impl Into<String>) -> Self {
        Self::Conflict { id: id.into() }
    }
}
