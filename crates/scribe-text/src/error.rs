//! Error types for the text CRDT.

use scribe_core::OrderingError;
use thiserror::Error;

/// Errors raised while applying local or remote edits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrdtError {
    #[error(transparent)]
    Ordering(#[from] OrderingError),

    /// The edit does not describe a valid operation on the current document.
    #[error("Invalid text operation: {0}")]
    TextOperation(String),
}

impl CrdtError {
    pub(crate) fn text(reason: impl Into<String>) -> Self {
        CrdtError::TextOperation(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, CrdtError>;
