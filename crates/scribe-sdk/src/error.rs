//! Error types for the Scribe SDK.

use crate::network::PeerId;
use crate::persist::CacheError;
use scribe_core::OrderingError;
use scribe_text::CrdtError;
use thiserror::Error;

/// Error type for SDK operations.
#[derive(Error, Debug)]
pub enum SdkError {
    /// Identifier generation failed; the local document is inconsistent.
    #[error("Ordering error: {0}")]
    Ordering(#[from] OrderingError),

    /// An edit did not match the current document.
    #[error("Text operation error: {0}")]
    TextOperation(String),

    /// The replica is not connected to its session, or has shut down.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(PeerId),

    #[error("Persistence error: {0}")]
    Persistence(#[from] CacheError),
}

impl From<CrdtError> for SdkError {
    fn from(err: CrdtError) -> Self {
        match err {
            CrdtError::Ordering(e) => SdkError::Ordering(e),
            CrdtError::TextOperation(reason) => SdkError::TextOperation(reason),
        }
    }
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;
