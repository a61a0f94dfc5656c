//! # Scribe Text
//!
//! A sequence CRDT for collaborative plain-text editing.
//!
//! The document is a list of lines of [`Char`]s. Local edits arrive as
//! [`EditDelta`]s from an editor and produce characters to broadcast;
//! remote characters are integrated by identifier and reported back as
//! [`TextChange`]s.
//!
//! ```rust
//! use scribe_core::SiteId;
//! use scribe_text::{EditDelta, Index, SequenceCrdt};
//!
//! let mut alice = SequenceCrdt::new(SiteId::new("alice"));
//! let mut bob = SequenceCrdt::new(SiteId::new("bob"));
//!
//! let chars = alice.local_insert(&EditDelta::insertion(Index::new(0, 0), "hi\nthere")).unwrap();
//! for ch in chars {
//!     bob.remote_insert(ch).unwrap();
//! }
//! assert_eq!(bob.text(), "hi\nthere");
//! ```

pub mod character;
pub mod crdt;
pub mod delta;
pub mod error;

pub use character::{to_text, Char, Document};
pub use crdt::SequenceCrdt;
pub use delta::{EditAction, EditDelta, Index, TextChange};
pub use error::{CrdtError, Result};
