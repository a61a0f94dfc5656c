//! A single replicated character.

use scribe_core::{Identifier, SiteId};
use serde::{Deserialize, Serialize};

/// A character tagged with its position and provenance.
///
/// `origin` is the site that inserted it and `counter` that site's
/// insertion number; together they name the operation for causal gating.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Char {
    pub id: Identifier,
    #[serde(rename = "originPeer")]
    pub origin: SiteId,
    pub counter: u64,
    pub data: char,
}

impl Char {
    pub fn new(id: Identifier, origin: SiteId, counter: u64, data: char) -> Self {
        Self {
            id,
            origin,
            counter,
            data,
        }
    }

    pub fn is_newline(&self) -> bool {
        self.data == '\n'
    }
}

/// Lines of characters. Every line but the last ends with `'\n'`.
pub type Document = Vec<Vec<Char>>;

/// Concatenate a document back into plain text.
pub fn to_text(document: &Document) -> String {
    document.iter().flatten().map(|c| c.data).collect()
}
