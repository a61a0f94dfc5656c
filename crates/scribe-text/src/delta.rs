//! Editor-facing edit descriptions.
//!
//! An [`EditDelta`] is what an editor surface reports for a local change;
//! a [`TextChange`] is what a replica reports back after applying a
//! remote one.

use serde::{Deserialize, Serialize};

/// A `(row, column)` cursor position, both zero-based.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Index {
    pub row: usize,
    pub column: usize,
}

impl Index {
    pub fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditAction {
    Insert,
    Remove,
}

/// A contiguous insertion or removal.
///
/// `lines` is the affected text split on `'\n'`, so `["ab", ""]` stands for
/// `"ab\n"`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditDelta {
    pub action: EditAction,
    pub start: Index,
    pub end: Index,
    pub lines: Vec<String>,
}

impl EditDelta {
    /// Describe inserting `text` at `start`.
    pub fn insertion(start: Index, text: &str) -> Self {
        Self::spanning(EditAction::Insert, start, text)
    }

    /// Describe removing `text`, which begins at `start`.
    pub fn removal(start: Index, text: &str) -> Self {
        Self::spanning(EditAction::Remove, start, text)
    }

    fn spanning(action: EditAction, start: Index, text: &str) -> Self {
        let lines: Vec<String> = text.split('\n').map(str::to_string).collect();
        let end = end_of(start, &lines);
        Self {
            action,
            start,
            end,
            lines,
        }
    }

    /// The affected text with line breaks restored, one fragment per line.
    pub fn fragments(&self) -> Vec<String> {
        let last = self.lines.len().saturating_sub(1);
        self.lines
            .iter()
            .enumerate()
            .map(|(n, line)| {
                if n < last {
                    format!("{line}\n")
                } else {
                    line.clone()
                }
            })
            .collect()
    }

    /// Number of characters inserted or removed.
    pub fn char_count(&self) -> usize {
        let breaks = self.lines.len().saturating_sub(1);
        self.lines.iter().map(|l| l.chars().count()).sum::<usize>() + breaks
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Where text spanning `lines` ends when it starts at `start`.
pub(crate) fn end_of(start: Index, lines: &[String]) -> Index {
    let last = lines.last().map_or(0, |l| l.chars().count());
    if lines.len() <= 1 {
        Index::new(start.row, start.column + last)
    } else {
        Index::new(start.row + lines.len() - 1, last)
    }
}

/// A change produced by applying a remote operation.
///
/// A deleted newline reports `end` as the start of the following row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum TextChange {
    Insert { at: Index, text: String },
    Delete { start: Index, end: Index },
}
