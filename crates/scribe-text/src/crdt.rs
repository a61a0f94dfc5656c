//! Sequence CRDT over lines of characters.
//!
//! Every character carries a unique [`Identifier`]; the document is the set
//! of live characters sorted by identifier and cut into lines after each
//! newline. Inserts commute because identifiers are dense and unique.
//! Deletes are held back until the insert they target has been observed,
//! which the [`VersionVector`] decides.

use crate::character::{to_text, Char, Document};
use crate::delta::{end_of, EditAction, EditDelta, Index, TextChange};
use crate::error::{CrdtError, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use scribe_core::{Identifier, SiteId, Version, VersionVector, BASE};
use tracing::debug;

/// A replica of a plain-text document.
#[derive(Clone, Debug)]
pub struct SequenceCrdt {
    site: SiteId,
    document: Document,
    version: VersionVector,
    /// Remote deletions waiting for their insert to be observed.
    buffer: Vec<Char>,
    rng: StdRng,
}

impl SequenceCrdt {
    pub fn new(site: SiteId) -> Self {
        Self::with_rng(site, StdRng::from_entropy())
    }

    /// Create a replica whose identifier choices are reproducible.
    pub fn with_seed(site: SiteId, seed: u64) -> Self {
        Self::with_rng(site, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(site: SiteId, rng: StdRng) -> Self {
        Self {
            version: VersionVector::new(site.clone()),
            site,
            document: vec![Vec::new()],
            buffer: Vec::new(),
            rng,
        }
    }

    pub fn site(&self) -> &SiteId {
        &self.site
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn version(&self) -> &VersionVector {
        &self.version
    }

    pub fn pending_deletes(&self) -> &[Char] {
        &self.buffer
    }

    pub fn text(&self) -> String {
        to_text(&self.document)
    }

    /// Lines of text without their trailing newlines.
    pub fn lines(&self) -> Vec<String> {
        self.document
            .iter()
            .map(|line| line.iter().map(|c| c.data).filter(|&c| c != '\n').collect())
            .collect()
    }

    /// Number of live characters, newlines included.
    pub fn len(&self) -> usize {
        self.document.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply an editor delta, dispatching on its action.
    pub fn apply_local(&mut self, delta: &EditDelta) -> Result<Vec<Char>> {
        match delta.action {
            EditAction::Insert => self.local_insert(delta),
            EditAction::Remove => self.local_delete(delta),
        }
    }

    /// Insert the text of `delta` at `delta.start`.
    ///
    /// Returns the new characters in document order, ready to broadcast.
    pub fn local_insert(&mut self, delta: &EditDelta) -> Result<Vec<Char>> {
        if delta.action != EditAction::Insert {
            return Err(CrdtError::text("delta is not an insert"));
        }
        self.check_cursor(delta.start)?;
        let expected = end_of(delta.start, &delta.lines);
        if expected.column != delta.end.column {
            return Err(CrdtError::text(format!(
                "insert ends at column {}, delta claims {}",
                expected.column, delta.end.column
            )));
        }

        let mut prev = self.char_before(delta.start).map(|c| c.id.clone()).unwrap_or_default();
        let next = self.char_at(delta.start).map(|c| c.id.clone()).unwrap_or_default();
        let Index { mut row, mut column } = delta.start;
        let mut inserted = Vec::with_capacity(delta.char_count());

        for data in delta.fragments().iter().flat_map(|f| f.chars()) {
            let counter = self.version.update_local_version();
            let id = Identifier::between(&prev, &next, &self.site, &mut self.rng)?;
            let ch = Char::new(id, self.site.clone(), counter, data);

            self.document[row].insert(column, ch.clone());
            column += 1;
            if ch.is_newline() {
                let tail = self.document[row].split_off(column);
                self.document.insert(row + 1, tail);
                row += 1;
                column = 0;
            }
            prev = ch.id.clone();
            inserted.push(ch);
        }

        debug!(site = %self.site, chars = inserted.len(), "local insert");
        Ok(inserted)
    }

    /// Remove the text of `delta`, walking backward from `delta.end`.
    ///
    /// Returns the removed characters, last one first.
    pub fn local_delete(&mut self, delta: &EditDelta) -> Result<Vec<Char>> {
        if delta.action != EditAction::Remove {
            return Err(CrdtError::text("delta is not a removal"));
        }
        self.check_cursor(delta.start)?;
        self.check_cursor(delta.end)?;
        let count = delta.char_count();

        // Dry run over line lengths so a bad delta leaves the document intact.
        let (mut row, mut after) = (delta.end.row, delta.end.column);
        for _ in 0..count {
            if after == 0 {
                if row == 0 {
                    return Err(CrdtError::text("removal runs past the start of the document"));
                }
                row -= 1;
                after = self.document[row].len();
            }
            after -= 1;
        }
        if after != delta.start.column {
            return Err(CrdtError::text(format!(
                "removal ends at column {after}, delta starts at column {}",
                delta.start.column
            )));
        }

        let (mut row, mut after) = (delta.end.row, delta.end.column);
        let mut removed = Vec::with_capacity(count);
        for _ in 0..count {
            if after == 0 {
                row -= 1;
                after = self.document[row].len();
            }
            after -= 1;
            let ch = self.document[row].remove(after);
            if ch.is_newline() && row + 1 < self.document.len() {
                let tail = self.document.remove(row + 1);
                self.document[row].extend(tail);
            }
            removed.push(ch);
        }

        debug!(site = %self.site, chars = removed.len(), "local delete");
        Ok(removed)
    }

    /// Integrate a character inserted by another replica.
    ///
    /// Returns the change for the editor, followed by any buffered
    /// deletions that became applicable.
    pub fn remote_insert(&mut self, ch: Char) -> Result<Vec<TextChange>> {
        if ch.id.positions().iter().any(|p| p.digit >= BASE) {
            return Err(CrdtError::text(format!("character {} has a digit outside the tree", ch.id)));
        }
        let at = self.insert_position(&ch.id)?;
        let text = ch.data.to_string();
        let (origin, counter) = (ch.origin.clone(), ch.counter);
        let newline = ch.is_newline();

        self.document[at.row].insert(at.column, ch);
        if newline {
            let tail = self.document[at.row].split_off(at.column + 1);
            self.document.insert(at.row + 1, tail);
        }
        self.version.update_remote_version(&origin, counter);

        let mut changes = vec![TextChange::Insert { at, text }];
        changes.extend(self.process_buffer());
        Ok(changes)
    }

    /// Queue a remote deletion and apply every queued one that is ready.
    pub fn remote_delete(&mut self, ch: Char) -> Vec<TextChange> {
        self.buffer.push(ch);
        self.process_buffer()
    }

    /// Replace the whole replica state with a snapshot from the host.
    ///
    /// Without `versions` the remote version state is rebuilt from the
    /// characters of the snapshot.
    pub fn install_snapshot(&mut self, document: Document, versions: Option<Vec<Version>>) {
        self.document = if document.is_empty() { vec![Vec::new()] } else { document };
        self.buffer.clear();
        match versions {
            Some(versions) => self.version.install_remote(versions),
            None => {
                self.version.clear_remote();
                for ch in self.document.iter().flatten() {
                    if ch.origin != self.site {
                        self.version.update_remote_version(&ch.origin, ch.counter);
                    }
                }
            }
        }
        debug!(site = %self.site, chars = self.len(), "installed snapshot");
    }

    /// Document and version state for a joining replica.
    pub fn snapshot(&self) -> (Document, Vec<Version>) {
        (self.document.clone(), self.version.export())
    }

    /// Locate a live character by identifier.
    pub fn find(&self, id: &Identifier) -> Option<Index> {
        let row = self.row_for(id);
        let line = self.document.get(row)?;
        let column = line.partition_point(|c| c.id < *id);
        line.get(column)
            .filter(|c| c.id == *id)
            .map(|_| Index::new(row, column))
    }

    fn process_buffer(&mut self) -> Vec<TextChange> {
        let mut changes = Vec::new();
        let mut n = 0;
        while n < self.buffer.len() {
            let ready = self.version.committed(&self.buffer[n].origin, self.buffer[n].counter);
            if !ready {
                n += 1;
                continue;
            }
            let ch = self.buffer.remove(n);
            if let Some(change) = self.splice_out(&ch) {
                changes.push(change);
            }
        }
        changes
    }

    fn splice_out(&mut self, ch: &Char) -> Option<TextChange> {
        let Some(start) = self.find(&ch.id) else {
            debug!(site = %self.site, id = %ch.id, "deleted character already gone");
            return None;
        };
        let removed = self.document[start.row].remove(start.column);
        let end = if removed.is_newline() {
            if start.row + 1 < self.document.len() {
                let tail = self.document.remove(start.row + 1);
                self.document[start.row].extend(tail);
            }
            Index::new(start.row + 1, 0)
        } else {
            Index::new(start.row, start.column + 1)
        };
        Some(TextChange::Delete { start, end })
    }

    /// First line whose last identifier is not below `id`.
    fn row_for(&self, id: &Identifier) -> usize {
        self.document
            .partition_point(|line| line.last().is_some_and(|c| c.id < *id))
    }

    fn insert_position(&self, id: &Identifier) -> Result<Index> {
        let row = self.row_for(id);
        if row == self.document.len() {
            // Past every line: append to the last one, which has no newline.
            let last = self.document.len() - 1;
            return Ok(Index::new(last, self.document[last].len()));
        }
        let line = &self.document[row];
        let column = line.partition_point(|c| c.id < *id);
        if line.get(column).is_some_and(|c| c.id == *id) {
            return Err(CrdtError::text(format!("character {id} already present")));
        }
        Ok(Index::new(row, column))
    }

    /// Validate a cursor against the visible extent of its line.
    fn check_cursor(&self, at: Index) -> Result<()> {
        let line = self.document.get(at.row).ok_or_else(|| {
            CrdtError::text(format!(
                "row {} out of range ({} lines)",
                at.row,
                self.document.len()
            ))
        })?;
        let visible = line.len() - usize::from(line.last().is_some_and(Char::is_newline));
        if at.column > visible {
            return Err(CrdtError::text(format!(
                "column {} out of range on row {} (length {visible})",
                at.column, at.row
            )));
        }
        Ok(())
    }

    fn char_before(&self, at: Index) -> Option<&Char> {
        if at.column > 0 {
            self.document[at.row].get(at.column - 1)
        } else if at.row > 0 {
            self.document[at.row - 1].last()
        } else {
            None
        }
    }

    fn char_at(&self, at: Index) -> Option<&Char> {
        self.document[at.row].get(at.column)
    }
}
