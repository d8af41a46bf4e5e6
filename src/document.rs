// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-document state: content, version counter, and history. Component C.
//!
//! A `Document` has no locking of its own — it is only ever touched from inside the
//! single-writer task that owns it (see `session.rs`), which is what gives it single-writer
//! semantics per §5. Concurrent readers go through the same actor and see a consistent
//! `(content, version, history)` triple because the actor never yields mid-mutation.

use time::OffsetDateTime;

use crate::error::{EditError, SessionError};
use crate::ot::{self, Edit};

/// A point-in-time, read-only projection of a document, for REST-shaped queries (`read_only`
/// in §4.3) and for `document_state`/`content_update` broadcasts.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub id: String,
    pub content: String,
    pub version: u64,
    pub language: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Character count, line count, and commit count, mirroring the document-statistics query
/// of the system this core was distilled from (`get_document_stats` in `document_manager.py`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentStats {
    pub char_count: usize,
    pub line_count: usize,
    pub commit_count: u64,
}

/// One entry of a document's commit history, for inspection/audit tooling (the Rust analogue
/// of `get_document_history` in `document_manager.py`, minus its per-entry wall-clock
/// timestamp — this repo only stamps `updated_at` on the document as a whole, not per edit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// The version this edit produced (`history[k]` takes the document to version `k + 1`).
    pub version: u64,
    pub op_count: usize,
}

#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    content: String,
    version: u64,
    history: Vec<Edit>,
    language: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl Document {
    /// `get_or_create` at the single-document level: always succeeds, starting empty.
    pub fn new(id: impl Into<String>) -> Self {
        let now = OffsetDateTime::UNIX_EPOCH;
        Document {
            id: id.into(),
            content: String::new(),
            version: 0,
            history: Vec::new(),
            language: "plaintext".into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Construct a document with an explicit creation timestamp (production call sites pass
    /// `OffsetDateTime::now_utc()`; tests pass a fixed instant for determinism).
    pub fn new_at(id: impl Into<String>, created_at: OffsetDateTime) -> Self {
        Document {
            id: id.into(),
            content: String::new(),
            version: 0,
            history: Vec::new(),
            language: "plaintext".into(),
            created_at,
            updated_at: created_at,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn set_language(&mut self, language: impl Into<String>) {
        self.language = language.into();
    }

    /// `snapshot` — `(content, version)`.
    pub fn snapshot(&self) -> (String, u64) {
        (self.content.clone(), self.version)
    }

    /// `tail(from_version)` — history from `from_version` (inclusive) to current.
    pub fn tail(&self, from_version: u64) -> Result<&[Edit], SessionError> {
        if from_version > self.version {
            return Err(SessionError::StaleOrFutureVersion {
                client_version: from_version,
                current_version: self.version,
            });
        }
        Ok(&self.history[from_version as usize..])
    }

    /// Rebase `edit` (authored at `client_version`) onto the history tail, then commit it.
    /// Returns the transformed edit and the new version (§4.4 steps 1-4).
    pub fn rebase_and_commit(
        &mut self,
        edit: Edit,
        client_version: u64,
        now: OffsetDateTime,
    ) -> Result<(Edit, u64), SessionError> {
        let tail = self.tail(client_version)?;
        let rebased = ot::rebase(&edit, tail).map_err(SessionError::Edit)?;
        let new_version = self.commit(rebased.clone(), now)?;
        Ok((rebased, new_version))
    }

    /// Append `edit` to history, applying it to `content` and incrementing `version`.
    /// `now` stamps `updated_at`; production call sites pass `OffsetDateTime::now_utc()`.
    pub fn commit(&mut self, edit: Edit, now: OffsetDateTime) -> Result<u64, SessionError> {
        self.content = ot::apply(&self.content, &edit).map_err(SessionError::Edit)?;
        self.history.push(edit);
        self.version += 1;
        self.updated_at = now;
        debug_assert_eq!(self.version as usize, self.history.len());
        Ok(self.version)
    }

    /// The privileged hard-reset path (§4.4, §9): synthesize a full-replace edit against the
    /// current content, append it to history like any other commit (so replay and
    /// monotonicity invariants still hold), and return the new version.
    pub fn hard_reset(
        &mut self,
        new_content: String,
        now: OffsetDateTime,
    ) -> Result<u64, SessionError> {
        let edit = Edit::diff(&self.content, &new_content);
        self.commit(edit, now)
    }

    /// `read_only` — content, version, and metadata for out-of-protocol queries.
    pub fn snapshot_full(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            id: self.id.clone(),
            content: self.content.clone(),
            version: self.version,
            language: self.language.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn stats(&self) -> DocumentStats {
        DocumentStats {
            char_count: self.content.chars().count(),
            line_count: self.content.split('\n').count(),
            commit_count: self.version,
        }
    }

    /// Replay `history` from an empty string; used by tests to check invariant 6 and by
    /// recovery paths that want to rebuild `content` from scratch.
    pub fn replay(history: &[Edit]) -> Result<String, EditError> {
        let mut content = String::new();
        for edit in history {
            content = ot::apply(&content, edit)?;
        }
        Ok(content)
    }

    /// Content at an arbitrary past `version`, by replaying the history prefix (the Rust
    /// analogue of `get_document_at_version` in `document_manager.py`). `version` must be in
    /// `[0, self.version]`.
    pub fn content_at_version(&self, version: u64) -> Result<String, SessionError> {
        if version > self.version {
            return Err(SessionError::StaleOrFutureVersion {
                client_version: version,
                current_version: self.version,
            });
        }
        Ok(Document::replay(&self.history[..version as usize])?)
    }

    /// A compact, per-version summary of this document's history.
    pub fn history_entries(&self) -> Vec<HistoryEntry> {
        self.history
            .iter()
            .enumerate()
            .map(|(i, edit)| HistoryEntry {
                version: i as u64 + 1,
                op_count: edit.ops().len(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn at(seconds: i64) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(seconds)
    }

    #[test]
    fn commit_monotonicity() {
        let mut doc = Document::new("doc-1");
        assert_eq!(doc.version(), 0);
        let edit = Edit::diff("", "hello");
        let v1 = doc.commit(edit, at(1)).unwrap();
        assert_eq!(v1, 1);
        assert_eq!(doc.version(), 1);
        let edit2 = Edit::diff("hello", "hello world");
        let v2 = doc.commit(edit2, at(2)).unwrap();
        assert_eq!(v2, 2);
    }

    #[test]
    fn history_replay_matches_content_at_every_version() {
        let mut doc = Document::new("doc-1");
        let mut expected = Vec::new();
        for text in ["a", "ab", "abc", "abcabc"] {
            let before = doc.content().to_string();
            let edit = Edit::diff(&before, text);
            doc.commit(edit, at(0)).unwrap();
            expected.push(doc.content().to_string());
        }
        for (k, want) in expected.iter().enumerate() {
            let replayed = Document::replay(&doc.tail(0).unwrap()[..=k]).unwrap();
            assert_eq!(&replayed, want);
        }
    }

    #[test]
    fn tail_rejects_future_version() {
        let doc = Document::new("doc-1");
        assert!(matches!(
            doc.tail(1),
            Err(SessionError::StaleOrFutureVersion { .. })
        ));
    }

    #[test]
    fn content_at_version_replays_a_history_prefix() {
        let mut doc = Document::new("doc-1");
        doc.commit(Edit::diff("", "a"), at(1)).unwrap();
        doc.commit(Edit::diff("a", "ab"), at(2)).unwrap();
        doc.commit(Edit::diff("ab", "abc"), at(3)).unwrap();

        assert_eq!(doc.content_at_version(0).unwrap(), "");
        assert_eq!(doc.content_at_version(1).unwrap(), "a");
        assert_eq!(doc.content_at_version(2).unwrap(), "ab");
        assert_eq!(doc.content_at_version(3).unwrap(), "abc");
        assert!(matches!(
            doc.content_at_version(4),
            Err(SessionError::StaleOrFutureVersion { .. })
        ));
    }

    #[test]
    fn history_entries_tracks_version_and_op_count_per_commit() {
        let mut doc = Document::new("doc-1");
        doc.commit(Edit::diff("", "hello"), at(1)).unwrap();
        doc.commit(Edit::diff("hello", "hello world"), at(2)).unwrap();

        let entries = doc.history_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].version, 1);
        assert_eq!(entries[1].version, 2);
        assert_eq!(entries[1].op_count, doc.tail(1).unwrap()[0].ops().len());
    }

    #[test]
    fn hard_reset_bumps_version_and_preserves_replay() {
        let mut doc = Document::new("doc-1");
        doc.commit(Edit::diff("", "hello"), at(1)).unwrap();
        doc.hard_reset("goodbye".into(), at(2)).unwrap();
        assert_eq!(doc.version(), 2);
        assert_eq!(doc.content(), "goodbye");
        let replayed = Document::replay(doc.tail(0).unwrap()).unwrap();
        assert_eq!(replayed, "goodbye");
    }
}
