//! Reconciliation between the local catalog, local disk and the remote store
//!
//! - `fetch`: import remote documents into the catalog
//! - `sync`: drop orphaned records, repair stale remote ids
//! - `clean`: delete remote documents whose local file is gone
//! - `status`: compare cached checksums against disk, read-only
//!
//! None of these fail fast on a single document. Each returns a report with
//! one entry per document or record it looked at and a tally by outcome.

pub mod clean;
pub mod fetch;
pub mod status;
pub mod sync;

use std::fmt;
use std::io::ErrorKind;
use std::path::Path;

use crate::checksum::checksum_file;

pub use clean::{
    delete_by_ids, delete_by_pattern, delete_confirmed, expand_document_ids, files_missing_on_disk,
    records_matching, scan_missing_on_disk, MissingScan,
};
pub use fetch::{fetch, FetchOptions};
pub use status::{status, FileState, StatusEntry, StatusReport};
pub use sync::{sync, SyncReport};

/// What happened to one document or record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Outcome {
    /// New catalog record created
    Added,
    /// Existing catalog record rewritten
    Updated,
    Unchanged,
    /// Left alone on purpose (checksum conflict, missing display name)
    Skipped,
    Failed,
    /// Imported, but the local file does not exist
    NotFound,
    /// Local file was edited after its last upload
    NeedsUpload,
    /// Catalog record dropped
    Removed,
    /// Remote document deleted
    Deleted,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Added => "added",
            Outcome::Updated => "updated",
            Outcome::Unchanged => "unchanged",
            Outcome::Skipped => "skipped",
            Outcome::Failed => "failed",
            Outcome::NotFound => "not found",
            Outcome::NeedsUpload => "needs upload",
            Outcome::Removed => "removed",
            Outcome::Deleted => "deleted",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts per outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub not_found: usize,
    pub needs_upload: usize,
    pub removed: usize,
    pub deleted: usize,
}

impl Tally {
    pub fn record(&mut self, outcome: Outcome) {
        let slot = match outcome {
            Outcome::Added => &mut self.added,
            Outcome::Updated => &mut self.updated,
            Outcome::Unchanged => &mut self.unchanged,
            Outcome::Skipped => &mut self.skipped,
            Outcome::Failed => &mut self.failed,
            Outcome::NotFound => &mut self.not_found,
            Outcome::NeedsUpload => &mut self.needs_upload,
            Outcome::Removed => &mut self.removed,
            Outcome::Deleted => &mut self.deleted,
        };
        *slot += 1;
    }

    pub fn get(&self, outcome: Outcome) -> usize {
        match outcome {
            Outcome::Added => self.added,
            Outcome::Updated => self.updated,
            Outcome::Unchanged => self.unchanged,
            Outcome::Skipped => self.skipped,
            Outcome::Failed => self.failed,
            Outcome::NotFound => self.not_found,
            Outcome::NeedsUpload => self.needs_upload,
            Outcome::Removed => self.removed,
            Outcome::Deleted => self.deleted,
        }
    }

    pub fn total(&self) -> usize {
        self.added
            + self.updated
            + self.unchanged
            + self.skipped
            + self.failed
            + self.not_found
            + self.needs_upload
            + self.removed
            + self.deleted
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

impl fmt::Display for Tally {
    /// Non-zero categories only, e.g. `added: 2, skipped: 1`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const ORDER: [Outcome; 9] = [
            Outcome::Added,
            Outcome::Updated,
            Outcome::Unchanged,
            Outcome::Skipped,
            Outcome::NotFound,
            Outcome::NeedsUpload,
            Outcome::Removed,
            Outcome::Deleted,
            Outcome::Failed,
        ];
        let parts: Vec<String> = ORDER
            .iter()
            .filter(|o| self.get(**o) > 0)
            .map(|o| format!("{o}: {}", self.get(*o)))
            .collect();
        if parts.is_empty() {
            f.write_str("nothing to do")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

/// One document or record the engine looked at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileEntry {
    /// Display name of the remote document, or the local path
    pub name: String,
    pub remote_id: String,
    pub outcome: Outcome,
    /// Warning or error detail
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub entries: Vec<ReconcileEntry>,
    pub tally: Tally,
}

impl ReconcileReport {
    pub(crate) fn push(
        &mut self,
        name: impl Into<String>,
        remote_id: impl Into<String>,
        outcome: Outcome,
        message: Option<String>,
    ) {
        self.tally.record(outcome);
        self.entries.push(ReconcileEntry {
            name: name.into(),
            remote_id: remote_id.into(),
            outcome,
            message,
        });
    }

    pub fn with_outcome(&self, outcome: Outcome) -> impl Iterator<Item = &ReconcileEntry> {
        self.entries.iter().filter(move |e| e.outcome == outcome)
    }

    pub fn has_failures(&self) -> bool {
        self.tally.has_failures()
    }
}

/// What is on disk at a cached path right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DiskState {
    Present { checksum: String },
    Missing,
    Unreadable(String),
}

pub(crate) fn inspect_disk(path: &Path) -> DiskState {
    match std::fs::metadata(path) {
        Err(e) if e.kind() == ErrorKind::NotFound => return DiskState::Missing,
        Err(e) => return DiskState::Unreadable(e.to_string()),
        Ok(meta) if !meta.is_file() => {
            return DiskState::Unreadable(format!("{} is not a regular file", path.display()))
        }
        Ok(_) => {}
    }
    match checksum_file(path) {
        Ok(checksum) => DiskState::Present { checksum },
        Err(e) => DiskState::Unreadable(format!("{e:#}")),
    }
}

/// Whether a cached path is gone. Only not-found counts as missing; any
/// other stat failure (permissions, symlink loop) is returned as an error.
pub(crate) fn is_missing(path: &Path) -> std::io::Result<bool> {
    path.try_exists().map(|exists| !exists)
}

/// `inspect_disk` off the async executor
pub(crate) async fn inspect_disk_async(path: &str) -> DiskState {
    let owned = std::path::PathBuf::from(path);
    tokio::task::spawn_blocking(move || inspect_disk(&owned))
        .await
        .unwrap_or_else(|e| DiskState::Unreadable(format!("checksum task failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_state_distinguishes_missing_from_present() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("f");
        assert_eq!(inspect_disk(&p), DiskState::Missing);
        std::fs::write(&p, b"").unwrap();
        assert_eq!(
            inspect_disk(&p),
            DiskState::Present {
                checksum: crate::checksum::checksum_bytes(b"")
            }
        );
        assert!(matches!(inspect_disk(dir.path()), DiskState::Unreadable(_)));
    }

    #[test]
    fn tally_counts_and_displays_non_zero() {
        let mut t = Tally::default();
        assert_eq!(t.to_string(), "nothing to do");
        t.record(Outcome::Added);
        t.record(Outcome::Added);
        t.record(Outcome::Skipped);
        assert_eq!(t.total(), 3);
        assert_eq!(t.to_string(), "added: 2, skipped: 1");
        assert!(!t.has_failures());
        t.record(Outcome::Failed);
        assert!(t.has_failures());
    }

    #[test]
    fn report_filters_by_outcome() {
        let mut r = ReconcileReport::default();
        r.push("/a", "d1", Outcome::Updated, None);
        r.push("/b", "d2", Outcome::Skipped, Some("checksum mismatch".into()));
        let skipped: Vec<_> = r.with_outcome(Outcome::Skipped).collect();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].name, "/b");
        assert_eq!(r.tally.updated, 1);
    }
}
