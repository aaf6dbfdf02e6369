//! Status: compare every cached record against the file on disk

use std::fmt;
use std::path::Path;

use super::{inspect_disk, DiskState};
use crate::catalog::Catalog;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileState {
    Unchanged,
    /// Disk content differs from the cached checksum
    Modified,
    Missing,
    Error(String),
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileState::Unchanged => f.write_str("UNCHANGED"),
            FileState::Modified => f.write_str("MODIFIED"),
            FileState::Missing => f.write_str("MISSING"),
            FileState::Error(_) => f.write_str("ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub local_path: String,
    pub state: FileState,
}

#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    pub entries: Vec<StatusEntry>,
    pub unchanged: usize,
    pub modified: usize,
    pub missing: usize,
    pub errors: usize,
}

impl StatusReport {
    pub fn total(&self) -> usize {
        self.entries.len()
    }
}

/// Read-only; touches neither the remote store nor the catalog.
pub fn status(catalog: &Catalog, store_key: &str) -> StatusReport {
    let mut report = StatusReport::default();
    for record in catalog.all_files(store_key) {
        let state = match inspect_disk(Path::new(&record.local_path)) {
            DiskState::Missing => {
                report.missing += 1;
                FileState::Missing
            }
            DiskState::Unreadable(e) => {
                report.errors += 1;
                FileState::Error(e)
            }
            DiskState::Present { checksum } if checksum == record.checksum => {
                report.unchanged += 1;
                FileState::Unchanged
            }
            DiskState::Present { .. } => {
                report.modified += 1;
                FileState::Modified
            }
        };
        report.entries.push(StatusEntry {
            local_path: record.local_path,
            state,
        });
    }
    report
}
