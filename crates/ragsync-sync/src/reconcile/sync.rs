//! Sync: bring cached remote ids back in line with the remote store
//!
//! Records matched by neither display name nor remote id are orphans and
//! are dropped. Records matched by display name whose id went stale get
//! the live id. Remote documents with no record are left for `fetch`.

use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ragsync_remote::{Document, RemoteGateway, ResolvedStore};

use super::{is_missing, Outcome, ReconcileReport};
use crate::catalog::Catalog;

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub reconcile: ReconcileReport,
    pub remote_documents: usize,
    /// Records left in the catalog afterwards
    pub local_entries: usize,
    /// Cached paths that no longer exist on disk (candidates for `clean`)
    pub missing_on_disk: Vec<String>,
}

pub async fn sync(
    gateway: &dyn RemoteGateway,
    catalog: &Catalog,
    store: &ResolvedStore,
    cancel: &CancellationToken,
) -> Result<SyncReport> {
    let docs = gateway
        .list_documents(&store.id)
        .await
        .with_context(|| format!("listing documents in {}", store.id))?;

    let key = store.key();
    catalog.get_or_create_store(key);
    if !store.store.display_name.is_empty() {
        catalog.set_display_name(key, &store.store.display_name);
    }

    // Newest document wins when display names collide
    let mut by_display: HashMap<&str, &Document> = HashMap::new();
    for doc in &docs {
        by_display
            .entry(doc.display_name.as_str())
            .and_modify(|cur| {
                if doc.newer_than(*cur) {
                    *cur = doc;
                }
            })
            .or_insert(doc);
    }
    let ids: HashSet<&str> = docs.iter().map(|d| d.name.as_str()).collect();

    let mut report = SyncReport {
        remote_documents: docs.len(),
        ..Default::default()
    };

    for mut record in catalog.all_files(key) {
        if cancel.is_cancelled() {
            warn!("sync cancelled");
            break;
        }
        match by_display.get(record.local_path.as_str()) {
            Some(doc) if doc.name != record.remote_id => {
                debug!(
                    path = %record.local_path,
                    old = %record.remote_id,
                    new = %doc.name,
                    "stale remote id"
                );
                record.remote_id = doc.name.clone();
                let id = record.remote_id.clone();
                let path = record.local_path.clone();
                catalog.add_file(key, record);
                report
                    .reconcile
                    .push(path, id, Outcome::Updated, Some("remote id updated".into()));
            }
            Some(_) => {
                report
                    .reconcile
                    .push(record.local_path, record.remote_id, Outcome::Unchanged, None);
            }
            None if ids.contains(record.remote_id.as_str()) => {
                report
                    .reconcile
                    .push(record.local_path, record.remote_id, Outcome::Unchanged, None);
            }
            None => {
                info!(path = %record.local_path, "removing orphaned record");
                catalog.remove_file(key, &record.local_path);
                report.reconcile.push(
                    record.local_path,
                    record.remote_id,
                    Outcome::Removed,
                    Some("no matching remote document".into()),
                );
            }
        }
    }

    let remaining = catalog.all_files(key);
    report.local_entries = remaining.len();
    report.missing_on_disk = remaining
        .into_iter()
        .filter(|r| match is_missing(Path::new(&r.local_path)) {
            Ok(missing) => missing,
            Err(e) => {
                warn!(path = %r.local_path, "cannot stat cached path: {e}");
                false
            }
        })
        .map(|r| r.local_path)
        .collect();

    info!(
        store = %store.id,
        remote = report.remote_documents,
        local = report.local_entries,
        tally = %report.reconcile.tally,
        missing = report.missing_on_disk.len(),
        "sync finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::make_record;

    #[tokio::test]
    async fn orphans_removed_and_stale_ids_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let gw = ragsync_remote::MemoryGateway::new();
        let catalog = Catalog::open(&dir.path().join("c.json")).unwrap();
        let store = ResolvedStore::new(gw.create_store("notes").await.unwrap());
        let key = store.key().to_string();

        let present = dir.path().join("present.md").to_string_lossy().into_owned();
        std::fs::write(&present, b"p").unwrap();
        let kept = gw.insert_document(&store.id, &present, None, 1);
        let record = make_record(&present, &kept.name, &present, "sha256:p", 1, "text/markdown");
        catalog.add_file(&key, record);

        // Same display name re-uploaded elsewhere: cached id is stale
        let record =
            make_record("/stale.md", "old-id", "/stale.md", "sha256:s", 1, "text/markdown");
        catalog.add_file(&key, record);
        gw.insert_document(&store.id, "/stale.md", None, 1);
        let newest = gw.insert_document(&store.id, "/stale.md", None, 1);

        let record =
            make_record("/orphan.md", "gone-id", "/orphan.md", "sha256:o", 1, "text/markdown");
        catalog.add_file(&key, record);

        let report = sync(&gw, &catalog, &store, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.reconcile.tally.removed, 1);
        assert_eq!(report.reconcile.tally.updated, 1);
        assert_eq!(report.reconcile.tally.unchanged, 1);
        assert_eq!(report.remote_documents, 3);
        assert_eq!(report.local_entries, 2);
        assert_eq!(report.missing_on_disk, vec!["/stale.md".to_string()]);

        assert!(catalog.get_by_path(&key, "/orphan.md").is_none());
        assert_eq!(catalog.get_by_path(&key, "/stale.md").unwrap().remote_id, newest.name);
        assert_eq!(gw.calls().delete_document, 0);
    }

    #[tokio::test]
    async fn record_matched_by_id_is_kept_after_rename() {
        let dir = tempfile::tempdir().unwrap();
        let gw = ragsync_remote::MemoryGateway::new();
        let catalog = Catalog::open(&dir.path().join("c.json")).unwrap();
        let store = ResolvedStore::new(gw.create_store("notes").await.unwrap());

        let doc = gw.insert_document(&store.id, "renamed.md", None, 1);
        let record = make_record("/orig.md", &doc.name, "/orig.md", "sha256:1", 1, "text/plain");
        catalog.add_file(store.key(), record);

        let report = sync(&gw, &catalog, &store, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.reconcile.tally.removed, 0);
        assert!(catalog.get_by_path(store.key(), "/orig.md").is_some());
    }

    #[tokio::test]
    async fn newest_duplicate_compared_as_instants() {
        let dir = tempfile::tempdir().unwrap();
        let gw = ragsync_remote::MemoryGateway::new();
        let catalog = Catalog::open(&dir.path().join("c.json")).unwrap();
        let store = ResolvedStore::new(gw.create_store("notes").await.unwrap());

        // Fractional seconds make the newer time sort lower as a string
        let newer = gw.insert_document(&store.id, "/dup.md", None, 1);
        gw.set_create_time(&newer.name, "2025-03-01T10:00:00.5Z");
        let older = gw.insert_document(&store.id, "/dup.md", None, 1);
        gw.set_create_time(&older.name, "2025-03-01T10:00:00Z");

        let record = make_record("/dup.md", "old-id", "/dup.md", "sha256:d", 1, "text/plain");
        catalog.add_file(store.key(), record);

        sync(&gw, &catalog, &store, &CancellationToken::new()).await.unwrap();
        let repaired = catalog.get_by_path(store.key(), "/dup.md").unwrap();
        assert_eq!(repaired.remote_id, newer.name);
    }
}
