//! Integration tests: two catalogs sharing one remote store
//!
//! Simulates a second machine (or a catalog that was lost) recovering
//! state with fetch, then sync and clean keeping it honest as the remote
//! and the disk drift.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ragsync_remote::{MemoryGateway, PollConfig, RemoteGateway, ResolvedStore};
use ragsync_sync::pipeline::{check_catalog_primed, UploadPipeline};
use ragsync_sync::reconcile::{self, FetchOptions, Outcome};
use ragsync_sync::{discover_files, Catalog, ExcludeSet};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn write_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, content).expect("write test file");
    path
}

async fn seeded() -> (TempDir, Arc<MemoryGateway>, ResolvedStore, Arc<Catalog>) {
    let tmp = TempDir::new().unwrap();
    let gateway = Arc::new(MemoryGateway::new());
    let store = ResolvedStore::new(gateway.create_store("shared").await.unwrap());
    let docs = tmp.path().join("docs");
    for name in ["a.md", "b.md", "c.md"] {
        write_test_file(&docs, name, name.as_bytes());
    }

    let catalog = Arc::new(Catalog::open(&tmp.path().join("machine-a.json")).unwrap());
    let files = discover_files(&[docs], &ExcludeSet::default()).unwrap();
    let report = UploadPipeline::new(gateway.clone(), catalog.clone(), 3)
        .with_poll(PollConfig {
            interval: Duration::from_millis(2),
            timeout: Some(Duration::from_secs(5)),
        })
        .run(&store, files, None)
        .await;
    assert_eq!(report.uploaded, 3);
    (tmp, gateway, store, catalog)
}

#[tokio::test]
async fn fresh_catalog_must_fetch_before_uploading() {
    let (tmp, gateway, store, _machine_a) = seeded().await;
    let machine_b = Catalog::open(&tmp.path().join("machine-b.json")).unwrap();

    let err = check_catalog_primed(gateway.as_ref(), &machine_b, &store)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("fetch"));

    let cancel = CancellationToken::new();
    let options = FetchOptions::default();
    let report = reconcile::fetch(gateway.as_ref(), &machine_b, &store, options, &cancel)
        .await
        .unwrap();
    assert_eq!(report.tally.added, 3);
    assert_eq!(report.tally.total(), 3);
    check_catalog_primed(gateway.as_ref(), &machine_b, &store)
        .await
        .unwrap();

    // Machine B now dedups exactly like machine A would
    let machine_b = Arc::new(machine_b);
    gateway.reset_calls();
    let files = discover_files(&[tmp.path().join("docs")], &ExcludeSet::default()).unwrap();
    let upload = UploadPipeline::new(gateway.clone(), machine_b, 2)
        .run(&store, files, None)
        .await;
    assert_eq!(upload.skipped, 3);
    assert_eq!(gateway.calls().upload, 0);
}

#[tokio::test]
async fn remote_deletion_is_an_orphan_for_sync() {
    let (tmp, gateway, store, catalog) = seeded().await;
    let victim = tmp.path().join("docs/b.md").to_string_lossy().into_owned();
    let record = catalog.get_by_path(store.key(), &victim).unwrap();
    gateway.remove_document(&record.remote_id);

    let report = reconcile::sync(gateway.as_ref(), &catalog, &store, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.reconcile.tally.removed, 1);
    let removed: Vec<_> = report.reconcile.with_outcome(Outcome::Removed).collect();
    assert_eq!(removed[0].name, victim);
    assert_eq!(report.local_entries, 2);
    assert!(report.missing_on_disk.is_empty());
}

#[tokio::test]
async fn clean_after_local_delete() {
    let (tmp, gateway, store, catalog) = seeded().await;
    std::fs::remove_file(tmp.path().join("docs/c.md")).unwrap();

    let missing = reconcile::files_missing_on_disk(&catalog, store.key());
    assert_eq!(missing.len(), 1);

    gateway.reset_calls();
    let report = reconcile::delete_confirmed(
        gateway.as_ref(),
        &catalog,
        store.key(),
        missing,
        &CancellationToken::new(),
    )
    .await;
    assert_eq!(report.tally.deleted, 1);
    assert_eq!(gateway.calls().delete_document, 1);
    assert_eq!(gateway.documents(&store.id).len(), 2);
    assert_eq!(catalog.file_count(store.key()), 2);

    let status = reconcile::status(&catalog, store.key());
    assert_eq!(status.unchanged, 2);
    assert_eq!(status.missing, 0);
}

#[tokio::test]
async fn local_edit_shows_as_modified_then_reuploads() {
    let (tmp, gateway, store, catalog) = seeded().await;
    write_test_file(&tmp.path().join("docs"), "a.md", b"edited");

    let status = reconcile::status(&catalog, store.key());
    assert_eq!(status.modified, 1);

    gateway.reset_calls();
    let files = discover_files(&[tmp.path().join("docs")], &ExcludeSet::default()).unwrap();
    let report = UploadPipeline::new(gateway.clone(), catalog.clone(), 3)
        .run(&store, files, None)
        .await;
    assert_eq!(report.uploaded, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(gateway.calls().delete_document, 1);
    assert_eq!(reconcile::status(&catalog, store.key()).unchanged, 3);
}
