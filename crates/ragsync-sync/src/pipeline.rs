//! Upload pipeline: checksum, dedup and upload a batch of files with a
//! bounded worker pool
//!
//! Every input file yields exactly one `FileResult`, whatever the pool size.
//! Workers upsert their own catalog records; the caller saves the catalog
//! once after `run` returns.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ragsync_core::config::DEFAULT_PARALLELISM;
use ragsync_remote::{PollConfig, RemoteGateway, ResolvedStore, UploadBody};

use crate::catalog::{make_record, Catalog};
use crate::checksum::checksum_file;
use crate::discovery::DiscoveredFile;
use crate::resolver::CatalogResolver;
use crate::upload::{upload_document, UploadDisposition, UploadJob};

/// Called once per file, from the worker that processed it
pub type ProgressFn = Arc<dyn Fn(&FileResult) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Uploaded,
    /// Content unchanged since the last sync
    Skipped,
    Failed,
}

/// Outcome for one input file
#[derive(Debug, Clone)]
pub struct FileResult {
    pub path: PathBuf,
    pub status: FileStatus,
    pub remote_id: Option<String>,
    pub checksum: Option<String>,
    pub size: u64,
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

impl FileResult {
    fn failed(path: PathBuf, size: u64, error: impl Into<String>) -> Self {
        Self {
            path,
            status: FileStatus::Failed,
            remote_id: None,
            checksum: None,
            size,
            error: Some(error.into()),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct UploadReport {
    /// One entry per input file, in input order
    pub results: Vec<FileResult>,
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl UploadReport {
    fn from_results(results: Vec<FileResult>) -> Self {
        let mut report = UploadReport::default();
        for r in &results {
            match r.status {
                FileStatus::Uploaded => report.uploaded += 1,
                FileStatus::Skipped => report.skipped += 1,
                FileStatus::Failed => report.failed += 1,
            }
        }
        report.results = results;
        report
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn warnings(&self) -> impl Iterator<Item = (&PathBuf, &str)> {
        self.results
            .iter()
            .flat_map(|r| r.warnings.iter().map(move |w| (&r.path, w.as_str())))
    }
}

pub struct UploadPipeline {
    gateway: Arc<dyn RemoteGateway>,
    catalog: Arc<Catalog>,
    parallelism: usize,
    poll: PollConfig,
    cancel: CancellationToken,
}

/// Per-batch state cloned into every worker
#[derive(Clone)]
struct Worker {
    gateway: Arc<dyn RemoteGateway>,
    catalog: Arc<Catalog>,
    resolver: Arc<CatalogResolver>,
    store_id: String,
    store_key: String,
    poll: PollConfig,
    cancel: CancellationToken,
}

impl UploadPipeline {
    pub fn new(gateway: Arc<dyn RemoteGateway>, catalog: Arc<Catalog>, parallelism: usize) -> Self {
        Self {
            gateway,
            catalog,
            parallelism: if parallelism == 0 {
                DEFAULT_PARALLELISM
            } else {
                parallelism
            },
            poll: PollConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Files not yet started when `cancel` fires are reported as failed
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Upload `files` into `store`, at most `parallelism` at a time.
    pub async fn run(
        &self,
        store: &ResolvedStore,
        files: Vec<DiscoveredFile>,
        progress: Option<ProgressFn>,
    ) -> UploadReport {
        let total = files.len();
        info!(
            store = %store.id,
            files = total,
            parallelism = self.parallelism,
            "upload batch starting"
        );

        let worker = Worker {
            gateway: self.gateway.clone(),
            catalog: self.catalog.clone(),
            resolver: Arc::new(CatalogResolver::new(self.catalog.clone())),
            store_id: store.id.clone(),
            store_key: store.key().to_string(),
            poll: self.poll,
            cancel: self.cancel.clone(),
        };

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks: JoinSet<(usize, FileResult)> = JoinSet::new();
        let mut slots: Vec<Option<FileResult>> = vec![None; total];
        let inputs: Vec<(PathBuf, u64)> = files.iter().map(|f| (f.path.clone(), f.size)).collect();

        for (index, file) in files.into_iter().enumerate() {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let worker = worker.clone();
            let progress = progress.clone();
            tasks.spawn(async move {
                let result = worker.process(file).await;
                if let Some(cb) = &progress {
                    cb(&result);
                }
                drop(permit);
                (index, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!("upload worker panicked: {e}"),
            }
        }

        let results: Vec<FileResult> = slots
            .into_iter()
            .zip(inputs)
            .map(|(slot, (path, size))| {
                slot.unwrap_or_else(|| {
                    let result = FileResult::failed(path, size, "worker did not report a result");
                    if let Some(cb) = &progress {
                        cb(&result);
                    }
                    result
                })
            })
            .collect();

        let report = UploadReport::from_results(results);
        info!(
            store = %store.id,
            uploaded = report.uploaded,
            skipped = report.skipped,
            failed = report.failed,
            "upload batch finished"
        );
        report
    }
}

impl Worker {
    async fn process(&self, file: DiscoveredFile) -> FileResult {
        let DiscoveredFile {
            path,
            size,
            mime_type,
        } = file;

        if self.cancel.is_cancelled() {
            return FileResult::failed(path, size, "cancelled");
        }

        let hash_path = path.clone();
        let checksum = match tokio::task::spawn_blocking(move || checksum_file(&hash_path)).await {
            Ok(Ok(c)) => c,
            Ok(Err(e)) => return FileResult::failed(path, size, format!("{e:#}")),
            Err(e) => return FileResult::failed(path, size, format!("checksum task failed: {e}")),
        };

        if self.cancel.is_cancelled() {
            return FileResult::failed(path, size, "cancelled");
        }

        let identity = path.to_string_lossy().into_owned();
        let job = UploadJob {
            identity: identity.clone(),
            display_name: identity.clone(),
            mime_type: mime_type.clone(),
            checksum: checksum.clone(),
            body: UploadBody::File(path.clone()),
        };

        let outcome = match upload_document(
            self.gateway.as_ref(),
            self.resolver.as_ref(),
            &self.store_id,
            job,
            self.poll,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(path = %path.display(), "upload failed: {e:#}");
                return FileResult {
                    checksum: Some(checksum),
                    ..FileResult::failed(path, size, format!("{e:#}"))
                };
            }
        };

        let status = match &outcome.disposition {
            UploadDisposition::Unchanged { .. } => FileStatus::Skipped,
            UploadDisposition::Uploaded { remote_id, .. } => {
                self.catalog.add_file(
                    &self.store_key,
                    make_record(&identity, remote_id, &identity, &checksum, size, &mime_type),
                );
                FileStatus::Uploaded
            }
        };
        debug!(path = %path.display(), ?status, "file done");

        FileResult {
            remote_id: Some(outcome.remote_id().to_string()),
            checksum: Some(checksum),
            status,
            path,
            size,
            error: None,
            warnings: outcome.warnings,
        }
    }
}

/// Refuse to upload into a remote store that already holds documents when
/// the local catalog knows nothing about it: every file would be uploaded
/// again under the same display name.
pub async fn check_catalog_primed(
    gateway: &dyn RemoteGateway,
    catalog: &Catalog,
    store: &ResolvedStore,
) -> Result<()> {
    if catalog.file_count(store.key()) > 0 {
        return Ok(());
    }
    let docs = gateway
        .list_documents(&store.id)
        .await
        .with_context(|| format!("listing documents in {}", store.id))?;
    if !docs.is_empty() {
        bail!(
            "store '{}' already has {} remote documents but the local catalog is empty; \
             run `ragsync fetch` first to avoid duplicate uploads",
            store.store.display_name,
            docs.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragsync_remote::MemoryGateway;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        gateway: Arc<MemoryGateway>,
        catalog: Arc<Catalog>,
        store: ResolvedStore,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("docs");
        std::fs::create_dir_all(&root).unwrap();
        let gateway = Arc::new(MemoryGateway::new());
        let catalog = Arc::new(Catalog::open(&dir.path().join("catalog.json")).unwrap());
        let store = ResolvedStore::new(gateway.create_store("docs").await.unwrap());
        Fixture {
            _dir: dir,
            root,
            gateway,
            catalog,
            store,
        }
    }

    fn file(root: &std::path::Path, name: &str, content: &[u8]) -> DiscoveredFile {
        let path = root.join(name);
        std::fs::write(&path, content).unwrap();
        DiscoveredFile {
            path,
            size: content.len() as u64,
            mime_type: "text/plain".into(),
        }
    }

    fn fast_poll() -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(2),
            timeout: Some(Duration::from_secs(5)),
        }
    }

    #[tokio::test]
    async fn uploads_and_records_each_file() {
        let fx = fixture().await;
        let files = vec![file(&fx.root, "a.txt", b"a"), file(&fx.root, "b.txt", b"bb")];
        let pipeline =
            UploadPipeline::new(fx.gateway.clone(), fx.catalog.clone(), 2).with_poll(fast_poll());

        let report = pipeline.run(&fx.store, files, None).await;
        assert_eq!(report.uploaded, 2);
        assert!(!report.has_failures());
        assert_eq!(fx.catalog.file_count(fx.store.key()), 2);

        let rec = fx
            .catalog
            .get_by_path(fx.store.key(), &fx.root.join("b.txt").to_string_lossy())
            .unwrap();
        assert_eq!(rec.size, 2);
        assert_eq!(Some(rec.remote_id.as_str()), report.results[1].remote_id.as_deref());
    }

    #[tokio::test]
    async fn progress_called_once_per_file() {
        let fx = fixture().await;
        let files: Vec<_> = (0..7)
            .map(|i| file(&fx.root, &format!("f{i}.txt"), format!("{i}").as_bytes()))
            .collect();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let progress: ProgressFn = Arc::new(move |_r: &FileResult| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let pipeline = UploadPipeline::new(fx.gateway.clone(), fx.catalog.clone(), 3);
        let report = pipeline.run(&fx.store, files, Some(progress)).await;
        assert_eq!(report.results.len(), 7);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn unreadable_file_fails_without_remote_calls() {
        let fx = fixture().await;
        let ghost = DiscoveredFile {
            path: fx.root.join("ghost.txt"),
            size: 3,
            mime_type: "text/plain".into(),
        };
        let pipeline = UploadPipeline::new(fx.gateway.clone(), fx.catalog.clone(), 1);
        let report = pipeline.run(&fx.store, vec![ghost], None).await;
        assert_eq!(report.failed, 1);
        assert!(report.results[0].error.is_some());
        assert_eq!(fx.gateway.calls().upload, 0);
    }

    #[tokio::test]
    async fn zero_parallelism_uses_default() {
        let fx = fixture().await;
        let pipeline = UploadPipeline::new(fx.gateway.clone(), fx.catalog.clone(), 0);
        assert_eq!(pipeline.parallelism(), DEFAULT_PARALLELISM);
    }

    #[tokio::test]
    async fn primed_check_refuses_empty_catalog_against_populated_store() {
        let fx = fixture().await;
        check_catalog_primed(fx.gateway.as_ref(), &fx.catalog, &fx.store)
            .await
            .unwrap();

        fx.gateway.insert_document(&fx.store.id, "/elsewhere/a.txt", None, 1);
        let err = check_catalog_primed(fx.gateway.as_ref(), &fx.catalog, &fx.store)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("fetch"));

        fx.catalog.add_file(
            fx.store.key(),
            make_record("/elsewhere/a.txt", "x", "/elsewhere/a.txt", "sha256:1", 1, "text/plain"),
        );
        check_catalog_primed(fx.gateway.as_ref(), &fx.catalog, &fx.store)
            .await
            .unwrap();
    }
}
