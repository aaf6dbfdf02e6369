//! Fetch: import remote document metadata into the local catalog
//!
//! Never uploads and never deletes remote documents. Each remote document
//! is classified against the cached record and the file on disk; the file
//! is keyed by the document's display name, which is its local path.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ragsync_core::types::FileRecord;
use ragsync_remote::{Document, RemoteGateway, ResolvedStore};

use super::{inspect_disk_async, DiskState, Outcome, ReconcileReport};
use crate::catalog::Catalog;
use crate::checksum;

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Overwrite cached records even when disk and remote checksums disagree
    pub force: bool,
}

/// Record built from the remote document's metadata
fn record_from_document(doc: &Document, checksum: String) -> FileRecord {
    let uploaded_at = DateTime::parse_from_rfc3339(&doc.create_time)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    FileRecord {
        local_path: doc.display_name.clone(),
        remote_id: doc.name.clone(),
        remote_name: doc.display_name.clone(),
        checksum,
        size: doc.size_bytes,
        uploaded_at,
        mime_type: doc.mime_type.clone(),
    }
}

pub async fn fetch(
    gateway: &dyn RemoteGateway,
    catalog: &Catalog,
    store: &ResolvedStore,
    options: FetchOptions,
    cancel: &CancellationToken,
) -> Result<ReconcileReport> {
    let docs = gateway
        .list_documents(&store.id)
        .await
        .with_context(|| format!("listing documents in {}", store.id))?;

    let key = store.key();
    catalog.get_or_create_store(key);
    if !store.store.display_name.is_empty() {
        catalog.set_display_name(key, &store.store.display_name);
    }

    let mut report = ReconcileReport::default();
    for doc in &docs {
        if cancel.is_cancelled() {
            warn!("fetch cancelled; {} documents not examined", docs.len() - report.entries.len());
            break;
        }
        let (outcome, message) = classify(catalog, key, doc, options).await;
        match outcome {
            Outcome::Unchanged => debug!(name = %doc.display_name, "unchanged"),
            Outcome::Added | Outcome::Updated => {
                info!(name = %doc.display_name, %outcome, "fetched")
            }
            _ => warn!(
                name = %doc.display_name,
                %outcome,
                "{}",
                message.as_deref().unwrap_or_default()
            ),
        }
        report.push(doc.display_name.clone(), doc.name.clone(), outcome, message);
    }

    info!(store = %store.id, documents = docs.len(), tally = %report.tally, "fetch finished");
    Ok(report)
}

async fn classify(
    catalog: &Catalog,
    key: &str,
    doc: &Document,
    options: FetchOptions,
) -> (Outcome, Option<String>) {
    if doc.display_name.is_empty() {
        return (
            Outcome::Skipped,
            Some("document has no display name; cannot map it to a local path".into()),
        );
    }

    let remote = doc.checksum().map(checksum::normalize).unwrap_or_default();
    let cached = catalog.get_by_path(key, &doc.display_name);

    if let Some(c) = &cached {
        if !remote.is_empty() && c.checksum == remote && c.remote_id == doc.name {
            return (Outcome::Unchanged, None);
        }
    }

    let disk = match inspect_disk_async(&doc.display_name).await {
        DiskState::Present { checksum } => checksum,
        DiskState::Missing => {
            catalog.add_file(key, record_from_document(doc, remote));
            return (
                Outcome::NotFound,
                Some("file not found on disk; cached remote metadata anyway".into()),
            );
        }
        DiskState::Unreadable(e) => return (Outcome::Failed, Some(e)),
    };

    if remote.is_empty() {
        return match &cached {
            Some(c) if c.checksum == disk => {
                if c.remote_id == doc.name {
                    (Outcome::Unchanged, None)
                } else {
                    catalog.add_file(key, record_from_document(doc, disk));
                    (Outcome::Updated, Some("remote id updated".into()))
                }
            }
            Some(c) => (
                Outcome::NeedsUpload,
                Some(format!(
                    "local file changed since last sync and remote has no checksum \
                     (cache {}, file {disk})",
                    c.checksum
                )),
            ),
            None => {
                catalog.add_file(key, record_from_document(doc, disk));
                (
                    Outcome::Added,
                    Some("remote has no checksum; recorded the disk checksum".into()),
                )
            }
        };
    }

    if disk == remote {
        let outcome = if cached.is_some() {
            Outcome::Updated
        } else {
            Outcome::Added
        };
        catalog.add_file(key, record_from_document(doc, remote));
        return (outcome, None);
    }

    let detail = format!("checksum mismatch (local {disk}, remote {remote})");
    if options.force {
        catalog.add_file(key, record_from_document(doc, remote));
        (Outcome::Updated, Some(format!("{detail}; forced")))
    } else {
        (Outcome::Skipped, Some(format!("{detail}; use --force to override")))
    }
}
