//! Local-driven remote deletion
//!
//! Selection and deletion are separate so the caller can confirm the
//! selection with the user in between.

use anyhow::{Context, Result};
use regex::Regex;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ragsync_core::types::FileRecord;
use ragsync_remote::types::{document_id, short_store_id};
use ragsync_remote::RemoteGateway;

use super::{is_missing, Outcome, ReconcileReport};
use crate::catalog::Catalog;

/// Cached records split by what a stat of their local path says
#[derive(Debug, Default)]
pub struct MissingScan {
    /// Local file does not exist
    pub missing: Vec<FileRecord>,
    /// Stat failed for another reason; never a deletion candidate
    pub unreadable: Vec<(FileRecord, String)>,
}

pub fn scan_missing_on_disk(catalog: &Catalog, store_key: &str) -> MissingScan {
    let mut scan = MissingScan::default();
    for record in catalog.all_files(store_key) {
        match is_missing(Path::new(&record.local_path)) {
            Ok(true) => scan.missing.push(record),
            Ok(false) => {}
            Err(e) => {
                warn!(path = %record.local_path, "cannot stat cached path: {e}");
                scan.unreadable.push((record, e.to_string()));
            }
        }
    }
    scan
}

/// Cached records whose local file no longer exists
pub fn files_missing_on_disk(catalog: &Catalog, store_key: &str) -> Vec<FileRecord> {
    scan_missing_on_disk(catalog, store_key).missing
}

/// Cached records whose local path matches `pattern`
pub fn records_matching(
    catalog: &Catalog,
    store_key: &str,
    pattern: &str,
) -> Result<Vec<FileRecord>> {
    let re = Regex::new(pattern).with_context(|| format!("invalid pattern '{pattern}'"))?;
    Ok(catalog
        .all_files(store_key)
        .into_iter()
        .filter(|r| re.is_match(&r.local_path))
        .collect())
}

/// Delete each record's remote document, then drop the record.
///
/// A document that is already gone counts as deleted. A record that was
/// never uploaded is only dropped locally. On any other failure the record
/// stays so the next run can retry.
pub async fn delete_confirmed(
    gateway: &dyn RemoteGateway,
    catalog: &Catalog,
    store_key: &str,
    records: Vec<FileRecord>,
    cancel: &CancellationToken,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    for record in records {
        if cancel.is_cancelled() {
            warn!("delete cancelled");
            break;
        }
        if !record.is_uploaded() {
            catalog.remove_file(store_key, &record.local_path);
            report.push(
                record.local_path,
                "",
                Outcome::Removed,
                Some("never uploaded; removed from catalog only".into()),
            );
            continue;
        }
        match gateway.delete_document(&record.remote_id).await {
            Ok(()) => {
                catalog.remove_file(store_key, &record.local_path);
                info!(path = %record.local_path, remote_id = %record.remote_id, "deleted");
                report.push(record.local_path, record.remote_id, Outcome::Deleted, None);
            }
            Err(e) if e.is_not_found() => {
                catalog.remove_file(store_key, &record.local_path);
                report.push(
                    record.local_path,
                    record.remote_id,
                    Outcome::Deleted,
                    Some("remote document was already gone".into()),
                );
            }
            Err(e) => {
                warn!(path = %record.local_path, "delete failed: {e}");
                let detail = Some(e.to_string());
                report.push(record.local_path, record.remote_id, Outcome::Failed, detail);
            }
        }
    }
    report
}

/// Select by pattern and delete without confirmation
pub async fn delete_by_pattern(
    gateway: &dyn RemoteGateway,
    catalog: &Catalog,
    store_key: &str,
    pattern: &str,
    cancel: &CancellationToken,
) -> Result<ReconcileReport> {
    let records = records_matching(catalog, store_key, pattern)?;
    Ok(delete_confirmed(gateway, catalog, store_key, records, cancel).await)
}

/// Qualify bare document ids with the store
pub fn expand_document_ids<S: AsRef<str>>(store_id: &str, ids: &[S]) -> Vec<String> {
    ids.iter().map(|id| document_id(store_id, id.as_ref())).collect()
}

/// Delete documents by id, dropping any catalog record that points at them.
/// Unlike `delete_confirmed`, a missing document is a failure: the caller
/// named it explicitly.
pub async fn delete_by_ids<S: AsRef<str>>(
    gateway: &dyn RemoteGateway,
    catalog: &Catalog,
    store_id: &str,
    ids: &[S],
    cancel: &CancellationToken,
) -> ReconcileReport {
    let key = short_store_id(store_id);
    let mut report = ReconcileReport::default();
    for id in expand_document_ids(store_id, ids) {
        if cancel.is_cancelled() {
            warn!("delete cancelled");
            break;
        }
        match gateway.delete_document(&id).await {
            Ok(()) => {
                let cached = catalog.get_by_remote_id(key, &id);
                let message = cached.as_ref().map(|r| {
                    catalog.remove_file(key, &r.local_path);
                    format!("removed from catalog: {}", r.local_path)
                });
                info!(remote_id = %id, "deleted");
                report.push(id.clone(), id, Outcome::Deleted, message);
            }
            Err(e) => {
                warn!(remote_id = %id, "delete failed: {e}");
                report.push(id.clone(), id, Outcome::Failed, Some(e.to_string()));
            }
        }
    }
    report
}
