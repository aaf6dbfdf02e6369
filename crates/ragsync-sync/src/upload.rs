//! Single-document upload: skip if unchanged, else delete old then upload new
//!
//! The remote keeps every upload as a separate document even when display
//! names collide, so replacing content means deleting the previous
//! document first. Two failures here are deliberately non-fatal: the
//! existing-document lookup and the stale-document delete. Both become
//! warnings on the outcome and the upload proceeds.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use ragsync_remote::{
    wait_for_operation, CustomMetadata, PollConfig, RemoteGateway, UploadBody, UploadRequest,
    CHECKSUM_KEY,
};

use crate::resolver::ExistingDocumentResolver;

/// Content ready to go to the remote store
#[derive(Debug, Clone)]
pub struct UploadJob {
    /// Key the resolver looks the file up by
    pub identity: String,
    pub display_name: String,
    pub mime_type: String,
    /// Tagged checksum of `body`
    pub checksum: String,
    pub body: UploadBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadDisposition {
    /// Remote already holds this content; nothing was sent
    Unchanged { remote_id: String },
    Uploaded {
        remote_id: String,
        /// Document this upload superseded, if any
        replaced: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub disposition: UploadDisposition,
    pub warnings: Vec<String>,
}

impl UploadOutcome {
    pub fn remote_id(&self) -> &str {
        match &self.disposition {
            UploadDisposition::Unchanged { remote_id } => remote_id,
            UploadDisposition::Uploaded { remote_id, .. } => remote_id,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        matches!(self.disposition, UploadDisposition::Unchanged { .. })
    }
}

/// Run the dedup decision and, if needed, the delete-then-upload sequence.
///
/// Steps are strictly ordered: lookup, optional delete, upload, poll.
pub async fn upload_document(
    gateway: &dyn RemoteGateway,
    resolver: &dyn ExistingDocumentResolver,
    store: &str,
    job: UploadJob,
    poll: PollConfig,
) -> Result<UploadOutcome> {
    let mut warnings = Vec::new();

    let existing = match resolver.resolve_existing(store, &job.identity).await {
        Ok(existing) => existing,
        Err(e) => {
            warn!(identity = %job.identity, "existing-document lookup failed: {e:#}");
            warnings.push(format!("could not look up existing document: {e:#}"));
            None
        }
    };

    if let Some(existing) = &existing {
        if !existing.checksum.is_empty() && existing.checksum == job.checksum {
            debug!(identity = %job.identity, "skip: unchanged since last sync");
            return Ok(UploadOutcome {
                disposition: UploadDisposition::Unchanged {
                    remote_id: existing.remote_id.clone(),
                },
                warnings,
            });
        }
    }

    let replaced = existing
        .map(|e| e.remote_id)
        .filter(|id| !id.is_empty());
    if let Some(old) = &replaced {
        match gateway.delete_document(old).await {
            Ok(()) => debug!(identity = %job.identity, old = %old, "deleted stale document"),
            Err(e) if e.is_not_found() => {
                debug!(identity = %job.identity, old = %old, "stale document already gone")
            }
            Err(e) => {
                warn!(identity = %job.identity, old = %old, "failed to delete stale document: {e}");
                warnings.push(format!("stale document {old} was not deleted: {e}"));
            }
        }
    }

    let request = UploadRequest {
        display_name: job.display_name.clone(),
        mime_type: job.mime_type.clone(),
        custom_metadata: vec![CustomMetadata::string(CHECKSUM_KEY, job.checksum.clone())],
        body: job.body,
    };
    let operation = gateway
        .upload(store, request)
        .await
        .with_context(|| format!("uploading {}", job.display_name))?;
    let operation = wait_for_operation(gateway, operation, poll)
        .await
        .with_context(|| format!("waiting for upload of {}", job.display_name))?;

    let remote_id = match operation.document_name() {
        Some(name) => name.to_string(),
        None => {
            warn!(operation = %operation.name, "upload finished without a document name");
            warnings.push(format!(
                "operation {} reported no document name; recorded the operation name instead",
                operation.name
            ));
            operation.name.clone()
        }
    };

    info!(
        identity = %job.identity,
        remote_id = %remote_id,
        checksum = %job.checksum,
        "uploaded"
    );
    Ok(UploadOutcome {
        disposition: UploadDisposition::Uploaded { remote_id, replaced },
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum_bytes;
    use crate::resolver::{ExistingDocument, RemoteMetadataResolver};
    use async_trait::async_trait;
    use ragsync_remote::MemoryGateway;
    use std::sync::Arc;
    use std::time::Duration;

    struct FailingResolver;

    #[async_trait]
    impl ExistingDocumentResolver for FailingResolver {
        async fn resolve_existing(&self, _: &str, _: &str) -> Result<Option<ExistingDocument>> {
            anyhow::bail!("lookup backend unavailable")
        }
    }

    struct Fixed(ExistingDocument);

    #[async_trait]
    impl ExistingDocumentResolver for Fixed {
        async fn resolve_existing(&self, _: &str, _: &str) -> Result<Option<ExistingDocument>> {
            Ok(Some(self.0.clone()))
        }
    }

    fn poll() -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(5),
            timeout: Some(Duration::from_secs(5)),
        }
    }

    fn job(name: &str, content: &[u8]) -> UploadJob {
        UploadJob {
            identity: name.into(),
            display_name: name.into(),
            mime_type: "text/plain".into(),
            checksum: checksum_bytes(content),
            body: UploadBody::Bytes(content.to_vec()),
        }
    }

    #[tokio::test]
    async fn lookup_failure_is_a_warning() {
        let gw = MemoryGateway::new();
        let store = gw.create_store("docs").await.unwrap();

        let out = upload_document(&gw, &FailingResolver, &store.name, job("/a", b"x"), poll())
            .await
            .unwrap();
        assert!(!out.is_unchanged());
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("lookup backend unavailable"));
        assert_eq!(gw.calls().upload, 1);
    }

    #[tokio::test]
    async fn stale_delete_failure_is_a_warning() {
        let gw = MemoryGateway::new();
        let store = gw.create_store("docs").await.unwrap();
        let old = gw.insert_document(&store.name, "/a", Some("sha256:old"), 1);
        gw.fail_deletes_for(&old.name);

        let resolver = Fixed(ExistingDocument {
            remote_id: old.name.clone(),
            checksum: "sha256:old".into(),
        });
        let out = upload_document(&gw, &resolver, &store.name, job("/a", b"new"), poll())
            .await
            .unwrap();
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains(&old.name));
        // Both documents now exist remotely
        assert_eq!(gw.documents(&store.name).len(), 2);
    }

    #[tokio::test]
    async fn remote_checksum_dedups_without_catalog() {
        let gw = Arc::new(MemoryGateway::new());
        let store = gw.create_store("docs").await.unwrap();
        let resolver = RemoteMetadataResolver::new(gw.clone());
        let notes = |body: &[u8]| job("notes.md", body);

        let first = upload_document(gw.as_ref(), &resolver, &store.name, notes(b"v1"), poll())
            .await
            .unwrap();
        assert!(!first.is_unchanged());

        let again = upload_document(gw.as_ref(), &resolver, &store.name, notes(b"v1"), poll())
            .await
            .unwrap();
        assert!(again.is_unchanged());
        assert_eq!(again.remote_id(), first.remote_id());

        let changed = upload_document(gw.as_ref(), &resolver, &store.name, notes(b"v2"), poll())
            .await
            .unwrap();
        match &changed.disposition {
            UploadDisposition::Uploaded { replaced, remote_id } => {
                assert_eq!(replaced.as_deref(), Some(first.remote_id()));
                assert_ne!(remote_id, first.remote_id());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(gw.calls().upload, 2);
        assert_eq!(gw.calls().delete_document, 1);
        assert_eq!(gw.documents(&store.name).len(), 1);
    }

    #[tokio::test]
    async fn upload_error_is_returned() {
        let gw = MemoryGateway::new();
        let store = gw.create_store("docs").await.unwrap();
        gw.fail_uploads_for("/bad");
        let resolver = Fixed(ExistingDocument {
            remote_id: String::new(),
            checksum: String::new(),
        });
        let err = upload_document(&gw, &resolver, &store.name, job("/bad", b"x"), poll())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("/bad"));
        assert_eq!(gw.calls().delete_document, 0);
    }
}
