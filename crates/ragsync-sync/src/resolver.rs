//! Lookup of the document currently holding a file's content
//!
//! The command line dedups against the local catalog; the assistant
//! surface has no catalog and dedups against checksums stored in remote
//! custom metadata. Both feed the same delete-then-upload core.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use ragsync_remote::types::short_store_id;
use ragsync_remote::RemoteGateway;

use crate::catalog::Catalog;
use crate::checksum;

/// The document a new upload would replace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingDocument {
    /// Empty if the content was never uploaded
    pub remote_id: String,
    /// Tagged checksum, or empty if unknown
    pub checksum: String,
}

#[async_trait]
pub trait ExistingDocumentResolver: Send + Sync {
    /// `store` is the canonical store id; `identity` is what the surface
    /// keys files by (local path or display name).
    async fn resolve_existing(
        &self,
        store: &str,
        identity: &str,
    ) -> Result<Option<ExistingDocument>>;
}

/// Resolves through the local catalog, keyed by local path
pub struct CatalogResolver {
    catalog: Arc<Catalog>,
}

impl CatalogResolver {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl ExistingDocumentResolver for CatalogResolver {
    async fn resolve_existing(
        &self,
        store: &str,
        identity: &str,
    ) -> Result<Option<ExistingDocument>> {
        Ok(self
            .catalog
            .get_by_path(short_store_id(store), identity)
            .map(|r| ExistingDocument {
                remote_id: r.remote_id,
                checksum: r.checksum,
            }))
    }
}

/// Resolves by listing remote documents and matching the display name.
/// When several share the name, the most recently created one wins.
pub struct RemoteMetadataResolver {
    gateway: Arc<dyn RemoteGateway>,
}

impl RemoteMetadataResolver {
    pub fn new(gateway: Arc<dyn RemoteGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ExistingDocumentResolver for RemoteMetadataResolver {
    async fn resolve_existing(
        &self,
        store: &str,
        identity: &str,
    ) -> Result<Option<ExistingDocument>> {
        let docs = self
            .gateway
            .list_documents(store)
            .await
            .with_context(|| format!("looking up '{identity}' in {store}"))?;
        Ok(docs
            .into_iter()
            .filter(|d| d.display_name == identity)
            .max_by_key(|d| d.created_at())
            .map(|d| ExistingDocument {
                checksum: d.checksum().map(checksum::normalize).unwrap_or_default(),
                remote_id: d.name,
            }))
    }
}
