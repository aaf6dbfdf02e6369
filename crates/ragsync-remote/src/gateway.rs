use async_trait::async_trait;

use crate::error::{RemoteError, RemoteResult};
use crate::types::{
    short_store_id, Answer, Document, Operation, QueryRequest, Store, UploadRequest, STORE_PREFIX,
};

/// A store resolved from a user-supplied name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStore {
    /// `fileSearchStores/{id}`
    pub id: String,
    pub store: Store,
}

impl ResolvedStore {
    pub fn new(store: Store) -> Self {
        Self {
            id: store.name.clone(),
            store,
        }
    }

    /// Key used for this store in the local catalog
    pub fn key(&self) -> &str {
        short_store_id(&self.id)
    }
}

/// Calls the sync engine makes against the hosted document store.
///
/// The remote never deduplicates by display name: uploading the same name
/// twice yields two documents. Replacing content is delete then upload.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn create_store(&self, display_name: &str) -> RemoteResult<Store>;

    async fn get_store(&self, id: &str) -> RemoteResult<Store>;

    /// All stores, following pagination
    async fn list_stores(&self) -> RemoteResult<Vec<Store>>;

    async fn delete_store(&self, id: &str, force: bool) -> RemoteResult<()>;

    /// All documents in a store, following pagination
    async fn list_documents(&self, store_id: &str) -> RemoteResult<Vec<Document>>;

    /// Delete one document. Always forced so derived chunks go with it.
    async fn delete_document(&self, document_id: &str) -> RemoteResult<()>;

    /// Start an upload. The result may already be done.
    async fn upload(&self, store_id: &str, request: UploadRequest) -> RemoteResult<Operation>;

    async fn get_operation(&self, name: &str) -> RemoteResult<Operation>;

    async fn query(&self, request: &QueryRequest) -> RemoteResult<Answer>;

    /// Resolve a canonical id or a display name to one store.
    ///
    /// Qualified ids are fetched directly. Anything else requires listing
    /// every store and matching on short id or display name, so callers
    /// should resolve once per command.
    async fn resolve_store(&self, name_or_id: &str) -> RemoteResult<ResolvedStore> {
        if name_or_id.starts_with(STORE_PREFIX) {
            return self.get_store(name_or_id).await.map(ResolvedStore::new);
        }

        let stores = self.list_stores().await?;
        if let Some(store) = stores.iter().find(|s| s.short_id() == name_or_id) {
            return Ok(ResolvedStore::new(store.clone()));
        }

        let mut matches: Vec<Store> = stores
            .into_iter()
            .filter(|s| s.display_name == name_or_id)
            .collect();
        match matches.len() {
            0 => Err(RemoteError::NotFound {
                op: "resolve_store",
                target: name_or_id.to_string(),
            }),
            1 => Ok(ResolvedStore::new(matches.remove(0))),
            _ => Err(RemoteError::AmbiguousStore {
                name: name_or_id.to_string(),
                ids: matches.into_iter().map(|s| s.name).collect(),
            }),
        }
    }
}
