//! In-memory gateway with per-call counters and failure injection

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{RemoteError, RemoteResult};
use crate::gateway::RemoteGateway;
use crate::types::{
    document_id, store_id, Answer, CustomMetadata, Document, Operation, OperationResponse,
    OperationStatus, QueryRequest, Store, UploadBody, UploadRequest, CHECKSUM_KEY,
};

/// Number of calls made per gateway operation
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub create_store: usize,
    pub get_store: usize,
    pub list_stores: usize,
    pub delete_store: usize,
    pub list_documents: usize,
    pub delete_document: usize,
    pub upload: usize,
    pub get_operation: usize,
    pub query: usize,
}

struct PendingUpload {
    store: String,
    document: Document,
    polls_left: u32,
    fail: bool,
}

#[derive(Default)]
struct State {
    stores: BTreeMap<String, Store>,
    documents: BTreeMap<String, Vec<Document>>,
    pending: HashMap<String, PendingUpload>,
    calls: CallCounts,
    next_id: u64,
    fail_uploads: HashSet<String>,
    fail_operations: HashSet<String>,
    fail_deletes: HashSet<String>,
    fail_list_documents: bool,
    answer: Answer,
    last_query: Option<QueryRequest>,
}

impl State {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Strictly increasing, lexically sortable timestamps
    fn timestamp(&mut self) -> String {
        let n = self.next();
        format!("2025-01-01T00:00:00.{n:09}Z")
    }
}

/// `RemoteGateway` backed by process memory. Every remote id it issues is
/// fresh, so replacing a document always yields a different id.
#[derive(Default)]
pub struct MemoryGateway {
    state: Mutex<State>,
    async_polls: u32,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads return a pending operation that completes after `polls` status checks
    pub fn with_async_uploads(mut self, polls: u32) -> Self {
        self.async_polls = polls;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    pub fn reset_calls(&self) {
        self.lock().calls = CallCounts::default();
    }

    pub fn documents(&self, store: &str) -> Vec<Document> {
        self.lock()
            .documents
            .get(&store_id(store))
            .cloned()
            .unwrap_or_default()
    }

    /// Seed a document as if another client had uploaded it
    pub fn insert_document(
        &self,
        store: &str,
        display_name: &str,
        checksum: Option<&str>,
        size: u64,
    ) -> Document {
        let mut state = self.lock();
        let store = store_id(store);
        let n = state.next();
        let create_time = state.timestamp();
        let document = Document {
            name: document_id(&store, &format!("doc-{n}")),
            display_name: display_name.to_string(),
            custom_metadata: checksum
                .map(|c| vec![CustomMetadata::string(CHECKSUM_KEY, c)])
                .unwrap_or_default(),
            update_time: create_time.clone(),
            create_time,
            state: "STATE_ACTIVE".into(),
            size_bytes: size,
            mime_type: "text/plain".into(),
        };
        state.documents.entry(store).or_default().push(document.clone());
        document
    }

    /// Overwrite a document's `createTime`
    pub fn set_create_time(&self, id: &str, create_time: &str) {
        for docs in self.lock().documents.values_mut() {
            for doc in docs.iter_mut().filter(|d| d.name == id) {
                doc.create_time = create_time.to_string();
            }
        }
    }

    /// Remove a document behind the client's back
    pub fn remove_document(&self, id: &str) {
        for docs in self.lock().documents.values_mut() {
            docs.retain(|d| d.name != id);
        }
    }

    /// Uploads with this display name are rejected outright
    pub fn fail_uploads_for(&self, display_name: &str) {
        self.lock().fail_uploads.insert(display_name.to_string());
    }

    /// Uploads with this display name finish with an operation error
    pub fn fail_operations_for(&self, display_name: &str) {
        self.lock().fail_operations.insert(display_name.to_string());
    }

    pub fn fail_deletes_for(&self, document_id: &str) {
        self.lock().fail_deletes.insert(document_id.to_string());
    }

    pub fn fail_list_documents(&self, fail: bool) {
        self.lock().fail_list_documents = fail;
    }

    pub fn set_answer(&self, answer: Answer) {
        self.lock().answer = answer;
    }

    pub fn last_query(&self) -> Option<QueryRequest> {
        self.lock().last_query.clone()
    }
}

fn not_found(op: &'static str, target: &str) -> RemoteError {
    RemoteError::NotFound {
        op,
        target: target.to_string(),
    }
}

fn injected(op: &'static str, target: &str) -> RemoteError {
    RemoteError::Status {
        op,
        target: target.to_string(),
        status: 500,
        body: "injected failure".into(),
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn create_store(&self, display_name: &str) -> RemoteResult<Store> {
        let mut state = self.lock();
        state.calls.create_store += 1;
        let n = state.next();
        let create_time = state.timestamp();
        let store = Store {
            name: store_id(&format!("store-{n}")),
            display_name: display_name.to_string(),
            update_time: create_time.clone(),
            create_time,
        };
        state.stores.insert(store.name.clone(), store.clone());
        state.documents.entry(store.name.clone()).or_default();
        Ok(store)
    }

    async fn get_store(&self, id: &str) -> RemoteResult<Store> {
        let mut state = self.lock();
        state.calls.get_store += 1;
        state
            .stores
            .get(&store_id(id))
            .cloned()
            .ok_or_else(|| not_found("get_store", id))
    }

    async fn list_stores(&self) -> RemoteResult<Vec<Store>> {
        let mut state = self.lock();
        state.calls.list_stores += 1;
        Ok(state.stores.values().cloned().collect())
    }

    async fn delete_store(&self, id: &str, force: bool) -> RemoteResult<()> {
        let mut state = self.lock();
        state.calls.delete_store += 1;
        let id = store_id(id);
        if !state.stores.contains_key(&id) {
            return Err(not_found("delete_store", &id));
        }
        let has_docs = state.documents.get(&id).is_some_and(|d| !d.is_empty());
        if has_docs && !force {
            return Err(RemoteError::Status {
                op: "delete_store",
                target: id,
                status: 400,
                body: "FAILED_PRECONDITION: store is not empty".into(),
            });
        }
        state.stores.remove(&id);
        state.documents.remove(&id);
        Ok(())
    }

    async fn list_documents(&self, store: &str) -> RemoteResult<Vec<Document>> {
        let mut state = self.lock();
        state.calls.list_documents += 1;
        let id = store_id(store);
        if state.fail_list_documents {
            return Err(injected("list_documents", &id));
        }
        if !state.stores.contains_key(&id) && !state.documents.contains_key(&id) {
            return Err(not_found("list_documents", &id));
        }
        Ok(state.documents.get(&id).cloned().unwrap_or_default())
    }

    async fn delete_document(&self, document_id: &str) -> RemoteResult<()> {
        let mut state = self.lock();
        state.calls.delete_document += 1;
        if state.fail_deletes.contains(document_id) {
            return Err(injected("delete_document", document_id));
        }
        for docs in state.documents.values_mut() {
            if let Some(pos) = docs.iter().position(|d| d.name == document_id) {
                docs.remove(pos);
                return Ok(());
            }
        }
        Err(not_found("delete_document", document_id))
    }

    async fn upload(&self, store: &str, request: UploadRequest) -> RemoteResult<Operation> {
        request.validate()?;
        let size = match &request.body {
            UploadBody::Bytes(bytes) => bytes.len() as u64,
            UploadBody::File(path) => tokio::fs::metadata(path)
                .await
                .map_err(|source| RemoteError::Io {
                    path: path.clone(),
                    source,
                })?
                .len(),
        };

        let mut state = self.lock();
        state.calls.upload += 1;
        let store = store_id(store);
        if !state.documents.contains_key(&store) {
            return Err(not_found("upload", &store));
        }
        if state.fail_uploads.contains(&request.display_name) {
            return Err(injected("upload", &request.display_name));
        }

        let n = state.next();
        let create_time = state.timestamp();
        let document = Document {
            name: document_id(&store, &format!("doc-{n}")),
            display_name: request.display_name.clone(),
            custom_metadata: request.custom_metadata,
            update_time: create_time.clone(),
            create_time,
            state: "STATE_ACTIVE".into(),
            size_bytes: size,
            mime_type: request.mime_type,
        };
        let fail = state.fail_operations.contains(&request.display_name);
        let op_name = format!("{store}/upload/operations/op-{n}");

        if self.async_polls == 0 {
            if fail {
                return Ok(Operation {
                    name: op_name,
                    done: true,
                    response: None,
                    error: Some(OperationStatus {
                        code: 13,
                        message: "injected operation failure".into(),
                    }),
                });
            }
            let name = document.name.clone();
            state.documents.entry(store).or_default().push(document);
            return Ok(Operation::completed(name));
        }

        state.pending.insert(
            op_name.clone(),
            PendingUpload {
                store,
                document,
                polls_left: self.async_polls,
                fail,
            },
        );
        Ok(Operation {
            name: op_name,
            ..Default::default()
        })
    }

    async fn get_operation(&self, name: &str) -> RemoteResult<Operation> {
        let mut state = self.lock();
        state.calls.get_operation += 1;
        let pending = state
            .pending
            .get_mut(name)
            .ok_or_else(|| not_found("get_operation", name))?;
        if pending.polls_left > 1 {
            pending.polls_left -= 1;
            return Ok(Operation {
                name: name.to_string(),
                ..Default::default()
            });
        }

        let Some(pending) = state.pending.remove(name) else {
            return Err(not_found("get_operation", name));
        };
        if pending.fail {
            return Ok(Operation {
                name: name.to_string(),
                done: true,
                response: None,
                error: Some(OperationStatus {
                    code: 13,
                    message: "injected operation failure".into(),
                }),
            });
        }
        let document_name = pending.document.name.clone();
        state
            .documents
            .entry(pending.store)
            .or_default()
            .push(pending.document);
        Ok(Operation {
            name: name.to_string(),
            done: true,
            response: Some(OperationResponse {
                document_name: Some(document_name),
            }),
            error: None,
        })
    }

    async fn query(&self, request: &QueryRequest) -> RemoteResult<Answer> {
        let mut state = self.lock();
        state.calls.query += 1;
        state.last_query = Some(request.clone());
        Ok(state.answer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(name: &str, content: &[u8]) -> UploadRequest {
        UploadRequest {
            display_name: name.into(),
            mime_type: "text/plain".into(),
            custom_metadata: vec![],
            body: UploadBody::Bytes(content.to_vec()),
        }
    }

    #[tokio::test]
    async fn same_display_name_creates_two_documents() {
        let gw = MemoryGateway::new();
        let store = gw.create_store("docs").await.unwrap();
        let a = gw.upload(&store.name, bytes("/a", b"1")).await.unwrap();
        let b = gw.upload(&store.name, bytes("/a", b"1")).await.unwrap();
        assert_ne!(a.document_name(), b.document_name());
        assert_eq!(gw.list_documents(&store.name).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn resolve_by_id_short_id_and_display_name() {
        let gw = MemoryGateway::new();
        let store = gw.create_store("docs").await.unwrap();

        let by_full = gw.resolve_store(&store.name).await.unwrap();
        assert_eq!(by_full.id, store.name);
        let by_short = gw.resolve_store(store.short_id()).await.unwrap();
        assert_eq!(by_short.id, store.name);
        let by_display = gw.resolve_store("docs").await.unwrap();
        assert_eq!(by_display.key(), store.short_id());

        let err = gw.resolve_store("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn duplicate_display_names_are_ambiguous() {
        let gw = MemoryGateway::new();
        gw.create_store("docs").await.unwrap();
        gw.create_store("docs").await.unwrap();
        let err = gw.resolve_store("docs").await.unwrap_err();
        assert!(matches!(err, RemoteError::AmbiguousStore { ref ids, .. } if ids.len() == 2));
    }

    #[tokio::test]
    async fn delete_store_requires_force_when_not_empty() {
        let gw = MemoryGateway::new();
        let store = gw.create_store("docs").await.unwrap();
        gw.insert_document(&store.name, "/a", None, 1);

        assert!(gw.delete_store(&store.name, false).await.is_err());
        gw.delete_store(&store.name, true).await.unwrap();
        assert!(gw.get_store(&store.name).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn delete_unknown_document_is_not_found() {
        let gw = MemoryGateway::new();
        let err = gw
            .delete_document("fileSearchStores/x/documents/y")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(gw.calls().delete_document, 1);
    }
}
