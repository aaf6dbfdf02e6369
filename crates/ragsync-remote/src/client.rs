//! HTTP client for the Gemini File Search API
//!
//! Stores live at `fileSearchStores/{id}`, documents under
//! `fileSearchStores/{id}/documents/{doc}`. Uploads go to a separate
//! multipart endpoint and may answer with a finished document or with a
//! long-running operation; both are normalised to `Operation`.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use ragsync_core::config::RemoteConfig;

use crate::error::{RemoteError, RemoteResult};
use crate::gateway::RemoteGateway;
use crate::types::{
    store_id, Answer, Citation, CustomMetadata, Document, Operation, QueryRequest, Store,
    UploadBody, UploadRequest,
};

const PAGE_SIZE: &str = "20";
const API_KEY_HEADER: &str = "x-goog-api-key";

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListStoresResponse {
    #[serde(default)]
    file_search_stores: Vec<Store>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<Document>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateStoreRequest<'a> {
    display_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadMetadata<'a> {
    display_name: &'a str,
    mime_type: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    custom_metadata: &'a Vec<CustomMetadata>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TextPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileSearchTool<'a> {
    file_search_store_names: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata_filter: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool<'a> {
    file_search: FileSearchTool<'a>,
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content>,
    tools: Vec<Tool<'a>>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingChunk {
    #[serde(default)]
    retrieved_context: Option<RetrievedContext>,
}

#[derive(Debug, Deserialize)]
struct RetrievedContext {
    #[serde(default)]
    title: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    text: String,
}

// ── GeminiClient ─────────────────────────────────────────────────────────────

pub struct GeminiClient {
    http: Client,
    base_url: String,
    upload_base_url: String,
    api_key: SecretString,
}

impl GeminiClient {
    pub fn new(config: &RemoteConfig, api_key: SecretString) -> RemoteResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|source| RemoteError::Transport {
                op: "build_client",
                target: config.base_url.clone(),
                source,
            })?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            upload_base_url: config.upload_base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Point both endpoints at a custom host (mock servers in tests)
    pub fn with_base_urls(
        api_key: SecretString,
        base_url: impl Into<String>,
        upload_base_url: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            upload_base_url: upload_base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        self.http
            .request(method, url)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
    }

    async fn checked(
        op: &'static str,
        target: &str,
        builder: RequestBuilder,
    ) -> RemoteResult<Response> {
        let resp = builder
            .send()
            .await
            .map_err(|source| RemoteError::Transport {
                op,
                target: target.to_string(),
                source,
            })?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound {
                op,
                target: target.to_string(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                op,
                target: target.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(
        op: &'static str,
        target: &str,
        builder: RequestBuilder,
    ) -> RemoteResult<T> {
        let resp = Self::checked(op, target, builder).await?;
        let bytes = resp.bytes().await.map_err(|source| RemoteError::Transport {
            op,
            target: target.to_string(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode {
            op,
            target: target.to_string(),
            message: e.to_string(),
        })
    }

    async fn read_body(body: UploadBody) -> RemoteResult<Vec<u8>> {
        match body {
            UploadBody::Bytes(bytes) => Ok(bytes),
            UploadBody::File(path) => match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(bytes),
                Err(source) => Err(RemoteError::Io { path, source }),
            },
        }
    }
}

/// Upload answers are either an operation or the created document.
fn operation_from_upload(value: serde_json::Value) -> Result<Operation, String> {
    let name = value
        .get("name")
        .and_then(|n| n.as_str())
        .unwrap_or_default()
        .to_string();
    if value.get("done").is_some() || name.contains("/operations/") {
        return serde_json::from_value(value).map_err(|e| e.to_string());
    }
    if name.contains("/documents/") {
        return Ok(Operation::completed(name));
    }
    Err("response is neither an operation nor a document".into())
}

fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

#[async_trait]
impl RemoteGateway for GeminiClient {
    async fn create_store(&self, display_name: &str) -> RemoteResult<Store> {
        debug!(display_name, "creating store");
        let builder = self
            .request(Method::POST, "fileSearchStores")
            .json(&CreateStoreRequest { display_name });
        Self::send_json("create_store", display_name, builder).await
    }

    async fn get_store(&self, id: &str) -> RemoteResult<Store> {
        let id = store_id(id);
        Self::send_json("get_store", &id, self.request(Method::GET, &id)).await
    }

    async fn list_stores(&self) -> RemoteResult<Vec<Store>> {
        let mut stores = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut builder = self
                .request(Method::GET, "fileSearchStores")
                .query(&[("pageSize", PAGE_SIZE)]);
            if let Some(token) = &page_token {
                builder = builder.query(&[("pageToken", token.as_str())]);
            }
            let page: ListStoresResponse =
                Self::send_json("list_stores", "fileSearchStores", builder).await?;
            stores.extend(page.file_search_stores);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        debug!(count = stores.len(), "listed stores");
        Ok(stores)
    }

    async fn delete_store(&self, id: &str, force: bool) -> RemoteResult<()> {
        let id = store_id(id);
        let mut builder = self.request(Method::DELETE, &id);
        if force {
            builder = builder.query(&[("force", "true")]);
        }
        Self::checked("delete_store", &id, builder).await?;
        Ok(())
    }

    async fn list_documents(&self, store: &str) -> RemoteResult<Vec<Document>> {
        let store = store_id(store);
        let path = format!("{store}/documents");
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut builder = self
                .request(Method::GET, &path)
                .query(&[("pageSize", PAGE_SIZE)]);
            if let Some(token) = &page_token {
                builder = builder.query(&[("pageToken", token.as_str())]);
            }
            let page: ListDocumentsResponse =
                Self::send_json("list_documents", &store, builder).await?;
            documents.extend(page.documents);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        debug!(store = %store, count = documents.len(), "listed documents");
        Ok(documents)
    }

    async fn delete_document(&self, document_id: &str) -> RemoteResult<()> {
        let builder = self
            .request(Method::DELETE, document_id)
            .query(&[("force", "true")]);
        Self::checked("delete_document", document_id, builder).await?;
        Ok(())
    }

    async fn upload(&self, store: &str, request: UploadRequest) -> RemoteResult<Operation> {
        request.validate()?;
        let store = store_id(store);

        let metadata = serde_json::to_string(&UploadMetadata {
            display_name: &request.display_name,
            mime_type: &request.mime_type,
            custom_metadata: &request.custom_metadata,
        })
        .map_err(|e| RemoteError::InvalidRequest(format!("encoding upload metadata: {e}")))?;

        let file_name = Path::new(&request.display_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| request.display_name.clone());
        let bytes = Self::read_body(request.body).await?;
        let size = bytes.len();

        let transport = |source| RemoteError::Transport {
            op: "upload",
            target: request.display_name.clone(),
            source,
        };
        let form = Form::new()
            .part(
                "metadata",
                Part::text(metadata)
                    .mime_str("application/json")
                    .map_err(transport)?,
            )
            .part(
                "file",
                Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str(&request.mime_type)
                    .map_err(transport)?,
            );

        let url = format!("{}/{store}:uploadToFileSearchStore", self.upload_base_url);
        let builder = self
            .http
            .post(url)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .header("X-Goog-Upload-Protocol", "multipart")
            .multipart(form);

        debug!(store = %store, display_name = %request.display_name, size, "uploading");
        let value: serde_json::Value =
            Self::send_json("upload", &request.display_name, builder).await?;
        operation_from_upload(value).map_err(|message| RemoteError::Decode {
            op: "upload",
            target: request.display_name.clone(),
            message,
        })
    }

    async fn get_operation(&self, name: &str) -> RemoteResult<Operation> {
        Self::send_json("get_operation", name, self.request(Method::GET, name)).await
    }

    async fn query(&self, request: &QueryRequest) -> RemoteResult<Answer> {
        let stores: Vec<String> = request.stores.iter().map(|s| store_id(s)).collect();
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![TextPart {
                    text: Some(request.question.clone()),
                }],
            }],
            tools: vec![Tool {
                file_search: FileSearchTool {
                    file_search_store_names: &stores,
                    metadata_filter: request.metadata_filter.as_deref().filter(|f| !f.is_empty()),
                },
            }],
        };
        let path = format!("{}:generateContent", model_path(&request.model));
        let builder = self.request(Method::POST, &path).json(&body);
        let resp: GenerateContentResponse =
            Self::send_json("query", &request.model, builder).await?;

        let Some(candidate) = resp.candidates.into_iter().next() else {
            return Ok(Answer::default());
        };
        let text = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        let citations = candidate
            .grounding_metadata
            .map(|g| {
                g.grounding_chunks
                    .into_iter()
                    .filter_map(|c| c.retrieved_context)
                    .map(|rc| Citation {
                        title: rc.title,
                        uri: rc.uri,
                        text: rc.text,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Answer { text, citations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_response_as_operation() {
        let op = operation_from_upload(serde_json::json!({
            "name": "fileSearchStores/s/upload/operations/o1",
            "done": false
        }))
        .unwrap();
        assert!(!op.done);
        assert_eq!(op.name, "fileSearchStores/s/upload/operations/o1");
    }

    #[test]
    fn upload_response_as_document() {
        let op = operation_from_upload(serde_json::json!({
            "name": "fileSearchStores/s/documents/d1",
            "displayName": "/tmp/a.md",
            "sizeBytes": "12"
        }))
        .unwrap();
        assert!(op.done);
        assert_eq!(op.document_name(), Some("fileSearchStores/s/documents/d1"));
    }

    #[test]
    fn upload_response_unrecognised() {
        assert!(operation_from_upload(serde_json::json!({"name": "x"})).is_err());
    }

    #[test]
    fn model_path_prefix() {
        assert_eq!(model_path("gemini-3-flash-preview"), "models/gemini-3-flash-preview");
        assert_eq!(model_path("models/x"), "models/x");
    }
}
