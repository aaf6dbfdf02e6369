//! MCP server implementation with tool definitions

use anyhow::{bail, Context};
use base64::Engine;
use regex::Regex;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router, ServerHandler,
};

use ragsync_remote::{PollConfig, QueryRequest, RemoteGateway, ResolvedStore, UploadBody};
use ragsync_sync::checksum::checksum_bytes;
use ragsync_sync::mime::mime_type_for;
use ragsync_sync::{upload_document, RemoteMetadataResolver, UploadDisposition, UploadJob};

const CITATION_TEXT_LIMIT: usize = 200;

// ── Input schemas ────────────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct UploadInput {
    #[schemars(description = "Name or id of the File Search Store (defaults to RAGSYNC_STORE)")]
    #[serde(default)]
    pub store_name: Option<String>,
    #[schemars(description = "File name or path used as the document's display name")]
    pub file_name: String,
    #[schemars(description = "File content: plain text, or base64 when is_base64 is set")]
    pub file_content: String,
    #[schemars(description = "Set to true if file_content is base64 encoded")]
    #[serde(default)]
    pub is_base64: bool,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct QueryInput {
    #[schemars(description = "The question to ask about your documents")]
    pub question: String,
    #[schemars(description = "Store to query (use store_name or store_names)")]
    #[serde(default)]
    pub store_name: Option<String>,
    #[schemars(description = "Several stores to query together")]
    #[serde(default)]
    pub store_names: Vec<String>,
    #[schemars(description = "Generation model (defaults to the configured model)")]
    #[serde(default)]
    pub model: Option<String>,
    #[schemars(description = "Metadata filter expression")]
    #[serde(default)]
    pub metadata_filter: Option<String>,
    #[schemars(description = "Include citation details in the response")]
    #[serde(default)]
    pub show_citations: bool,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct ListInput {
    #[schemars(description = "Store to list documents from")]
    #[serde(default)]
    pub store_name: Option<String>,
    #[schemars(description = "Regex matched against display names and document ids")]
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct DeleteInput {
    #[schemars(description = "Store holding the document")]
    #[serde(default)]
    pub store_name: Option<String>,
    #[schemars(description = "Display name of the document to delete")]
    pub file_name: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct StoreNameInput {
    #[schemars(description = "Display name or id of the File Search Store")]
    pub store_name: String,
}

// ── MCP Server ───────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RagsyncMcp {
    gateway: Arc<dyn RemoteGateway>,
    default_store: Option<String>,
    model: String,
    poll: PollConfig,
    tool_router: ToolRouter<Self>,
}

fn error_json(err: &anyhow::Error) -> String {
    json!({ "error": format!("{err:#}") }).to_string()
}

fn respond(result: anyhow::Result<serde_json::Value>) -> String {
    match result {
        Ok(value) => value.to_string(),
        Err(e) => error_json(&e),
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[tool_router]
impl RagsyncMcp {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        default_store: Option<String>,
        model: String,
        poll: PollConfig,
    ) -> Self {
        Self {
            gateway,
            default_store,
            model,
            poll,
            tool_router: Self::tool_router(),
        }
    }

    fn store_name(&self, input: Option<String>) -> anyhow::Result<String> {
        match input.filter(|s| !s.is_empty()).or_else(|| self.default_store.clone()) {
            Some(name) => Ok(name),
            None => bail!("store_name is required"),
        }
    }

    async fn resolve(&self, name: &str) -> anyhow::Result<ResolvedStore> {
        self.gateway
            .resolve_store(name)
            .await
            .with_context(|| format!("store '{name}' not found"))
    }

    async fn do_upload(&self, input: UploadInput) -> anyhow::Result<serde_json::Value> {
        if input.file_name.is_empty() {
            bail!("file_name is required");
        }
        if input.file_content.is_empty() {
            bail!("file_content is required");
        }
        let store = self.resolve(&self.store_name(input.store_name)?).await?;

        let content = if input.is_base64 {
            base64::engine::general_purpose::STANDARD
                .decode(input.file_content.as_bytes())
                .context("failed to decode base64 content")?
        } else {
            input.file_content.into_bytes()
        };
        let checksum = checksum_bytes(&content);
        let job = UploadJob {
            identity: input.file_name.clone(),
            display_name: input.file_name.clone(),
            mime_type: mime_type_for(Path::new(&input.file_name)).to_string(),
            checksum: checksum.clone(),
            body: UploadBody::Bytes(content),
        };

        let resolver = RemoteMetadataResolver::new(self.gateway.clone());
        let outcome = upload_document(self.gateway.as_ref(), &resolver, &store.id, job, self.poll)
            .await
            .with_context(|| format!("upload of '{}' failed", input.file_name))?;

        let (status, message) = match &outcome.disposition {
            UploadDisposition::Unchanged { .. } => (
                "unchanged",
                format!("Skipped '{}': content unchanged", input.file_name),
            ),
            UploadDisposition::Uploaded { replaced: Some(_), .. } => (
                "updated",
                format!("Successfully updated '{}'", input.file_name),
            ),
            UploadDisposition::Uploaded { replaced: None, .. } => (
                "uploaded",
                format!("Successfully uploaded '{}'", input.file_name),
            ),
        };
        for w in &outcome.warnings {
            tracing::warn!(file = %input.file_name, "{w}");
        }

        Ok(json!({
            "success": true,
            "file_name": input.file_name,
            "status": status,
            "message": message,
            "document": outcome.remote_id(),
            "checksum": checksum,
            "warnings": outcome.warnings,
        }))
    }

    async fn do_query(&self, input: QueryInput) -> anyhow::Result<serde_json::Value> {
        if input.question.trim().is_empty() {
            bail!("question is required");
        }
        let names = if input.store_names.is_empty() {
            vec![self.store_name(input.store_name)?]
        } else {
            input.store_names
        };
        let mut stores = Vec::with_capacity(names.len());
        for name in &names {
            stores.push(self.resolve(name).await?.id);
        }

        let request = QueryRequest {
            model: input
                .model
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| self.model.clone()),
            question: input.question,
            stores,
            metadata_filter: input.metadata_filter.filter(|f| !f.is_empty()),
        };
        let answer = self.gateway.query(&request).await.context("query failed")?;

        let text = if answer.text.is_empty() {
            "No response generated".to_string()
        } else {
            answer.text
        };
        let mut out = json!({ "answer": text });
        if input.show_citations {
            out["citations"] = answer
                .citations
                .iter()
                .map(|c| {
                    json!({
                        "title": c.title,
                        "uri": c.uri,
                        "text": truncate(&c.text, CITATION_TEXT_LIMIT),
                    })
                })
                .collect();
        }
        Ok(out)
    }

    async fn do_list(&self, input: ListInput) -> anyhow::Result<serde_json::Value> {
        let re = match input.pattern.as_deref().filter(|p| !p.is_empty()) {
            Some(p) => Some(Regex::new(p).context("invalid pattern")?),
            None => None,
        };
        let store = self.resolve(&self.store_name(input.store_name)?).await?;
        let docs = self
            .gateway
            .list_documents(&store.id)
            .await
            .context("failed to list documents")?;

        let items: Vec<_> = docs
            .iter()
            .filter(|d| {
                re.as_ref()
                    .map_or(true, |re| re.is_match(&d.display_name) || re.is_match(&d.name))
            })
            .map(|d| {
                json!({
                    "name": d.name,
                    "display_name": d.display_name,
                    "state": d.state,
                    "created_at": d.create_time,
                    "checksum": d.checksum(),
                })
            })
            .collect();
        Ok(json!({
            "store": store.store.display_name,
            "total": items.len(),
            "items": items,
        }))
    }

    async fn do_delete(&self, input: DeleteInput) -> anyhow::Result<serde_json::Value> {
        if input.file_name.is_empty() {
            bail!("file_name is required");
        }
        let store = self.resolve(&self.store_name(input.store_name)?).await?;
        let docs = self
            .gateway
            .list_documents(&store.id)
            .await
            .context("failed to list documents")?;

        // Duplicated display names are possible; remove every copy
        let targets: Vec<_> = docs
            .into_iter()
            .filter(|d| d.display_name == input.file_name)
            .collect();
        if targets.is_empty() {
            bail!("file '{}' not found in store", input.file_name);
        }
        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        for doc in &targets {
            match self.gateway.delete_document(&doc.name).await {
                Ok(()) => deleted.push(doc.name.clone()),
                Err(e) => {
                    tracing::warn!(document = %doc.name, "delete failed: {e}");
                    failed.push(json!({ "name": doc.name, "error": e.to_string() }));
                }
            }
        }
        Ok(json!({
            "success": failed.is_empty(),
            "file_name": input.file_name,
            "deleted": deleted,
            "failed": failed,
        }))
    }

    async fn do_create_store(&self, input: StoreNameInput) -> anyhow::Result<serde_json::Value> {
        if input.store_name.is_empty() {
            bail!("store_name is required");
        }
        let store = self
            .gateway
            .create_store(&input.store_name)
            .await
            .context("failed to create store")?;
        Ok(json!({
            "success": true,
            "store_name": store.display_name,
            "store_id": store.name,
        }))
    }

    async fn do_delete_store(&self, input: StoreNameInput) -> anyhow::Result<serde_json::Value> {
        if input.store_name.is_empty() {
            bail!("store_name is required");
        }
        let store = self.resolve(&input.store_name).await?;
        self.gateway
            .delete_store(&store.id, true)
            .await
            .context("failed to delete store")?;
        Ok(json!({
            "success": true,
            "store_name": store.store.display_name,
            "store_id": store.id,
        }))
    }

    async fn do_list_stores(&self) -> anyhow::Result<serde_json::Value> {
        let stores = self
            .gateway
            .list_stores()
            .await
            .context("failed to list stores")?;
        let items: Vec<_> = stores
            .iter()
            .map(|s| {
                json!({
                    "name": s.name,
                    "display_name": s.display_name,
                    "create_time": s.create_time,
                    "update_time": s.update_time,
                })
            })
            .collect();
        Ok(json!({ "total": items.len(), "stores": items }))
    }

    // ── Tools ────────────────────────────────────────────────────────────

    #[tool(
        description = "Upload content to a File Search Store. Unchanged content (same checksum) \
                       is skipped; changed content replaces the previous document"
    )]
    async fn upload(&self, Parameters(input): Parameters<UploadInput>) -> String {
        respond(self.do_upload(input).await)
    }

    #[tool(description = "Ask a question answered from the documents in one or more stores")]
    async fn query(&self, Parameters(input): Parameters<QueryInput>) -> String {
        respond(self.do_query(input).await)
    }

    #[tool(description = "List documents in a store, optionally filtered by regex")]
    async fn list(&self, Parameters(input): Parameters<ListInput>) -> String {
        respond(self.do_list(input).await)
    }

    #[tool(description = "Delete a document from a store by its display name")]
    async fn delete(&self, Parameters(input): Parameters<DeleteInput>) -> String {
        respond(self.do_delete(input).await)
    }

    #[tool(description = "Create a new File Search Store")]
    async fn create_store(&self, Parameters(input): Parameters<StoreNameInput>) -> String {
        respond(self.do_create_store(input).await)
    }

    #[tool(description = "Delete a File Search Store and every document in it")]
    async fn delete_store(&self, Parameters(input): Parameters<StoreNameInput>) -> String {
        respond(self.do_delete_store(input).await)
    }

    #[tool(description = "List all File Search Stores")]
    async fn list_stores(&self) -> String {
        respond(self.do_list_stores().await)
    }
}

#[tool_handler]
impl ServerHandler for RagsyncMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "ragsync: upload content to Gemini File Search stores and ask questions \
                 grounded in it. Uploads are deduplicated by content checksum."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
