//! Wire and domain types for stores, documents, operations, and queries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

use crate::error::{RemoteError, RemoteResult};

pub const STORE_PREFIX: &str = "fileSearchStores/";
/// Custom-metadata key holding the content checksum
pub const CHECKSUM_KEY: &str = "checksum";
pub const MAX_METADATA_ENTRIES: usize = 20;
pub const MAX_METADATA_VALUE_LEN: usize = 256;

/// Canonical store id for either a short id or an already-qualified one
pub fn store_id(id: &str) -> String {
    if id.starts_with(STORE_PREFIX) {
        id.to_string()
    } else {
        format!("{STORE_PREFIX}{id}")
    }
}

/// Store id without the `fileSearchStores/` prefix
pub fn short_store_id(id: &str) -> &str {
    id.strip_prefix(STORE_PREFIX).unwrap_or(id)
}

/// Qualify a bare document id with its store
pub fn document_id(store: &str, doc: &str) -> String {
    if doc.contains("/documents/") {
        doc.to_string()
    } else {
        format!("{}/documents/{doc}", store_id(store))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub create_time: String,
    #[serde(default)]
    pub update_time: String,
}

impl Store {
    pub fn short_id(&self) -> &str {
        short_store_id(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomMetadata {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
}

impl CustomMetadata {
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            string_value: Some(value.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub custom_metadata: Vec<CustomMetadata>,
    #[serde(default)]
    pub create_time: String,
    #[serde(default)]
    pub update_time: String,
    #[serde(default)]
    pub state: String,
    #[serde(default, deserialize_with = "size_from_string_or_number")]
    pub size_bytes: u64,
    #[serde(default)]
    pub mime_type: String,
}

impl Document {
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.custom_metadata
            .iter()
            .find(|m| m.key == key)
            .and_then(|m| m.string_value.as_deref())
    }

    /// Raw checksum from custom metadata, if the uploader recorded one
    pub fn checksum(&self) -> Option<&str> {
        self.metadata(CHECKSUM_KEY).filter(|v| !v.is_empty())
    }

    /// Trailing document id segment
    pub fn short_id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Parsed `createTime`; `None` when absent or malformed
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.create_time)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Creation order for picking the newest of several same-named
    /// documents. Timestamps differ in fractional precision, so they are
    /// compared as instants; unparseable ones sort oldest.
    pub fn newer_than(&self, other: &Document) -> bool {
        self.created_at() > other.created_at()
    }
}

/// The API sends int64 fields as JSON strings.
fn size_from_string_or_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }
    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(0),
        Some(Raw::Num(n)) => Ok(n),
        Some(Raw::Str(s)) if s.is_empty() => Ok(0),
        Some(Raw::Str(s)) => Ok(s.parse().unwrap_or_else(|e| {
            tracing::warn!(size = %s, "unparseable sizeBytes, using 0: {e}");
            0
        })),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatus {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse {
    #[serde(default)]
    pub document_name: Option<String>,
}

/// Handle for asynchronous remote work
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub response: Option<OperationResponse>,
    #[serde(default)]
    pub error: Option<OperationStatus>,
}

impl Operation {
    /// A finished operation wrapping a document that was created synchronously
    pub fn completed(document_name: impl Into<String>) -> Self {
        let document_name = document_name.into();
        Self {
            name: document_name.clone(),
            done: true,
            response: Some(OperationResponse {
                document_name: Some(document_name),
            }),
            error: None,
        }
    }

    pub fn document_name(&self) -> Option<&str> {
        self.response
            .as_ref()
            .and_then(|r| r.document_name.as_deref())
            .filter(|n| !n.is_empty())
    }

    /// Err if the remote reported a failure for this operation
    pub fn check(&self) -> RemoteResult<()> {
        match &self.error {
            Some(status) if status.code != 0 || !status.message.is_empty() => {
                Err(RemoteError::OperationFailed {
                    name: self.name.clone(),
                    code: status.code,
                    message: status.message.clone(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Content to upload
#[derive(Debug, Clone)]
pub enum UploadBody {
    File(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub display_name: String,
    pub mime_type: String,
    pub custom_metadata: Vec<CustomMetadata>,
    pub body: UploadBody,
}

impl UploadRequest {
    pub fn validate(&self) -> RemoteResult<()> {
        if self.custom_metadata.len() > MAX_METADATA_ENTRIES {
            return Err(RemoteError::InvalidRequest(format!(
                "{} custom metadata entries (max {MAX_METADATA_ENTRIES})",
                self.custom_metadata.len()
            )));
        }
        for entry in &self.custom_metadata {
            if let Some(v) = &entry.string_value {
                if v.chars().count() > MAX_METADATA_VALUE_LEN {
                    return Err(RemoteError::InvalidRequest(format!(
                        "custom metadata '{}' exceeds {MAX_METADATA_VALUE_LEN} characters",
                        entry.key
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub model: String,
    pub question: String,
    /// Canonical store ids
    pub stores: Vec<String>,
    pub metadata_filter: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub uri: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
}
