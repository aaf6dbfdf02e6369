use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One tracked local file and the remote document it was last synced to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute local path, unique within a store
    pub local_path: String,
    /// Remote document id (`fileSearchStores/{store}/documents/{doc}`); empty if never uploaded
    #[serde(default)]
    pub remote_id: String,
    /// Display name as seen on the remote side
    #[serde(default)]
    pub remote_name: String,
    /// `sha256:<hex>` of the bytes last known to be in sync
    pub checksum: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub mime_type: String,
}

impl FileRecord {
    pub fn is_uploaded(&self) -> bool {
        !self.remote_id.is_empty()
    }
}

/// A named remote collection and the files tracked for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub name: String,
    /// Human display name of the remote store, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub files: BTreeMap<String, FileRecord>,
}

impl StoreRecord {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            display_name: None,
            created_at: now,
            updated_at: now,
            files: BTreeMap::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// True if `name` is this store's key or its display name
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.display_name.as_deref() == Some(name)
    }
}

/// On-disk catalog shape: `{"stores": {name: StoreRecord}}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogData {
    #[serde(default)]
    pub stores: BTreeMap<String, StoreRecord>,
}
