//! Local metadata catalog: which files were synced to which remote documents.
//!
//! The whole catalog sits behind one reader/writer lock. Workers read and
//! upsert records concurrently; the file on disk is rewritten once per
//! command via `save`, atomically (temp file then rename).
//!
//! There is no cross-process locking. Two commands running against the
//! same catalog file at once can lose each other's updates.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ragsync_core::types::{CatalogData, FileRecord, StoreRecord};

use crate::checksum;

pub struct Catalog {
    path: PathBuf,
    data: RwLock<CatalogData>,
    dirty: AtomicBool,
}

impl Catalog {
    /// Load the catalog at `path`. A missing file starts an empty catalog;
    /// an unreadable or corrupt one is an error.
    pub fn open(path: &Path) -> Result<Self> {
        let mut data: CatalogData = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading catalog: {}", path.display()))?;
            if content.trim().is_empty() {
                CatalogData::default()
            } else {
                serde_json::from_str(&content)
                    .with_context(|| format!("parsing catalog: {}", path.display()))?
            }
        } else {
            CatalogData::default()
        };

        for store in data.stores.values_mut() {
            for record in store.files.values_mut() {
                record.checksum = checksum::normalize(&record.checksum);
            }
        }

        Ok(Catalog {
            path: path.to_path_buf(),
            data: RwLock::new(data),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> RwLockReadGuard<'_, CatalogData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CatalogData> {
        let guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        self.dirty.store(true, Ordering::Release);
        guard
    }

    /// Return the store, creating an empty one if absent
    pub fn get_or_create_store(&self, name: &str) -> StoreRecord {
        if let Some(store) = self.get_store(name) {
            return store;
        }
        self.write()
            .stores
            .entry(name.to_string())
            .or_insert_with(|| StoreRecord::new(name))
            .clone()
    }

    pub fn get_store(&self, name: &str) -> Option<StoreRecord> {
        self.read().stores.get(name).cloned()
    }

    /// Look up a store by key or by recorded display name
    pub fn find_store(&self, name: &str) -> Option<StoreRecord> {
        let data = self.read();
        data.stores
            .get(name)
            .or_else(|| data.stores.values().find(|s| s.answers_to(name)))
            .cloned()
    }

    pub fn list_stores(&self) -> Vec<StoreRecord> {
        self.read().stores.values().cloned().collect()
    }

    /// Remember the remote display name of a store
    pub fn set_display_name(&self, store: &str, display_name: &str) {
        let mut data = self.write();
        let entry = data
            .stores
            .entry(store.to_string())
            .or_insert_with(|| StoreRecord::new(store));
        if entry.display_name.as_deref() != Some(display_name) {
            entry.display_name = Some(display_name.to_string());
            entry.touch();
        }
    }

    /// Insert or replace the record keyed by `record.local_path`
    pub fn add_file(&self, store: &str, record: FileRecord) {
        let mut data = self.write();
        let entry = data
            .stores
            .entry(store.to_string())
            .or_insert_with(|| StoreRecord::new(store));
        entry.files.insert(record.local_path.clone(), record);
        entry.touch();
    }

    /// Remove a record; returns it if it existed
    pub fn remove_file(&self, store: &str, local_path: &str) -> Option<FileRecord> {
        let mut data = self.write();
        let entry = data.stores.get_mut(store)?;
        let removed = entry.files.remove(local_path);
        if removed.is_some() {
            entry.touch();
        }
        removed
    }

    pub fn get_by_path(&self, store: &str, local_path: &str) -> Option<FileRecord> {
        self.read()
            .stores
            .get(store)
            .and_then(|s| s.files.get(local_path))
            .cloned()
    }

    /// First record in the store with this checksum (linear scan)
    pub fn get_by_checksum(&self, store: &str, checksum: &str) -> Option<FileRecord> {
        self.read()
            .stores
            .get(store)
            .and_then(|s| s.files.values().find(|r| r.checksum == checksum))
            .cloned()
    }

    /// First record in the store pointing at this remote document
    pub fn get_by_remote_id(&self, store: &str, remote_id: &str) -> Option<FileRecord> {
        self.read()
            .stores
            .get(store)
            .and_then(|s| s.files.values().find(|r| r.remote_id == remote_id))
            .cloned()
    }

    pub fn all_files(&self, store: &str) -> Vec<FileRecord> {
        self.read()
            .stores
            .get(store)
            .map(|s| s.files.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn file_count(&self, store: &str) -> usize {
        self.read().stores.get(store).map_or(0, |s| s.files.len())
    }

    /// Drop a store and every record in it
    pub fn delete_store(&self, store: &str) -> Option<StoreRecord> {
        self.write().stores.remove(store)
    }

    /// Write the catalog to disk if anything changed since the last save.
    pub fn save(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.write_to_disk();
        if result.is_err() {
            self.dirty.store(true, Ordering::Release);
        }
        result
    }

    fn write_to_disk(&self) -> Result<()> {
        let data = self.read();

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating catalog dir: {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(&*data).context("serializing catalog")?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &json)
            .with_context(|| format!("writing catalog temp: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming catalog: {}", self.path.display()))?;

        tracing::debug!(path = %self.path.display(), "catalog saved");
        Ok(())
    }
}

/// Build a record for content that is now in sync with `remote_id`
pub fn make_record(
    local_path: &str,
    remote_id: &str,
    remote_name: &str,
    checksum: &str,
    size: u64,
    mime_type: &str,
) -> FileRecord {
    FileRecord {
        local_path: local_path.to_string(),
        remote_id: remote_id.to_string(),
        remote_name: remote_name.to_string(),
        checksum: checksum.to_string(),
        size,
        uploaded_at: Utc::now(),
        mime_type: mime_type.to_string(),
    }
}
