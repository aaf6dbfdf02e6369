use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RagsyncError, RagsyncResult};

pub const DEFAULT_PARALLELISM: usize = 5;
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

/// Top-level configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagsyncConfig {
    pub remote: RemoteConfig,
    pub catalog: CatalogConfig,
    pub upload: UploadConfig,
    pub query: QueryConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// REST endpoint for stores, documents, operations, and queries
    pub base_url: String,
    /// Endpoint for multipart document uploads
    pub upload_base_url: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Local catalog JSON file (default: ~/.ragsync.json)
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Concurrent upload workers (default: 5)
    pub parallelism: usize,
    /// Interval between operation status checks
    pub poll_interval_ms: u64,
    /// Maximum wait for one upload operation (0 = no limit)
    pub operation_timeout_secs: u64,
    /// Regular expressions matched against full paths
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            upload_base_url: "https://generativelanguage.googleapis.com/upload/v1beta".into(),
            request_timeout_secs: 300,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.ragsync.json"),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            poll_interval_ms: 2000,
            operation_timeout_secs: 600,
            exclude_patterns: Vec::new(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.into(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl UploadConfig {
    /// Worker count, never zero
    pub fn effective_parallelism(&self) -> usize {
        if self.parallelism == 0 {
            DEFAULT_PARALLELISM
        } else {
            self.parallelism
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        match self.operation_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl RagsyncConfig {
    /// Parse a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> RagsyncResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| RagsyncError::Config(format!("parsing {}: {e}", path.display())))
    }

    pub fn validate(&self) -> RagsyncResult<()> {
        if self.remote.base_url.is_empty() || self.remote.upload_base_url.is_empty() {
            return Err(RagsyncError::Config("remote base URLs must not be empty".into()));
        }
        match self.log.format.as_str() {
            "text" | "json" => {}
            other => {
                return Err(RagsyncError::Config(format!(
                    "unknown log format '{other}' (expected text or json)"
                )))
            }
        }
        if self.query.model.trim().is_empty() {
            return Err(RagsyncError::Config("query model must not be empty".into()));
        }
        Ok(())
    }
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}
