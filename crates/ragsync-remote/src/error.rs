use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Failures at the remote boundary. Every variant names the call and its target.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{op} {target}: HTTP {status}: {body}")]
    Status {
        op: &'static str,
        target: String,
        status: u16,
        body: String,
    },

    #[error("{op} {target}: not found")]
    NotFound { op: &'static str, target: String },

    #[error("{op} {target}: request failed: {source}")]
    Transport {
        op: &'static str,
        target: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{op} {target}: malformed response: {message}")]
    Decode {
        op: &'static str,
        target: String,
        message: String,
    },

    #[error("operation {name} failed (code {code}): {message}")]
    OperationFailed {
        name: String,
        code: i32,
        message: String,
    },

    #[error("operation {name} not done after {waited:?}")]
    Timeout { name: String, waited: Duration },

    #[error("store name '{name}' is ambiguous, matches: {}", ids.join(", "))]
    AmbiguousStore { name: String, ids: Vec<String> },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("reading upload source {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound { .. })
    }
}

impl From<RemoteError> for ragsync_core::RagsyncError {
    fn from(err: RemoteError) -> Self {
        ragsync_core::RagsyncError::Remote(err.to_string())
    }
}
