use thiserror::Error;

pub type RagsyncResult<T> = Result<T, RagsyncError>;

#[derive(Debug, Error)]
pub enum RagsyncError {
    #[error("config error: {0}")]
    Config(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RagsyncError {
    /// Configuration errors are fatal and reported before any I/O happens.
    pub fn is_config(&self) -> bool {
        matches!(self, RagsyncError::Config(_))
    }
}
