//! Fixed-interval polling of asynchronous remote operations

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{RemoteError, RemoteResult};
use crate::gateway::RemoteGateway;
use crate::types::Operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// Give up after this long; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Some(Duration::from_secs(600)),
        }
    }
}

impl From<&ragsync_core::config::UploadConfig> for PollConfig {
    fn from(cfg: &ragsync_core::config::UploadConfig) -> Self {
        Self {
            interval: cfg.poll_interval(),
            timeout: cfg.operation_timeout(),
        }
    }
}

/// Poll `operation` until it is done, the remote reports an error, or the
/// timeout elapses. Blocks the calling task for the operation's lifetime.
pub async fn wait_for_operation(
    gateway: &dyn RemoteGateway,
    operation: Operation,
    poll: PollConfig,
) -> RemoteResult<Operation> {
    operation.check()?;
    if operation.done {
        return Ok(operation);
    }

    let started = Instant::now();
    let mut current = operation;
    loop {
        if let Some(limit) = poll.timeout {
            let waited = started.elapsed();
            if waited >= limit {
                return Err(RemoteError::Timeout {
                    name: current.name,
                    waited,
                });
            }
        }
        tokio::time::sleep(poll.interval).await;

        current = gateway.get_operation(&current.name).await?;
        current.check()?;
        if current.done {
            return Ok(current);
        }
        debug!(operation = %current.name, "still running");
    }
}
