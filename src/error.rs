use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Failure of the external media tool (spawn error, non-zero exit, bad output).
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("failed to run {program}: {reason}")]
    Spawn { program: String, reason: String },
    #[error("{program} exited with status {status}: {stderr}")]
    Exit {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("could not parse tool output: {0}")]
    Parse(String),
}

/// Why a track could not be made local.
///
/// Cloneable so that every caller waiting on the same in-flight fetch
/// receives the same outcome.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("tool finished but {0} was not written")]
    Missing(String),
    #[error("pending download was cancelled")]
    Cancelled,
    #[error("cache io error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        FetchError::Io(Arc::new(e))
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected to a voice channel")]
    NotConnected,
    #[error("voice driver rejected the track: {0}")]
    Driver(String),
    #[error("failed to join voice channel: {0}")]
    Join(String),
}

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("failed to send panel message: {0}")]
    Send(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] json5::Error),
}
