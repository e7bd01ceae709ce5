//! Error types for cluster operations.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors that can occur while talking to the cluster.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}: {stderr}", .code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to decode output of `{command}`: {source}")]
    Decode {
        command: String,
        source: serde_json::Error,
    },

    /// The command outlived its timeout and was killed.
    #[error("`{command}` timed out after {}s", .timeout.as_secs())]
    TimedOut { command: String, timeout: Duration },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClusterError {
    /// Exit code of a failed command, if the command ran and exited.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ClusterError::CommandFailed { code, .. } => *code,
            _ => None,
        }
    }
}
