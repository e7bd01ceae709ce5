//! Fatal pipeline errors.
//!
//! These end a run without rollback: either nothing was applied yet, or the
//! changed set could not be established.

use rollgate_cluster::ClusterError;
use thiserror::Error;

/// Fatal apply failures. None of these lead to a rollback.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("kubectl apply exited with {}: {stderr}", .code.map(|c| format!("code {c}")).unwrap_or_else(|| "a signal".to_string()))]
    Exited { code: Option<i32>, stderr: String },

    #[error("kubectl apply could not run: {0}")]
    Cluster(ClusterError),

    /// The task streaming the manifest panicked or was cancelled.
    #[error("apply task did not complete: {0}")]
    Join(String),

    #[error("invalid object line pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl From<ClusterError> for ApplyError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::CommandFailed { code, stderr, .. } => ApplyError::Exited { code, stderr },
            other => ApplyError::Cluster(other),
        }
    }
}

/// Failures that end a run before a rollback can be contained.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to capture generation snapshot: {0}")]
    Snapshot(#[source] ClusterError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error("failed to list deployments after apply: {0}")]
    Diff(#[source] ClusterError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_zero_exit_maps_to_exited() {
        let err: ApplyError = ClusterError::CommandFailed {
            command: "kubectl apply -o name -f -".to_string(),
            code: Some(1),
            stderr: "error: no objects passed to apply".to_string(),
        }
        .into();
        assert!(matches!(err, ApplyError::Exited { code: Some(1), .. }));
        assert_eq!(
            err.to_string(),
            "kubectl apply exited with code 1: error: no objects passed to apply"
        );
    }

    #[test]
    fn io_failures_stay_cluster_errors() {
        let err: ApplyError = ClusterError::Io(std::io::Error::other("broken pipe")).into();
        assert!(matches!(err, ApplyError::Cluster(_)));
    }
}
