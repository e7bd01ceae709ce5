//! Error types shared across rollgate crates.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while resolving a [`crate::RolloutConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value {value:?} for {key}: expected seconds or a duration like 30s, 500ms, 2m")]
    InvalidDuration { key: String, value: String },

    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,
}

/// A single item's failure inside a stage.
///
/// Item errors are always caught by the stage that produced them and merged
/// into that stage's [`crate::StageFailure`]; they never abort siblings.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemError {
    /// `rollout status` failed or timed out for a deployment.
    #[error("rollout status failed for deployment {name}: {reason}")]
    RolloutStatus { name: String, reason: String },

    /// Available replicas never reached the desired count.
    #[error("replicas did not converge for deployment {name}: {reason}")]
    ReplicaConvergence { name: String, reason: String },

    /// No running and ready pod appeared behind a service.
    #[error("service {name} has no running and ready pod: {reason}")]
    ServiceReadiness { name: String, reason: String },

    /// A service was never assigned an ingress IP or hostname.
    #[error("no load balancer address for service {name}: {reason}")]
    LoadBalancerTimeout { name: String, reason: String },

    /// `rollout undo` failed. Reported only, never retried.
    #[error("rollback of deployment {name} failed: {reason}")]
    RollbackItem { name: String, reason: String },
}

impl ItemError {
    /// Name of the deployment or service the error belongs to.
    pub fn name(&self) -> &str {
        match self {
            ItemError::RolloutStatus { name, .. }
            | ItemError::ReplicaConvergence { name, .. }
            | ItemError::ServiceReadiness { name, .. }
            | ItemError::LoadBalancerTimeout { name, .. }
            | ItemError::RollbackItem { name, .. } => name,
        }
    }

    /// Human-readable cause, without the item name.
    pub fn reason(&self) -> &str {
        match self {
            ItemError::RolloutStatus { reason, .. }
            | ItemError::ReplicaConvergence { reason, .. }
            | ItemError::ServiceReadiness { reason, .. }
            | ItemError::LoadBalancerTimeout { reason, .. }
            | ItemError::RollbackItem { reason, .. } => reason,
        }
    }
}
