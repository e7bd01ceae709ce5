//! Cluster collaborator traits.

use async_trait::async_trait;
use rollgate_core::Timeout;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;

use crate::error::ClusterResult;
use crate::types::{Deployment, Pod, Service};

/// Manifest document handed to `apply`, read as a stream.
pub type ManifestSource = Box<dyn AsyncRead + Send + Unpin>;

/// Read-only queries. Every call is idempotent and safe to repeat while
/// polling.
#[async_trait]
pub trait ClusterStateReader: Send + Sync {
    async fn list_deployments(&self) -> ClusterResult<Vec<Deployment>>;

    async fn get_deployment(&self, name: &str) -> ClusterResult<Deployment>;

    async fn get_service(&self, name: &str) -> ClusterResult<Service>;

    /// Pods matching a label selector expression (`app=web,tier=frontend`).
    async fn list_pods(&self, selector: &str) -> ClusterResult<Vec<Pod>>;
}

/// Write operations: apply, rollout watches, and undo.
#[async_trait]
pub trait ClusterMutator: Send + Sync {
    /// Apply `manifest`, sending each `kind/name` output line on `lines` as
    /// soon as it is produced. Returns once the apply has exited; a non-zero
    /// exit is an error.
    async fn apply(&self, manifest: ManifestSource, lines: mpsc::Sender<String>) -> ClusterResult<()>;

    /// Block until the deployment's rollout completes or `timeout` expires.
    async fn rollout_status(&self, deployment: &str, timeout: Timeout) -> ClusterResult<()>;

    /// Revert the deployment to its previous revision. Returns the tool's
    /// output, which is informational only.
    async fn rollout_undo(&self, deployment: &str) -> ClusterResult<String>;
}
