//! rollgate-cluster: the boundary between rollgate and the cluster.
//!
//! Two async traits split the cluster operations by effect:
//!
//! ```text
//! ClusterStateReader (read-only, idempotent)
//!   ├── list_deployments / get_deployment
//!   ├── get_service
//!   └── list_pods(selector)
//! ClusterMutator (writes)
//!   ├── apply(manifest, line sink)
//!   ├── rollout_status(deployment, timeout)
//!   └── rollout_undo(deployment)
//! ```
//!
//! [`Kubectl`] implements both by driving the `kubectl` binary. With the
//! `testing` feature, [`fake::FakeCluster`] implements both from a script.

pub mod client;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod fake;
pub mod kubectl;
pub mod types;

pub use client::{ClusterMutator, ClusterStateReader, ManifestSource};
pub use error::{ClusterError, ClusterResult};
pub use kubectl::Kubectl;
pub use types::*;
