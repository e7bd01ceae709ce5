//! rollgate-rollout: the rollout pipeline.
//!
//! Drives one fixed sequence against the cluster:
//!
//! ```text
//! snapshot generations
//!   → apply (stream kind/name lines, watch each deployment's rollout)
//!   → diff generations (changed set)
//!   → verify replicas → verify services → verify endpoints
//!   → success
//! any stage failure ─→ roll back (failed names ∩ changed set) → failed
//! ```
//!
//! # Components
//!
//! - **`apply`**: Object-line parser and apply coordinator
//! - **`diff`**: Generation snapshot and changed-set computation
//! - **`rollback`**: Containment-checked concurrent rollback
//! - **`controller`**: Pipeline state machine (`DeploymentOrchestrator`)

pub mod apply;
pub mod controller;
pub mod diff;
pub mod error;
pub mod rollback;

pub use apply::{ApplyCoordinator, ApplyOutcome, DiscoveredObject, ObjectLineParser};
pub use controller::DeploymentOrchestrator;
pub use diff::{capture_snapshot, changed_set, diff_generations};
pub use error::{ApplyError, PipelineError};
pub use rollback::{RollbackCoordinator, maps_services_by_name, rollback_targets};
