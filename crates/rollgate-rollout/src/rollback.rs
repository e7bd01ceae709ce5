//! Contained rollback.
//!
//! Only deployments that both failed and were changed by this run are
//! reverted. Any other name in a failure is left alone.
//!
//! Service stage failures name services, not deployments. They are mapped to
//! deployments by name: a failing service `web` rolls back deployment `web`
//! if this run changed it, and nothing otherwise.

use std::sync::Arc;

use rollgate_cluster::ClusterMutator;
use rollgate_core::{
    ChangedSet, ItemError, RollbackItemResult, RollbackOutcome, RollbackStatus, Stage,
    StageFailure,
};
use rollgate_health::fan_out;
use tracing::{error, info, warn};

/// Split a failure's names into rollback targets (also in `changed`) and
/// skipped names, both sorted.
///
/// Names are compared as-is, so service names only match deployments of the
/// same name.
pub fn rollback_targets(failure: &StageFailure, changed: &ChangedSet) -> (Vec<String>, Vec<String>) {
    failure
        .names
        .iter()
        .cloned()
        .partition(|name| changed.contains(name))
}

/// Whether a stage's failure names are services rather than deployments.
pub fn maps_services_by_name(stage: Stage) -> bool {
    matches!(stage, Stage::Services | Stage::Endpoints)
}

/// Reverts the contained subset of a stage failure with `rollout undo`.
pub struct RollbackCoordinator<C: ?Sized> {
    cluster: Arc<C>,
}

impl<C> RollbackCoordinator<C>
where
    C: ClusterMutator + ?Sized + 'static,
{
    pub fn new(cluster: Arc<C>) -> Self {
        Self { cluster }
    }

    /// Undo every eligible deployment concurrently and wait for all of
    /// them. Individual undo failures are recorded, never raised.
    pub async fn rollback(&self, failure: &StageFailure, changed: &ChangedSet) -> RollbackOutcome {
        let (targets, skipped) = rollback_targets(failure, changed);
        warn!(
            stage = %failure.stage,
            targets = ?targets,
            "DEPLOYMENT FAILED: {}; rolling back", failure.message
        );
        if maps_services_by_name(failure.stage) {
            warn!(
                stage = %failure.stage,
                services = ?failure.names,
                "service failures are mapped to deployments of the same name"
            );
        }
        if !skipped.is_empty() {
            info!(skipped = ?skipped, "not in changed set, leaving in place");
        }
        if targets.is_empty() {
            warn!("no changed deployments to roll back");
            return RollbackOutcome {
                targets,
                skipped,
                results: Vec::new(),
            };
        }

        let outcomes = fan_out(&targets, |name| {
            let cluster = Arc::clone(&self.cluster);
            async move {
                match cluster.rollout_undo(&name).await {
                    Ok(output) => {
                        info!(deployment = %name, "{output}");
                        Ok(output)
                    }
                    Err(e) => {
                        error!(deployment = %name, error = %e, "error rolling back {name}");
                        Err(e.to_string())
                    }
                }
            }
        })
        .await;

        let results = outcomes
            .into_iter()
            .map(|outcome| {
                let status = match outcome.result {
                    Ok(output) => RollbackStatus::RolledBack { output },
                    Err(reason) => RollbackStatus::Failed {
                        error: ItemError::RollbackItem {
                            name: outcome.name.clone(),
                            reason,
                        },
                    },
                };
                RollbackItemResult {
                    name: outcome.name,
                    status,
                }
            })
            .collect();

        info!("rollback finished");
        RollbackOutcome {
            targets,
            skipped,
            results,
        }
    }
}
