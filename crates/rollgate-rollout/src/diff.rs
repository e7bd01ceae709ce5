//! Generation diff.
//!
//! A deployment counts as changed if its observed generation moved during
//! apply, or if it did not exist before. Only deployments named in the
//! apply output are considered.

use rollgate_cluster::Deployment;
use rollgate_core::{ChangedSet, ConfiguredObjectIndex, GenerationChange, GenerationSnapshot};
use tracing::{info, warn};

/// Capture name → observed generation for every listed deployment.
pub fn capture_snapshot(deployments: &[Deployment]) -> GenerationSnapshot {
    deployments
        .iter()
        .map(|d| (d.name().to_string(), d.observed_generation()))
        .collect()
}

/// Compare post-apply generations against the snapshot, for configured
/// deployments only, in discovery order.
pub fn diff_generations(
    snapshot: &GenerationSnapshot,
    current: &[Deployment],
    index: &ConfiguredObjectIndex,
) -> Vec<GenerationChange> {
    let mut changes = Vec::with_capacity(index.deployments().len());
    for name in index.deployments() {
        let Some(deployment) = current.iter().find(|d| d.name() == name) else {
            warn!(deployment = %name, "configured deployment not found after apply");
            continue;
        };
        let generation = deployment.observed_generation();

        let change = match snapshot.get(name) {
            Some(previous) if previous == generation => {
                info!(deployment = %name, generation, "\t{name} UNCHANGED");
                GenerationChange::Unchanged {
                    name: name.clone(),
                    generation,
                }
            }
            Some(previous) => {
                info!(deployment = %name, from = previous, to = generation, "\t{name} V {previous} => {generation}");
                GenerationChange::Updated {
                    name: name.clone(),
                    from: previous,
                    to: generation,
                }
            }
            None => {
                info!(deployment = %name, generation, "\t{name} ADDED");
                GenerationChange::Added {
                    name: name.clone(),
                    generation,
                }
            }
        };
        changes.push(change);
    }
    changes
}

pub fn changed_set(changes: &[GenerationChange]) -> ChangedSet {
    changes
        .iter()
        .filter(|c| c.is_changed())
        .map(|c| c.name().to_string())
        .collect()
}
