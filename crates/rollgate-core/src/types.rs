//! Data model passed between pipeline stages.
//!
//! Every value here lives for a single pipeline run. Nothing is persisted.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ItemError;

/// Object kind for workloads tracked by generation.
pub const KIND_DEPLOYMENT: &str = "deployment";
/// Object kind for services checked for readiness and endpoints.
pub const KIND_SERVICE: &str = "service";

// ── Generation snapshot ───────────────────────────────────────────

/// Deployment name → observed generation, captured once before apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationSnapshot(BTreeMap<String, i64>);

impl GenerationSnapshot {
    /// Generation recorded for `name` before apply.
    pub fn get(&self, name: &str) -> Option<i64> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, i64)> for GenerationSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ── Configured objects ────────────────────────────────────────────

/// Kind → object names discovered in apply output, in discovery order.
///
/// Only an [`ObjectIndexBuilder`] can add entries; once
/// [`ObjectIndexBuilder::finish`] is called the index is frozen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfiguredObjectIndex {
    objects: BTreeMap<String, Vec<String>>,
}

impl ConfiguredObjectIndex {
    /// Names recorded for `kind`, in discovery order.
    pub fn names(&self, kind: &str) -> &[String] {
        self.objects.get(kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn deployments(&self) -> &[String] {
        self.names(KIND_DEPLOYMENT)
    }

    pub fn services(&self) -> &[String] {
        self.names(KIND_SERVICE)
    }

    pub fn contains(&self, kind: &str, name: &str) -> bool {
        self.names(kind).iter().any(|n| n == name)
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Incrementally populates a [`ConfiguredObjectIndex`] during apply.
#[derive(Debug, Default)]
pub struct ObjectIndexBuilder {
    index: ConfiguredObjectIndex,
}

impl ObjectIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an object. Returns `false` if it was already recorded.
    pub fn record(&mut self, kind: &str, name: &str) -> bool {
        let names = self.index.objects.entry(kind.to_string()).or_default();
        if names.iter().any(|n| n == name) {
            return false;
        }
        names.push(name.to_string());
        true
    }

    pub fn finish(self) -> ConfiguredObjectIndex {
        self.index
    }
}

// ── Changed set ───────────────────────────────────────────────────

/// Deployments whose generation moved (or which appeared) during apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedSet(BTreeSet<String>);

impl ChangedSet {
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl FromIterator<String> for ChangedSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// How one configured deployment's generation compares with the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum GenerationChange {
    /// Generation moved during apply.
    Updated { name: String, from: i64, to: i64 },
    /// Generation is the same as in the snapshot.
    Unchanged { name: String, generation: i64 },
    /// Not present in the snapshot.
    Added { name: String, generation: i64 },
}

impl GenerationChange {
    pub fn name(&self) -> &str {
        match self {
            GenerationChange::Updated { name, .. }
            | GenerationChange::Unchanged { name, .. }
            | GenerationChange::Added { name, .. } => name,
        }
    }

    /// Updated and added deployments are changed.
    pub fn is_changed(&self) -> bool {
        !matches!(self, GenerationChange::Unchanged { .. })
    }
}

// ── Stage failures ────────────────────────────────────────────────

/// Pipeline stage that can produce a [`StageFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Rollout status watches started during apply.
    Apply,
    /// Available replica convergence of changed deployments.
    Replicas,
    /// Running and ready pods behind each configured service.
    Services,
    /// Load balancer address of each configured service.
    Endpoints,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Apply => "apply",
            Stage::Replicas => "replicas",
            Stage::Services => "services",
            Stage::Endpoints => "endpoints",
        })
    }
}

/// Aggregate failure of one stage, naming only the items that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    /// Failed item names, sorted.
    pub names: BTreeSet<String>,
    /// Summary prefix, e.g. "failed to verify replicas for".
    pub message: String,
    /// One entry per failed item.
    pub errors: Vec<ItemError>,
}

impl StageFailure {
    /// Build a failure from collected item errors. `names` is derived from
    /// the errors so the two can never disagree.
    pub fn from_errors(stage: Stage, message: impl Into<String>, errors: Vec<ItemError>) -> Self {
        let names = errors.iter().map(|e| e.name().to_string()).collect();
        Self {
            stage,
            names,
            message: message.into(),
            errors,
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.names.iter().map(String::as_str).collect();
        write!(f, "{} stage failed: {} {}", self.stage, self.message, names.join(", "))
    }
}

impl std::error::Error for StageFailure {}

/// Explicit per-stage result: the stage's value, or its aggregate failure.
pub type StageResult<T> = Result<T, StageFailure>;

// ── Rollback ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RollbackStatus {
    /// `rollout undo` succeeded; `output` is what it printed.
    RolledBack { output: String },
    Failed { error: ItemError },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackItemResult {
    /// Deployment name.
    pub name: String,
    pub status: RollbackStatus,
}

/// Result of rolling back the eligible subset of a stage failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    /// Names that were rolled back: failure names ∩ changed set.
    pub targets: Vec<String>,
    /// Failed names outside the changed set, left untouched.
    pub skipped: Vec<String>,
    /// One entry per target, in target order.
    pub results: Vec<RollbackItemResult>,
}

impl RollbackOutcome {
    /// True when the failure named nothing eligible for rollback.
    pub fn is_noop(&self) -> bool {
        self.targets.is_empty()
    }

    /// Items whose undo failed.
    pub fn failures(&self) -> impl Iterator<Item = &RollbackItemResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.status, RollbackStatus::Failed { .. }))
    }

    /// True when no undo failed, including when there was nothing to undo.
    pub fn all_succeeded(&self) -> bool {
        self.failures().next().is_none()
    }
}

// ── Pipeline outcome ──────────────────────────────────────────────

/// Phase of the rollout pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutPhase {
    /// Rollout not started.
    Init,
    /// Manifest streaming into apply; rollout watches running.
    Applying,
    /// Comparing post-apply generations against the snapshot.
    Diffing,
    /// Waiting for changed deployments to reach their replica count.
    VerifyingReplicas,
    /// Waiting for a ready pod behind each service.
    VerifyingServices,
    /// Waiting for each service's load balancer address.
    VerifyingEndpoints,
    /// Undoing the failed deployments this run changed.
    RollingBack,
    /// Completed successfully.
    Success,
    /// Ended after a stage failure and rollback.
    Failed,
}

impl fmt::Display for RolloutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RolloutPhase::Init => "init",
            RolloutPhase::Applying => "applying",
            RolloutPhase::Diffing => "diffing",
            RolloutPhase::VerifyingReplicas => "verifying-replicas",
            RolloutPhase::VerifyingServices => "verifying-services",
            RolloutPhase::VerifyingEndpoints => "verifying-endpoints",
            RolloutPhase::RollingBack => "rolling-back",
            RolloutPhase::Success => "success",
            RolloutPhase::Failed => "failed",
        })
    }
}

/// Everything observed during a run, successful or not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutReport {
    /// Phases visited, in order, ending with a terminal phase.
    pub phases: Vec<RolloutPhase>,
    pub configured: ConfiguredObjectIndex,
    pub generation_changes: Vec<GenerationChange>,
    pub changed: ChangedSet,
    /// Deployment → available replicas at convergence.
    pub replicas: BTreeMap<String, i32>,
    /// Service names whose pods became running and ready.
    pub ready_services: Vec<String>,
    /// Service → resolved load balancer address.
    pub endpoints: BTreeMap<String, String>,
}

/// Terminal result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RolloutOutcome {
    Success {
        report: RolloutReport,
    },
    Failed {
        report: RolloutReport,
        failure: StageFailure,
        rollback: RollbackOutcome,
    },
}

impl RolloutOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RolloutOutcome::Success { .. })
    }

    /// The report, whichever way the run ended.
    pub fn report(&self) -> &RolloutReport {
        match self {
            RolloutOutcome::Success { report } | RolloutOutcome::Failed { report, .. } => report,
        }
    }
}
