//! Per-stage fan-out with a join barrier.
//!
//! Each item runs in its own task and owns its own result slot. Slots are
//! merged only after every task has finished, so one item's failure (or
//! panic) never cuts a sibling short.

use std::collections::BTreeMap;
use std::future::Future;

use rollgate_core::{ItemError, Stage, StageFailure, StageResult};
use tokio::task::JoinSet;
use tracing::error;

/// Result of one item in a fan-out. `Err` holds a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome<T> {
    pub name: String,
    pub result: Result<T, String>,
}

/// Run `task` for every name concurrently and wait for all of them.
///
/// Outcomes come back in the order of `names`, whatever order the tasks
/// finished in.
pub async fn fan_out<T, F, Fut>(names: &[String], task: F) -> Vec<ItemOutcome<T>>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
    T: Send + 'static,
{
    let mut join_set = JoinSet::new();
    for (idx, name) in names.iter().cloned().enumerate() {
        let item = task(name);
        join_set.spawn(async move { (idx, item.await) });
    }

    let mut slots: Vec<Option<Result<T, String>>> = names.iter().map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((idx, result)) => slots[idx] = Some(result),
            Err(e) => error!(error = %e, "verification task did not complete"),
        }
    }

    names
        .iter()
        .zip(slots)
        .map(|(name, slot)| ItemOutcome {
            name: name.clone(),
            result: slot.unwrap_or_else(|| Err("verification task did not complete".to_string())),
        })
        .collect()
}

/// What a verification stage resolved, and its aggregate failure if any
/// item failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport<T> {
    pub stage: Stage,
    /// Successful items and their values, kept even when the stage fails.
    pub resolved: BTreeMap<String, T>,
    pub failure: Option<StageFailure>,
}

impl<T> StageReport<T> {
    /// Merge item outcomes. Failed items become `ItemError`s via
    /// `to_error(name, reason)`.
    pub fn collect(
        stage: Stage,
        message: &str,
        outcomes: Vec<ItemOutcome<T>>,
        to_error: impl Fn(String, String) -> ItemError,
    ) -> Self {
        let mut resolved = BTreeMap::new();
        let mut errors = Vec::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(value) => {
                    resolved.insert(outcome.name, value);
                }
                Err(reason) => errors.push(to_error(outcome.name, reason)),
            }
        }

        let failure = (!errors.is_empty()).then(|| StageFailure::from_errors(stage, message, errors));
        Self {
            stage,
            resolved,
            failure,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn into_result(self) -> StageResult<BTreeMap<String, T>> {
        match self.failure {
            Some(failure) => Err(failure),
            None => Ok(self.resolved),
        }
    }
}
