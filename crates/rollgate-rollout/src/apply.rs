//! Apply coordination.
//!
//! The manifest is streamed into `kubectl apply -o name`. Each `kind/name`
//! line it prints is recorded in the configured-object index as soon as it
//! arrives, and every newly seen deployment gets its rollout watch started
//! right away, while the apply may still be running.

use std::collections::BTreeSet;
use std::sync::Arc;

use regex::Regex;
use rollgate_cluster::{ClusterMutator, ManifestSource};
use rollgate_core::{
    ConfiguredObjectIndex, ItemError, KIND_DEPLOYMENT, ObjectIndexBuilder, RolloutConfig, Stage,
    StageFailure, Timeout,
};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::ApplyError;

/// Capacity of the apply output channel.
const LINE_BUFFER: usize = 64;

/// `kind[.group]/name [verb]`, e.g. `deployment.apps/web configured`.
const OBJECT_LINE_PATTERN: &str = r"^\s*([A-Za-z0-9_-]+)(?:\.[A-Za-z0-9_.-]+)?/([A-Za-z0-9_.-]+)(?:\s+(\w+))?";

/// An object named in one line of apply output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredObject {
    /// Lower-cased kind with any API group stripped.
    pub kind: String,
    pub name: String,
    /// Trailing verb (`configured`, `created`, `unchanged`) when present.
    pub action: Option<String>,
}

/// Parses apply output lines into [`DiscoveredObject`]s.
#[derive(Debug, Clone)]
pub struct ObjectLineParser {
    pattern: Regex,
}

impl ObjectLineParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(OBJECT_LINE_PATTERN)?,
        })
    }

    /// Lines that do not look like `kind/name` yield `None`.
    pub fn parse(&self, line: &str) -> Option<DiscoveredObject> {
        let caps = self.pattern.captures(line)?;
        Some(DiscoveredObject {
            kind: caps[1].to_ascii_lowercase(),
            name: caps[2].to_string(),
            action: caps.get(3).map(|m| m.as_str().to_string()),
        })
    }
}

/// What the apply stage produced.
///
/// `failure` is set when one or more rollout watches failed. The index is
/// complete either way, so the caller can still diff and roll back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub index: ConfiguredObjectIndex,
    pub failure: Option<StageFailure>,
}

/// Streams the manifest into apply and watches each deployment it reports.
pub struct ApplyCoordinator<C: ?Sized> {
    cluster: Arc<C>,
    deploy_wait_timeout: Timeout,
    parser: ObjectLineParser,
}

impl<C> ApplyCoordinator<C>
where
    C: ClusterMutator + ?Sized + 'static,
{
    /// Fails only if the object line pattern does not compile.
    pub fn new(cluster: Arc<C>, config: &RolloutConfig) -> Result<Self, ApplyError> {
        Ok(Self {
            cluster,
            deploy_wait_timeout: config.deploy_wait_timeout,
            parser: ObjectLineParser::new()?,
        })
    }

    /// Apply `manifest` and wait for every discovered deployment's rollout.
    ///
    /// A non-zero apply exit is fatal and returned as `Err`; pending watches
    /// are aborted. Watch failures are collected into
    /// [`ApplyOutcome::failure`].
    pub async fn apply(&self, manifest: ManifestSource) -> Result<ApplyOutcome, ApplyError> {
        info!("calling kubectl to apply changes");

        let (tx, mut rx) = mpsc::channel(LINE_BUFFER);
        let cluster = Arc::clone(&self.cluster);
        let apply_task = tokio::spawn(async move { cluster.apply(manifest, tx).await });

        let mut builder = ObjectIndexBuilder::new();
        let mut watches = JoinSet::new();
        let mut watched = Vec::new();

        while let Some(line) = rx.recv().await {
            info!(target: "kubectl", "[KUBECTL] {line}");
            let Some(object) = self.parser.parse(&line) else {
                continue;
            };
            if !builder.record(&object.kind, &object.name) {
                debug!(kind = %object.kind, name = %object.name, "object already recorded");
                continue;
            }
            if let Some(action) = &object.action {
                debug!(kind = %object.kind, name = %object.name, %action, "object applied");
            }
            if object.kind == KIND_DEPLOYMENT {
                self.watch(&mut watches, object.name.clone());
                watched.push(object.name);
            }
        }

        match apply_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, "kubectl apply failed");
                return Err(e.into());
            }
            Err(e) => return Err(ApplyError::Join(e.to_string())),
        }

        let index = builder.finish();
        info!(deployments = ?index.deployments(), "waiting until deployments have been applied");

        let mut finished = BTreeSet::new();
        let mut errors = Vec::new();
        while let Some(joined) = watches.join_next().await {
            match joined {
                Ok((name, result)) => {
                    if let Err(reason) = result {
                        errors.push(ItemError::RolloutStatus {
                            name: name.clone(),
                            reason,
                        });
                    }
                    finished.insert(name);
                }
                Err(e) => error!(error = %e, "rollout watch did not complete"),
            }
        }
        for name in watched.into_iter().filter(|n| !finished.contains(n)) {
            errors.push(ItemError::RolloutStatus {
                name,
                reason: "rollout watch did not complete".to_string(),
            });
        }
        errors.sort_by(|a, b| a.name().cmp(b.name()));

        let failure = (!errors.is_empty())
            .then(|| StageFailure::from_errors(Stage::Apply, "rollout status failed for deployments", errors));
        Ok(ApplyOutcome { index, failure })
    }

    fn watch(&self, watches: &mut JoinSet<(String, Result<(), String>)>, name: String) {
        let cluster = Arc::clone(&self.cluster);
        let timeout = self.deploy_wait_timeout;
        debug!(deployment = %name, %timeout, "starting rollout watch");
        watches.spawn(async move {
            match cluster.rollout_status(&name, timeout).await {
                Ok(()) => {
                    info!(deployment = %name, "rollout complete");
                    (name, Ok(()))
                }
                Err(e) => {
                    error!(deployment = %name, error = %e, "[kubectl rollout status error] {e}");
                    (name, Err(e.to_string()))
                }
            }
        });
    }
}
