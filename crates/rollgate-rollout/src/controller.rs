//! Rollout controller: drives the pipeline state machine.
//!
//! Phases only move forward. Any stage failure diverts to rollback and ends
//! in `Failed`; there is no retry and no resume.

use std::sync::Arc;

use rollgate_cluster::{ClusterMutator, ClusterStateReader, ManifestSource};
use rollgate_core::{
    ChangedSet, RolloutConfig, RolloutOutcome, RolloutPhase, RolloutReport, StageFailure,
};
use rollgate_health::{LoadBalancerResolver, ReplicaConvergenceVerifier, ServiceReadinessVerifier};
use tracing::{debug, error, info, warn};

use crate::apply::ApplyCoordinator;
use crate::diff::{capture_snapshot, changed_set, diff_generations};
use crate::error::PipelineError;
use crate::rollback::RollbackCoordinator;

/// Runs one rollout: apply, diff, verify, and roll back on failure.
pub struct DeploymentOrchestrator<C: ?Sized> {
    cluster: Arc<C>,
    config: RolloutConfig,
    phase: RolloutPhase,
    report: RolloutReport,
}

impl<C> DeploymentOrchestrator<C>
where
    C: ClusterStateReader + ClusterMutator + ?Sized + 'static,
{
    /// A fresh orchestrator in [`RolloutPhase::Init`].
    pub fn new(cluster: Arc<C>, config: RolloutConfig) -> Self {
        Self {
            cluster,
            config,
            phase: RolloutPhase::Init,
            report: RolloutReport {
                phases: vec![RolloutPhase::Init],
                ..Default::default()
            },
        }
    }

    /// Current phase.
    pub fn phase(&self) -> RolloutPhase {
        self.phase
    }

    /// Run the whole pipeline against `manifest`.
    ///
    /// Stage failures end in [`RolloutOutcome::Failed`] after rollback.
    /// `Err` is reserved for failures that leave nothing to roll back or no
    /// changed set to contain a rollback to.
    pub async fn run(mut self, manifest: ManifestSource) -> Result<RolloutOutcome, PipelineError> {
        info!(
            namespace = self.config.namespace.as_deref().unwrap_or("<current context>"),
            deploy_wait_timeout = %self.config.deploy_wait_timeout,
            replica_wait_timeout = %self.config.replica_wait_timeout,
            service_ready_timeout = %self.config.service_ready_timeout,
            "starting rollout"
        );

        let before = self
            .cluster
            .list_deployments()
            .await
            .map_err(PipelineError::Snapshot)?;
        let snapshot = capture_snapshot(&before);
        debug!(deployments = snapshot.len(), "captured generation snapshot");

        self.transition(RolloutPhase::Applying);
        let applied = ApplyCoordinator::new(Arc::clone(&self.cluster), &self.config)?
            .apply(manifest)
            .await?;
        self.report.configured = applied.index.clone();

        // Watch failures do not jump straight from Applying to RollingBack.
        // The diff runs first so the rollback can be limited to
        // `names ∩ changed`; without it there is no changed set to contain it.
        self.transition(RolloutPhase::Diffing);
        info!("all deployments have been applied, checking generations");
        let after = self
            .cluster
            .list_deployments()
            .await
            .map_err(PipelineError::Diff)?;
        let changes = diff_generations(&snapshot, &after, &applied.index);
        let changed = changed_set(&changes);
        self.report.generation_changes = changes;
        self.report.changed = changed.clone();

        if let Some(failure) = applied.failure {
            return Ok(self.fail(failure, &changed).await);
        }

        self.transition(RolloutPhase::VerifyingReplicas);
        info!(deployments = changed.len(), "waiting for replicas to update");
        let replicas = ReplicaConvergenceVerifier::new(Arc::clone(&self.cluster), &self.config)
            .verify(&changed)
            .await;
        self.report.replicas = replicas.resolved;
        if let Some(failure) = replicas.failure {
            return Ok(self.fail(failure, &changed).await);
        }

        let services = applied.index.services().to_vec();

        self.transition(RolloutPhase::VerifyingServices);
        if services.is_empty() {
            info!("SKIPPING: no services were configured");
        } else {
            info!(services = ?services, "waiting for services to become ready");
            let ready = ServiceReadinessVerifier::new(Arc::clone(&self.cluster), &self.config)
                .verify(&services)
                .await;
            self.report.ready_services = ready.resolved.keys().cloned().collect();
            if let Some(failure) = ready.failure {
                return Ok(self.fail(failure, &changed).await);
            }
        }

        self.transition(RolloutPhase::VerifyingEndpoints);
        if services.is_empty() {
            info!("SKIPPING: no services were configured");
        } else {
            info!("waiting for load balancer addresses");
            let endpoints = LoadBalancerResolver::new(Arc::clone(&self.cluster), &self.config)
                .resolve(&services)
                .await;
            self.report.endpoints = endpoints.resolved;
            if let Some(failure) = endpoints.failure {
                return Ok(self.fail(failure, &changed).await);
            }
        }

        self.transition(RolloutPhase::Success);
        info!(changed = changed.len(), "deployment successful");
        Ok(RolloutOutcome::Success {
            report: self.report,
        })
    }

    fn transition(&mut self, next: RolloutPhase) {
        debug!(from = %self.phase, to = %next, "phase transition");
        self.phase = next;
        self.report.phases.push(next);
    }

    async fn fail(mut self, failure: StageFailure, changed: &ChangedSet) -> RolloutOutcome {
        error!(stage = %failure.stage, failed = ?failure.names, "{failure}");
        self.transition(RolloutPhase::RollingBack);
        let rollback = RollbackCoordinator::new(Arc::clone(&self.cluster))
            .rollback(&failure, changed)
            .await;
        if !rollback.all_succeeded() {
            warn!(
                failed = rollback.failures().count(),
                "some deployments could not be rolled back"
            );
        }

        self.transition(RolloutPhase::Failed);
        RolloutOutcome::Failed {
            report: self.report,
            failure,
            rollback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollgate_cluster::fake::FakeCluster;

    fn manifest() -> ManifestSource {
        Box::new(std::io::Cursor::new(Vec::new()))
    }

    #[tokio::test]
    async fn new_orchestrator_starts_in_init() {
        let orchestrator = DeploymentOrchestrator::new(Arc::new(FakeCluster::new()), RolloutConfig::default());
        assert_eq!(orchestrator.phase(), RolloutPhase::Init);
    }

    #[tokio::test]
    async fn empty_apply_succeeds_with_skipped_service_stages() {
        let orchestrator = DeploymentOrchestrator::new(Arc::new(FakeCluster::new()), RolloutConfig::default());
        let outcome = orchestrator.run(manifest()).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(
            outcome.report().phases,
            [
                RolloutPhase::Init,
                RolloutPhase::Applying,
                RolloutPhase::Diffing,
                RolloutPhase::VerifyingReplicas,
                RolloutPhase::VerifyingServices,
                RolloutPhase::VerifyingEndpoints,
                RolloutPhase::Success,
            ]
        );
    }
}
