//! Replica convergence: wait until each changed deployment has as many
//! available replicas as it asks for.

use std::sync::Arc;

use rollgate_cluster::ClusterStateReader;
use rollgate_core::{ChangedSet, ItemError, RolloutConfig, Stage};
use tracing::{error, info};

use crate::fanout::{StageReport, fan_out};
use crate::poller::ConvergencePoller;

pub struct ReplicaConvergenceVerifier<R: ?Sized> {
    reader: Arc<R>,
    poller: ConvergencePoller,
}

impl<R> ReplicaConvergenceVerifier<R>
where
    R: ClusterStateReader + ?Sized + 'static,
{
    pub fn new(reader: Arc<R>, config: &RolloutConfig) -> Self {
        Self {
            reader,
            poller: ConvergencePoller::new(config.poll_interval, config.replica_wait_timeout),
        }
    }

    /// Poll every changed deployment concurrently. Resolved values are the
    /// available replica counts at convergence.
    pub async fn verify(&self, changed: &ChangedSet) -> StageReport<i32> {
        let names = changed.to_vec();
        let outcomes = fan_out(&names, |name| {
            let reader = Arc::clone(&self.reader);
            let poller = self.poller;
            async move {
                let converged = poller
                    .poll(|| {
                        let reader = Arc::clone(&reader);
                        let name = name.clone();
                        async move {
                            let deployment = reader.get_deployment(&name).await?;
                            Ok::<_, rollgate_cluster::ClusterError>(deployment.converged_replicas())
                        }
                    })
                    .await;

                match converged {
                    Ok(replicas) => {
                        info!(deployment = %name, replicas, "replicas updated ({replicas} replicas)");
                        Ok(replicas)
                    }
                    Err(e) => {
                        error!(deployment = %name, error = %e, "ERROR {e}");
                        Err(e.to_string())
                    }
                }
            }
        })
        .await;

        StageReport::collect(
            Stage::Replicas,
            "failed to verify replicas for",
            outcomes,
            |name, reason| ItemError::ReplicaConvergence { name, reason },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rollgate_cluster::fake::FakeCluster;
    use rollgate_core::Timeout;

    fn config(timeout_secs: u64) -> RolloutConfig {
        RolloutConfig {
            replica_wait_timeout: Timeout::Bounded(Duration::from_secs(timeout_secs)),
            ..Default::default()
        }
    }

    fn changed(names: &[&str]) -> ChangedSet {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn converges_on_rising_replica_count() {
        let cluster = Arc::new(
            FakeCluster::new()
                .deployment_after("a", 2, 3)
                .replica_sequence("a", [1, 2, 3]),
        );
        let verifier = ReplicaConvergenceVerifier::new(cluster.clone(), &config(120));

        let report = verifier.verify(&changed(&["a"])).await;
        assert!(report.is_success());
        assert_eq!(report.resolved["a"], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn one_timeout_fails_only_that_deployment() {
        let cluster = Arc::new(
            FakeCluster::new()
                .deployment_after("a", 2, 2)
                .deployment_after("b", 5, 4)
                .replica_sequence("b", [1])
                .deployment_after("c", 1, 1),
        );
        let verifier = ReplicaConvergenceVerifier::new(cluster, &config(10));

        let report = verifier.verify(&changed(&["a", "b", "c"])).await;
        let failure = report.failure.clone().expect("stage should fail");
        assert_eq!(failure.stage, Stage::Replicas);
        assert_eq!(failure.names.iter().collect::<Vec<_>>(), ["b"]);
        assert!(matches!(failure.errors[0], ItemError::ReplicaConvergence { .. }));

        // Successful siblings are still reported.
        assert_eq!(report.resolved.keys().collect::<Vec<_>>(), ["a", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn query_error_is_recorded_without_retry() {
        let cluster = Arc::new(
            FakeCluster::new()
                .deployment_after("a", 2, 1)
                .failing_deployment_query("a", "Unauthorized"),
        );
        let verifier = ReplicaConvergenceVerifier::new(cluster.clone(), &config(10));

        let report = verifier.verify(&changed(&["a"])).await;
        let failure = report.failure.expect("stage should fail");
        assert!(failure.errors[0].reason().contains("Unauthorized"));

        let queries = cluster
            .calls()
            .into_iter()
            .filter(|c| matches!(c, rollgate_cluster::fake::Call::GetDeployment(_)))
            .count();
        assert_eq!(queries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_timeout_from_env_still_converges() {
        let env = rollgate_core::config::ConfigOverrides::from_lookup(|key| {
            (key == "REPLICA_WAIT_TIMEOUT").then(|| "18446744073709551615".to_string())
        });
        let config = RolloutConfig::layered(&[env]).unwrap();
        let cluster = Arc::new(
            FakeCluster::new()
                .deployment_after("a", 2, 2)
                .replica_sequence("a", [1, 2]),
        );
        let verifier = ReplicaConvergenceVerifier::new(cluster.clone(), &config);

        let report = verifier.verify(&changed(&["a"])).await;
        assert!(report.is_success(), "{:?}", report.failure);
        assert_eq!(report.resolved["a"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_changed_set_is_trivially_converged() {
        let cluster = Arc::new(FakeCluster::new());
        let verifier = ReplicaConvergenceVerifier::new(cluster, &config(10));
        let report = verifier.verify(&ChangedSet::default()).await;
        assert!(report.is_success());
        assert!(report.resolved.is_empty());
    }
}
