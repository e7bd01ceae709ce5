//! Service readiness: wait until each service is backed by at least one
//! running, ready pod.

use std::sync::Arc;

use rollgate_cluster::{ClusterError, ClusterStateReader};
use rollgate_core::{ItemError, RolloutConfig, Stage};
use tracing::{debug, error, info};

use crate::fanout::{StageReport, fan_out};
use crate::poller::ConvergencePoller;

pub struct ServiceReadinessVerifier<R: ?Sized> {
    reader: Arc<R>,
    poller: ConvergencePoller,
}

impl<R> ServiceReadinessVerifier<R>
where
    R: ClusterStateReader + ?Sized + 'static,
{
    pub fn new(reader: Arc<R>, config: &RolloutConfig) -> Self {
        Self {
            reader,
            poller: ConvergencePoller::new(config.poll_interval, config.service_ready_timeout),
        }
    }

    /// Resolved values are the pod selector expression of each ready service.
    pub async fn verify(&self, services: &[String]) -> StageReport<String> {
        let outcomes = fan_out(services, |name| {
            let reader = Arc::clone(&self.reader);
            let poller = self.poller;
            async move {
                let result = wait_for_ready_pod(reader.as_ref(), poller, &name).await;
                match result {
                    Ok(selector) => {
                        info!(service = %name, %selector, "running & ready");
                        Ok(selector)
                    }
                    Err(reason) => {
                        error!(service = %name, error = %reason, "ERROR {reason}");
                        Err(reason)
                    }
                }
            }
        })
        .await;

        StageReport::collect(
            Stage::Services,
            "failed to verify services for",
            outcomes,
            |name, reason| ItemError::ServiceReadiness { name, reason },
        )
    }
}

async fn wait_for_ready_pod<R>(reader: &R, poller: ConvergencePoller, name: &str) -> Result<String, String>
where
    R: ClusterStateReader + ?Sized,
{
    let service = reader.get_service(name).await.map_err(|e| e.to_string())?;
    let selector = service
        .selector_expression()
        .ok_or_else(|| format!("service {name} has no pod selector"))?;
    debug!(service = %name, %selector, "resolved pod selector");

    poller
        .poll(|| {
            let selector = selector.clone();
            async move {
                let pods = reader.list_pods(&selector).await?;
                let ready = pods.iter().any(|p| p.is_running_and_ready());
                Ok::<_, ClusterError>(ready.then_some(()))
            }
        })
        .await
        .map_err(|e| e.to_string())?;

    Ok(selector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rollgate_cluster::fake::{FakeCluster, pod};
    use rollgate_core::Timeout;

    fn config() -> RolloutConfig {
        RolloutConfig {
            service_ready_timeout: Timeout::Bounded(Duration::from_secs(10)),
            ..Default::default()
        }
    }

    fn services(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn ready_once_a_pod_is_running_and_ready() {
        let cluster = Arc::new(
            FakeCluster::new()
                .service("web", &[("app", "web"), ("tier", "frontend")])
                .pod_sequence(
                    "app=web,tier=frontend",
                    [
                        vec![],
                        vec![pod("Pending", false)],
                        vec![pod("Running", false), pod("Running", true)],
                    ],
                ),
        );
        let verifier = ServiceReadinessVerifier::new(cluster.clone(), &config());

        let report = verifier.verify(&services(&["web"])).await;
        assert!(report.is_success());
        assert_eq!(report.resolved["web"], "app=web,tier=frontend");
    }

    #[tokio::test(start_paused = true)]
    async fn ready_condition_without_running_phase_times_out() {
        let cluster = Arc::new(
            FakeCluster::new()
                .service("web", &[("app", "web")])
                .pod_sequence("app=web", [vec![pod("Pending", true)]]),
        );
        let verifier = ServiceReadinessVerifier::new(cluster, &config());

        let report = verifier.verify(&services(&["web"])).await;
        let failure = report.failure.expect("stage should fail");
        assert_eq!(failure.stage, Stage::Services);
        assert!(failure.errors[0].reason().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_service_fails_only_that_service() {
        let cluster = Arc::new(
            FakeCluster::new()
                .service("api", &[("app", "api")])
                .pod_sequence("app=api", [vec![pod("Running", true)]]),
        );
        let verifier = ServiceReadinessVerifier::new(cluster, &config());

        let report = verifier.verify(&services(&["api", "ghost"])).await;
        let failure = report.failure.clone().expect("stage should fail");
        assert_eq!(failure.names.iter().collect::<Vec<_>>(), ["ghost"]);
        assert!(report.resolved.contains_key("api"));
    }

    #[tokio::test(start_paused = true)]
    async fn selectorless_service_is_not_ready() {
        let cluster = Arc::new(FakeCluster::new().service("external", &[]));
        let verifier = ServiceReadinessVerifier::new(cluster, &config());

        let report = verifier.verify(&services(&["external"])).await;
        let failure = report.failure.expect("stage should fail");
        assert!(failure.errors[0].reason().contains("no pod selector"));
    }
}
