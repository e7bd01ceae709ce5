//! Load balancer resolution: wait until each service has an external
//! ingress address.

use std::sync::Arc;

use rollgate_cluster::{ClusterError, ClusterStateReader};
use rollgate_core::{ItemError, RolloutConfig, Stage};
use tracing::{error, info};

use crate::fanout::{StageReport, fan_out};
use crate::poller::ConvergencePoller;

pub struct LoadBalancerResolver<R: ?Sized> {
    reader: Arc<R>,
    poller: ConvergencePoller,
}

impl<R> LoadBalancerResolver<R>
where
    R: ClusterStateReader + ?Sized + 'static,
{
    pub fn new(reader: Arc<R>, config: &RolloutConfig) -> Self {
        Self {
            reader,
            poller: ConvergencePoller::new(config.poll_interval, config.service_ready_timeout),
        }
    }

    /// Resolved values are the assigned addresses, for reporting only.
    pub async fn resolve(&self, services: &[String]) -> StageReport<String> {
        let outcomes = fan_out(services, |name| {
            let reader = Arc::clone(&self.reader);
            let poller = self.poller;
            async move {
                let address = poller
                    .poll(|| {
                        let reader = Arc::clone(&reader);
                        let name = name.clone();
                        async move {
                            let service = reader.get_service(&name).await?;
                            Ok::<_, ClusterError>(service.ingress_address().map(str::to_string))
                        }
                    })
                    .await;

                match address {
                    Ok(address) => {
                        info!(service = %name, %address, "at {address}");
                        Ok(address)
                    }
                    Err(e) => {
                        error!(service = %name, error = %e, "ERROR {e}");
                        Err(e.to_string())
                    }
                }
            }
        })
        .await;

        StageReport::collect(
            Stage::Endpoints,
            "failed to get endpoints for",
            outcomes,
            |name, reason| ItemError::LoadBalancerTimeout { name, reason },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rollgate_cluster::fake::FakeCluster;
    use rollgate_core::Timeout;

    fn config() -> RolloutConfig {
        RolloutConfig {
            service_ready_timeout: Timeout::Bounded(Duration::from_secs(5)),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_once_ingress_is_assigned() {
        let cluster = Arc::new(
            FakeCluster::new()
                .service("web", &[("app", "web")])
                .ingress_sequence("web", [None, None, Some("203.0.113.7")]),
        );
        let resolver = LoadBalancerResolver::new(cluster, &config());

        let report = resolver.resolve(&["web".to_string()]).await;
        assert_eq!(report.into_result().unwrap()["web"], "203.0.113.7");
    }

    #[tokio::test(start_paused = true)]
    async fn unassigned_ingress_times_out_per_service() {
        let cluster = Arc::new(
            FakeCluster::new()
                .service("web", &[("app", "web")])
                .ingress_sequence("web", [Some("203.0.113.7")])
                .service("internal", &[("app", "internal")]),
        );
        let resolver = LoadBalancerResolver::new(cluster, &config());

        let report = resolver
            .resolve(&["web".to_string(), "internal".to_string()])
            .await;
        let failure = report.failure.clone().expect("stage should fail");
        assert_eq!(failure.stage, Stage::Endpoints);
        assert_eq!(failure.names.iter().collect::<Vec<_>>(), ["internal"]);
        assert!(matches!(failure.errors[0], ItemError::LoadBalancerTimeout { .. }));
        assert_eq!(report.resolved["web"], "203.0.113.7");
    }
}
