//! Scripted in-memory cluster (testing only).
//!
//! `FakeCluster` satisfies both cluster traits from a script assembled with
//! builder methods, and records every call so tests can assert on ordering
//! and on which deployments were rolled back.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rollgate_core::Timeout;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::client::{ClusterMutator, ClusterStateReader, ManifestSource};
use crate::error::{ClusterError, ClusterResult};
use crate::types::*;

/// A cluster call, as recorded by [`FakeCluster`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListDeployments,
    GetDeployment(String),
    GetService(String),
    ListPods(String),
    ApplyStarted,
    ApplyFinished,
    RolloutStatus(String),
    RolloutUndo(String),
}

#[derive(Debug, Clone)]
enum WatchScript {
    Fail(String),
    Hang,
}

#[derive(Debug, Default)]
struct FakeState {
    applied: bool,
    before: BTreeMap<String, Deployment>,
    after: BTreeMap<String, Deployment>,
    replica_script: HashMap<String, VecDeque<i32>>,
    failing_queries: HashMap<String, String>,
    services: HashMap<String, Service>,
    ingress_script: HashMap<String, VecDeque<Option<String>>>,
    pod_script: HashMap<String, VecDeque<Vec<Pod>>>,
    apply_lines: Vec<String>,
    apply_line_delay: Option<Duration>,
    apply_exit_code: Option<i32>,
    watches: HashMap<String, WatchScript>,
    undo_failures: HashMap<String, String>,
    manifest: Option<String>,
    calls: Vec<Call>,
}

/// Pop the next scripted value, repeating the last one once exhausted.
fn next_scripted<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

fn failed(command: String, stderr: &str) -> ClusterError {
    ClusterError::CommandFailed {
        command,
        code: Some(1),
        stderr: stderr.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn with(self, f: impl FnOnce(&mut FakeState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    // ── Script builders ─────────────────────────────────────────

    /// A deployment as it exists before apply.
    pub fn deployment_before(self, name: &str, generation: i64) -> Self {
        self.with(|s| {
            s.before
                .insert(name.to_string(), deployment(name, generation, 1, 1));
        })
    }

    /// A deployment as it exists after apply, fully available unless a
    /// replica sequence is scripted.
    pub fn deployment_after(self, name: &str, generation: i64, desired: i32) -> Self {
        self.with(|s| {
            s.after
                .insert(name.to_string(), deployment(name, generation, desired, desired));
        })
    }

    /// Successive `availableReplicas` values returned by `get_deployment`.
    pub fn replica_sequence(self, name: &str, available: impl IntoIterator<Item = i32>) -> Self {
        self.with(|s| {
            s.replica_script
                .insert(name.to_string(), available.into_iter().collect());
        })
    }

    /// Make `get_deployment(name)` fail with a query error.
    pub fn failing_deployment_query(self, name: &str, stderr: &str) -> Self {
        self.with(|s| {
            s.failing_queries.insert(name.to_string(), stderr.to_string());
        })
    }

    pub fn service(self, name: &str, selector: &[(&str, &str)]) -> Self {
        let selector: BTreeMap<String, String> = selector
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.with(|s| {
            s.services.insert(
                name.to_string(),
                Service {
                    metadata: ObjectMeta {
                        name: name.to_string(),
                        ..Default::default()
                    },
                    spec: ServiceSpec {
                        selector: Some(selector),
                        service_type: Some("LoadBalancer".to_string()),
                    },
                    status: ServiceStatus::default(),
                },
            );
        })
    }

    /// Successive ingress addresses reported by `get_service`.
    pub fn ingress_sequence<'a>(
        self,
        name: &str,
        addresses: impl IntoIterator<Item = Option<&'a str>>,
    ) -> Self {
        let queue = addresses
            .into_iter()
            .map(|a| a.map(str::to_string))
            .collect();
        self.with(|s| {
            s.ingress_script.insert(name.to_string(), queue);
        })
    }

    /// Successive pod listings returned for a selector expression.
    pub fn pod_sequence(self, selector: &str, listings: impl IntoIterator<Item = Vec<Pod>>) -> Self {
        self.with(|s| {
            s.pod_script
                .insert(selector.to_string(), listings.into_iter().collect());
        })
    }

    /// Lines the apply emits on stdout.
    pub fn apply_output<'a>(self, lines: impl IntoIterator<Item = &'a str>) -> Self {
        self.with(|s| {
            s.apply_lines = lines.into_iter().map(str::to_string).collect();
        })
    }

    /// Pause between emitted apply lines.
    pub fn apply_line_delay(self, delay: Duration) -> Self {
        self.with(|s| s.apply_line_delay = Some(delay))
    }

    pub fn apply_exit_code(self, code: i32) -> Self {
        self.with(|s| s.apply_exit_code = Some(code))
    }

    pub fn rollout_status_fails(self, name: &str, stderr: &str) -> Self {
        self.with(|s| {
            s.watches
                .insert(name.to_string(), WatchScript::Fail(stderr.to_string()));
        })
    }

    /// The watch never completes on its own; only its timeout ends it.
    pub fn rollout_status_hangs(self, name: &str) -> Self {
        self.with(|s| {
            s.watches.insert(name.to_string(), WatchScript::Hang);
        })
    }

    pub fn undo_fails(self, name: &str, stderr: &str) -> Self {
        self.with(|s| {
            s.undo_failures.insert(name.to_string(), stderr.to_string());
        })
    }

    // ── Inspection ──────────────────────────────────────────────

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Deployments passed to `rollout_undo`, in call order.
    pub fn undone(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::RolloutUndo(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn applied_manifest(&self) -> Option<String> {
        self.state.lock().unwrap().manifest.clone()
    }
}

/// A deployment object with the given generation and replica counts.
pub fn deployment(name: &str, generation: i64, desired: i32, available: i32) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: name.to_string(),
            ..Default::default()
        },
        spec: DeploymentSpec {
            replicas: Some(desired),
        },
        status: DeploymentStatus {
            observed_generation: Some(generation),
            available_replicas: Some(available),
            ..Default::default()
        },
    }
}

/// A pod with the given phase and Ready condition.
pub fn pod(phase: &str, ready: bool) -> Pod {
    Pod {
        metadata: ObjectMeta::default(),
        status: PodStatus {
            phase: Some(phase.to_string()),
            conditions: vec![PodCondition {
                condition_type: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
            }],
        },
    }
}

#[async_trait]
impl ClusterStateReader for FakeCluster {
    async fn list_deployments(&self) -> ClusterResult<Vec<Deployment>> {
        self.record(Call::ListDeployments);
        let state = self.state.lock().unwrap();
        let source = if state.applied { &state.after } else { &state.before };
        Ok(source.values().cloned().collect())
    }

    async fn get_deployment(&self, name: &str) -> ClusterResult<Deployment> {
        self.record(Call::GetDeployment(name.to_string()));
        let mut state = self.state.lock().unwrap();
        if let Some(stderr) = state.failing_queries.get(name) {
            return Err(failed(format!("kubectl get deployment {name}"), stderr));
        }
        let mut current = state
            .after
            .get(name)
            .cloned()
            .ok_or_else(|| failed(format!("kubectl get deployment {name}"), "NotFound"))?;
        if let Some(available) = state.replica_script.get_mut(name).and_then(next_scripted) {
            current.status.available_replicas = Some(available);
        }
        Ok(current)
    }

    async fn get_service(&self, name: &str) -> ClusterResult<Service> {
        self.record(Call::GetService(name.to_string()));
        let mut state = self.state.lock().unwrap();
        let mut service = state
            .services
            .get(name)
            .cloned()
            .ok_or_else(|| failed(format!("kubectl get service {name}"), "NotFound"))?;
        if let Some(Some(address)) = state.ingress_script.get_mut(name).and_then(next_scripted) {
            service.status.load_balancer.ingress.push(LoadBalancerIngress {
                ip: Some(address),
                hostname: None,
            });
        }
        Ok(service)
    }

    async fn list_pods(&self, selector: &str) -> ClusterResult<Vec<Pod>> {
        self.record(Call::ListPods(selector.to_string()));
        let mut state = self.state.lock().unwrap();
        Ok(state
            .pod_script
            .get_mut(selector)
            .and_then(next_scripted)
            .unwrap_or_default())
    }
}

#[async_trait]
impl ClusterMutator for FakeCluster {
    async fn apply(&self, mut manifest: ManifestSource, lines: mpsc::Sender<String>) -> ClusterResult<()> {
        self.record(Call::ApplyStarted);
        let mut text = String::new();
        manifest.read_to_string(&mut text).await?;

        let (output, delay, exit_code) = {
            let mut state = self.state.lock().unwrap();
            state.manifest = Some(text);
            state.applied = true;
            (
                state.apply_lines.clone(),
                state.apply_line_delay,
                state.apply_exit_code,
            )
        };

        for line in output {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let _ = lines.send(line).await;
        }
        self.record(Call::ApplyFinished);

        match exit_code {
            Some(code) if code != 0 => Err(ClusterError::CommandFailed {
                command: "kubectl apply -o name -f -".to_string(),
                code: Some(code),
                stderr: "error validating data".to_string(),
            }),
            _ => Ok(()),
        }
    }

    async fn rollout_status(&self, deployment: &str, timeout: Timeout) -> ClusterResult<()> {
        self.record(Call::RolloutStatus(deployment.to_string()));
        let script = self.state.lock().unwrap().watches.get(deployment).cloned();
        let command = format!("kubectl rollout status deployment {deployment}");
        match script {
            None => Ok(()),
            Some(WatchScript::Fail(stderr)) => Err(failed(command, &stderr)),
            Some(WatchScript::Hang) => match timeout.as_duration() {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    Err(ClusterError::TimedOut {
                        command,
                        timeout: limit,
                    })
                }
                None => std::future::pending().await,
            },
        }
    }

    async fn rollout_undo(&self, deployment: &str) -> ClusterResult<String> {
        self.record(Call::RolloutUndo(deployment.to_string()));
        let failure = self.state.lock().unwrap().undo_failures.get(deployment).cloned();
        match failure {
            Some(stderr) => Err(failed(
                format!("kubectl rollout undo deployment {deployment}"),
                &stderr,
            )),
            None => Ok(format!("deployment.apps/{deployment} rolled back")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_switches_to_post_apply_state() {
        let cluster = FakeCluster::new()
            .deployment_before("a", 1)
            .deployment_after("a", 2, 3);

        let before = cluster.list_deployments().await.unwrap();
        assert_eq!(before[0].observed_generation(), 1);

        let (tx, _rx) = mpsc::channel(1);
        cluster
            .apply(Box::new(std::io::Cursor::new(Vec::new())), tx)
            .await
            .unwrap();

        let after = cluster.list_deployments().await.unwrap();
        assert_eq!(after[0].observed_generation(), 2);
    }

    #[tokio::test]
    async fn replica_sequence_repeats_last_value() {
        let cluster = FakeCluster::new()
            .deployment_after("a", 2, 3)
            .replica_sequence("a", [1, 2]);

        let seen: Vec<i32> = [
            cluster.get_deployment("a").await.unwrap(),
            cluster.get_deployment("a").await.unwrap(),
            cluster.get_deployment("a").await.unwrap(),
        ]
        .iter()
        .map(Deployment::available_replicas)
        .collect();
        assert_eq!(seen, [1, 2, 2]);
    }

    #[tokio::test]
    async fn undo_records_calls_and_scripted_failures() {
        let cluster = FakeCluster::new().undo_fails("b", "no rollout history found");
        assert!(cluster.rollout_undo("a").await.is_ok());
        assert!(cluster.rollout_undo("b").await.is_err());
        assert_eq!(cluster.undone(), ["a", "b"]);
    }
}
