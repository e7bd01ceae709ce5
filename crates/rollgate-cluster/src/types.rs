//! Kubernetes object shapes, reduced to the fields rollgate reads.
//!
//! Every field is optional on the wire; accessors apply the defaults the
//! API server itself uses (one desired replica, zero available).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A `kubectl get ... -o json` list response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectList<T> {
    #[serde(default)]
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

// ── Deployment ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: DeploymentSpec,
    #[serde(default)]
    pub status: DeploymentStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_replicas: Option<i32>,
}

impl Deployment {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Observed generation; a deployment the controller has not yet seen
    /// reports 0.
    pub fn observed_generation(&self) -> i64 {
        self.status.observed_generation.unwrap_or(0)
    }

    pub fn desired_replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(1)
    }

    pub fn available_replicas(&self) -> i32 {
        self.status.available_replicas.unwrap_or(0)
    }

    /// Available replica count once it meets the desired count.
    pub fn converged_replicas(&self) -> Option<i32> {
        let available = self.available_replicas();
        (available >= self.desired_replicas()).then_some(available)
    }
}

// ── Service ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceSpec,
    #[serde(default)]
    pub status: ServiceStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<BTreeMap<String, String>>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    #[serde(default)]
    pub load_balancer: LoadBalancerStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerStatus {
    #[serde(default)]
    pub ingress: Vec<LoadBalancerIngress>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerIngress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl Service {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Label selector expression conjoining every selector pair
    /// (`app=web,tier=frontend`), or `None` for a selector-less service.
    pub fn selector_expression(&self) -> Option<String> {
        let selector = self.spec.selector.as_ref().filter(|s| !s.is_empty())?;
        let pairs: Vec<String> = selector.iter().map(|(k, v)| format!("{k}={v}")).collect();
        Some(pairs.join(","))
    }

    /// First assigned load balancer address, preferring the IP of an
    /// entry over its hostname.
    pub fn ingress_address(&self) -> Option<&str> {
        self.status.load_balancer.ingress.iter().find_map(|entry| {
            entry
                .ip
                .as_deref()
                .filter(|ip| !ip.is_empty())
                .or_else(|| entry.hostname.as_deref().filter(|h| !h.is_empty()))
        })
    }
}

// ── Pod ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default)]
    pub conditions: Vec<PodCondition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
}

impl Pod {
    pub fn is_running(&self) -> bool {
        self.status.phase.as_deref() == Some("Running")
    }

    pub fn is_ready(&self) -> bool {
        self.status
            .conditions
            .iter()
            .any(|c| c.condition_type == "Ready" && c.status == "True")
    }

    pub fn is_running_and_ready(&self) -> bool {
        self.is_running() && self.is_ready()
    }
}
