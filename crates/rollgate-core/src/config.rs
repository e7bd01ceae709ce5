//! Rollout configuration and its layering.
//!
//! A [`RolloutConfig`] is built once at start-up from, in increasing
//! precedence: built-in defaults, an optional `rollgate.toml`, environment
//! variables, and command-line flags. Each source is expressed as a
//! [`ConfigOverrides`] layer of raw strings; values are validated only when
//! a layer is applied.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

pub const ENV_NAMESPACE: &str = "KUBE_NAMESPACE";
pub const ENV_DEPLOY_WAIT_TIMEOUT: &str = "DEPLOY_WAIT_TIMEOUT";
pub const ENV_REPLICA_WAIT_TIMEOUT: &str = "REPLICA_WAIT_TIMEOUT";
pub const ENV_SERVICE_READY_TIMEOUT: &str = "SERVICE_READY_TIMEOUT";
pub const ENV_POLL_INTERVAL: &str = "ROLLGATE_POLL_INTERVAL";
pub const ENV_KUBECTL: &str = "ROLLGATE_KUBECTL";

const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Deadline for a single wait. Zero in any config source means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeout {
    Bounded(Duration),
    /// Wait forever.
    Unbounded,
}

impl Timeout {
    /// Zero means unbounded.
    pub fn from_duration(duration: Duration) -> Self {
        if duration.is_zero() {
            Timeout::Unbounded
        } else {
            Timeout::Bounded(duration)
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Timeout::Bounded(d) => Some(*d),
            Timeout::Unbounded => None,
        }
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeout::Bounded(d) => write!(f, "{}ms", d.as_millis()),
            Timeout::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// Immutable settings handed to every pipeline component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutConfig {
    /// Namespace applied to every cluster operation; `None` uses the
    /// kubeconfig default.
    pub namespace: Option<String>,
    /// Bounds each per-deployment `rollout status` watch.
    pub deploy_wait_timeout: Timeout,
    /// Bounds replica convergence polling per deployment.
    pub replica_wait_timeout: Timeout,
    /// Bounds both pod readiness and endpoint resolution per service.
    pub service_ready_timeout: Timeout,
    /// Delay between successive convergence checks.
    pub poll_interval: Duration,
    /// Path or name of the kubectl binary.
    pub kubectl: PathBuf,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            deploy_wait_timeout: Timeout::Bounded(DEFAULT_STAGE_TIMEOUT),
            replica_wait_timeout: Timeout::Bounded(DEFAULT_STAGE_TIMEOUT),
            service_ready_timeout: Timeout::Bounded(DEFAULT_STAGE_TIMEOUT),
            poll_interval: DEFAULT_POLL_INTERVAL,
            kubectl: PathBuf::from("kubectl"),
        }
    }
}

impl RolloutConfig {
    /// Build a config by applying `layers` over the defaults, in order.
    pub fn layered(layers: &[ConfigOverrides]) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for layer in layers {
            config.apply(layer)?;
        }
        debug!(?config, "rollout config resolved");
        Ok(config)
    }

    /// Apply one override layer on top of the current values.
    pub fn apply(&mut self, layer: &ConfigOverrides) -> Result<(), ConfigError> {
        if let Some(ns) = non_empty(&layer.namespace) {
            self.namespace = Some(ns.to_string());
        }
        if let Some(raw) = non_empty(&layer.deploy_wait_timeout) {
            self.deploy_wait_timeout = parse_timeout("deploy_wait_timeout", raw)?;
        }
        if let Some(raw) = non_empty(&layer.replica_wait_timeout) {
            self.replica_wait_timeout = parse_timeout("replica_wait_timeout", raw)?;
        }
        if let Some(raw) = non_empty(&layer.service_ready_timeout) {
            self.service_ready_timeout = parse_timeout("service_ready_timeout", raw)?;
        }
        if let Some(raw) = non_empty(&layer.poll_interval) {
            let interval = parse_duration(raw).ok_or_else(|| ConfigError::InvalidDuration {
                key: "poll_interval".to_string(),
                value: raw.to_string(),
            })?;
            if interval.is_zero() {
                return Err(ConfigError::ZeroPollInterval);
            }
            self.poll_interval = interval;
        }
        if let Some(kubectl) = non_empty(&layer.kubectl) {
            self.kubectl = PathBuf::from(kubectl);
        }
        Ok(())
    }
}

/// One configuration source. Every field is optional and unvalidated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    pub namespace: Option<String>,
    pub deploy_wait_timeout: Option<String>,
    pub replica_wait_timeout: Option<String>,
    pub service_ready_timeout: Option<String>,
    pub poll_interval: Option<String>,
    pub kubectl: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    rollout: Option<ConfigOverrides>,
}

impl ConfigOverrides {
    /// Read the `[rollout]` table of a `rollgate.toml`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        let file: ConfigFile = toml::from_str(content)?;
        Ok(file.rollout.unwrap_or_default())
    }

    /// Collect the layer defined by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            namespace: lookup(ENV_NAMESPACE),
            deploy_wait_timeout: lookup(ENV_DEPLOY_WAIT_TIMEOUT),
            replica_wait_timeout: lookup(ENV_REPLICA_WAIT_TIMEOUT),
            service_ready_timeout: lookup(ENV_SERVICE_READY_TIMEOUT),
            poll_interval: lookup(ENV_POLL_INTERVAL),
            kubectl: lookup(ENV_KUBECTL),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_timeout(key: &str, raw: &str) -> Result<Timeout, ConfigError> {
    parse_duration(raw)
        .map(Timeout::from_duration)
        .ok_or_else(|| ConfigError::InvalidDuration {
            key: key.to_string(),
            value: raw.to_string(),
        })
}

/// Parse a duration string like "120", "30s", "500ms", "2m".
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> ConfigOverrides {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ConfigOverrides::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = RolloutConfig::default();
        assert_eq!(config.namespace, None);
        assert_eq!(config.deploy_wait_timeout, Timeout::Bounded(Duration::from_secs(120)));
        assert_eq!(config.replica_wait_timeout, Timeout::Bounded(Duration::from_secs(120)));
        assert_eq!(config.service_ready_timeout, Timeout::Bounded(Duration::from_secs(120)));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.kubectl, PathBuf::from("kubectl"));
    }

    #[test]
    fn env_layer_reads_plain_seconds() {
        let layer = env(&[
            (ENV_DEPLOY_WAIT_TIMEOUT, "30"),
            (ENV_REPLICA_WAIT_TIMEOUT, "45s"),
            (ENV_NAMESPACE, "staging"),
        ]);
        let config = RolloutConfig::layered(&[layer]).unwrap();
        assert_eq!(config.deploy_wait_timeout, Timeout::Bounded(Duration::from_secs(30)));
        assert_eq!(config.replica_wait_timeout, Timeout::Bounded(Duration::from_secs(45)));
        assert_eq!(config.service_ready_timeout, Timeout::Bounded(Duration::from_secs(120)));
        assert_eq!(config.namespace.as_deref(), Some("staging"));
    }

    #[test]
    fn zero_timeout_is_unbounded() {
        let layer = env(&[(ENV_SERVICE_READY_TIMEOUT, "0")]);
        let config = RolloutConfig::layered(&[layer]).unwrap();
        assert_eq!(config.service_ready_timeout, Timeout::Unbounded);
        assert_eq!(config.service_ready_timeout.as_duration(), None);
    }

    #[test]
    fn empty_values_are_ignored() {
        let layer = env(&[(ENV_NAMESPACE, ""), (ENV_DEPLOY_WAIT_TIMEOUT, "  ")]);
        let config = RolloutConfig::layered(&[layer]).unwrap();
        assert_eq!(config, RolloutConfig::default());
    }

    #[test]
    fn later_layers_win() {
        let file = ConfigOverrides::from_toml_str(
            r#"
[rollout]
namespace = "from-file"
replica_wait_timeout = "10s"
"#,
        )
        .unwrap();
        let environment = env(&[(ENV_NAMESPACE, "from-env")]);
        let flags = ConfigOverrides {
            replica_wait_timeout: Some("5s".to_string()),
            ..Default::default()
        };

        let config = RolloutConfig::layered(&[file, environment, flags]).unwrap();
        assert_eq!(config.namespace.as_deref(), Some("from-env"));
        assert_eq!(config.replica_wait_timeout, Timeout::Bounded(Duration::from_secs(5)));
    }

    #[test]
    fn invalid_duration_names_the_key() {
        let layer = env(&[(ENV_REPLICA_WAIT_TIMEOUT, "soon")]);
        let err = RolloutConfig::layered(&[layer]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("replica_wait_timeout"), "{msg}");
        assert!(msg.contains("soon"), "{msg}");
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let layer = env(&[(ENV_POLL_INTERVAL, "0")]);
        assert!(matches!(
            RolloutConfig::layered(&[layer]),
            Err(ConfigError::ZeroPollInterval)
        ));
    }

    #[test]
    fn config_file_round_trip_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollgate.toml");
        std::fs::write(
            &path,
            "[rollout]\nkubectl = \"/usr/local/bin/kubectl\"\npoll_interval = \"250ms\"\n",
        )
        .unwrap();

        let layer = ConfigOverrides::from_file(&path).unwrap();
        let config = RolloutConfig::layered(&[layer]).unwrap();
        assert_eq!(config.kubectl, PathBuf::from("/usr/local/bin/kubectl"));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn config_file_rejects_unknown_keys() {
        let result = ConfigOverrides::from_toml_str("[rollout]\nreplicas = 3\n");
        assert!(result.is_err());
    }

    #[test]
    fn missing_config_file_is_a_read_error() {
        let err = ConfigOverrides::from_file(Path::new("/nonexistent/rollgate.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn parse_duration_forms() {
        assert_eq!(parse_duration("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("-5"), None);
    }
}
