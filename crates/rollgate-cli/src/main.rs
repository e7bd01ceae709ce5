//! rollgate: apply Kubernetes manifests and gate the rollout.
//!
//! Reads manifests from stdin, applies them, verifies that the changed
//! deployments and their services come up, and rolls back what this run
//! changed if they don't.
//!
//! # Usage
//!
//! ```text
//! cat k8s/*.yaml | rollgate --namespace staging --replica-wait-timeout 5m
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use rollgate_core::config::ConfigOverrides;
use rollgate_core::{ConfigError, RolloutConfig};
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;

/// Exit code for a run that ended in `Failed` after rollback.
const EXIT_FAILED: u8 = 1;
/// Exit code for a pipeline error that left nothing to roll back.
const EXIT_FATAL: u8 = 2;
/// Exit code for invalid arguments or configuration.
const EXIT_CONFIG: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "rollgate",
    about = "Apply Kubernetes manifests from stdin, verify the rollout, roll back on failure",
    version
)]
struct Cli {
    /// Namespace for every kubectl call (env: KUBE_NAMESPACE).
    #[arg(short, long)]
    namespace: Option<String>,

    /// TOML file with a [rollout] table.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Per-deployment rollout status timeout, e.g. 120, 30s, 2m; 0 waits
    /// forever (env: DEPLOY_WAIT_TIMEOUT).
    #[arg(long)]
    deploy_wait_timeout: Option<String>,

    /// Replica convergence timeout per deployment (env: REPLICA_WAIT_TIMEOUT).
    #[arg(long)]
    replica_wait_timeout: Option<String>,

    /// Pod readiness and load balancer timeout per service
    /// (env: SERVICE_READY_TIMEOUT).
    #[arg(long)]
    service_ready_timeout: Option<String>,

    /// Delay between convergence checks (env: ROLLGATE_POLL_INTERVAL).
    #[arg(long)]
    poll_interval: Option<String>,

    /// kubectl binary to run (env: ROLLGATE_KUBECTL).
    #[arg(long)]
    kubectl: Option<String>,

    /// Format of the final report on stdout.
    #[arg(long, value_enum, default_value = "text")]
    output: OutputFormat,

    /// Format of log lines on stderr.
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Log rollgate internals at debug level.
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            namespace: self.namespace.clone(),
            deploy_wait_timeout: self.deploy_wait_timeout.clone(),
            replica_wait_timeout: self.replica_wait_timeout.clone(),
            service_ready_timeout: self.service_ready_timeout.clone(),
            poll_interval: self.poll_interval.clone(),
            kubectl: self.kubectl.clone(),
        }
    }
}

/// Defaults, then the config file, then the environment, then flags.
fn resolve_config(cli: &Cli, env: ConfigOverrides) -> Result<RolloutConfig, ConfigError> {
    let mut layers = Vec::with_capacity(3);
    if let Some(path) = &cli.config {
        layers.push(ConfigOverrides::from_file(path)?);
    }
    layers.push(env);
    layers.push(cli.overrides());
    RolloutConfig::layered(&layers)
}

fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "info,rollgate=debug"
    } else {
        "info,rollgate=info"
    }
}

fn init_tracing(format: LogFormat, verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            e.print()?;
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
        Err(e) => e.exit(),
    };

    init_tracing(cli.log_format, cli.verbose);

    let config = match resolve_config(&cli, ConfigOverrides::from_env()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };

    commands::deploy::run(config, cli.output).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    use rollgate_core::Timeout;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("rollgate").chain(args.iter().copied())).unwrap()
    }

    fn env(pairs: &[(&str, &str)]) -> ConfigOverrides {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ConfigOverrides::from_lookup(|key| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        })
    }

    #[test]
    fn defaults_without_flags() {
        let cli = parse(&[]);
        assert_eq!(cli.output, OutputFormat::Text);
        assert_eq!(cli.log_format, LogFormat::Text);
        assert!(!cli.verbose);

        let config = resolve_config(&cli, ConfigOverrides::default()).unwrap();
        assert_eq!(config, RolloutConfig::default());
    }

    #[test]
    fn parses_every_flag() {
        let cli = parse(&[
            "-n",
            "staging",
            "--deploy-wait-timeout",
            "2m",
            "--replica-wait-timeout",
            "0",
            "--service-ready-timeout",
            "45",
            "--poll-interval",
            "250ms",
            "--kubectl",
            "/opt/bin/kubectl",
            "--output",
            "json",
            "--log-format",
            "json",
            "-v",
        ]);
        assert_eq!(cli.output, OutputFormat::Json);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(cli.verbose);

        let config = resolve_config(&cli, ConfigOverrides::default()).unwrap();
        assert_eq!(config.namespace.as_deref(), Some("staging"));
        assert_eq!(config.deploy_wait_timeout, Timeout::Bounded(Duration::from_secs(120)));
        assert_eq!(config.replica_wait_timeout, Timeout::Unbounded);
        assert_eq!(config.service_ready_timeout, Timeout::Bounded(Duration::from_secs(45)));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.kubectl, PathBuf::from("/opt/bin/kubectl"));
    }

    #[test]
    fn rejects_unknown_output_format() {
        let err = Cli::try_parse_from(["rollgate", "--output", "yaml"]).unwrap_err();
        assert!(err.use_stderr());
    }

    #[test]
    fn flags_override_env_which_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[rollout]\nnamespace = \"from-file\"\ndeploy_wait_timeout = \"10\"\npoll_interval = \"2s\""
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = parse(&["--config", &path, "--deploy-wait-timeout", "30"]);
        let env = env(&[("KUBE_NAMESPACE", "from-env"), ("DEPLOY_WAIT_TIMEOUT", "20")]);
        let config = resolve_config(&cli, env).unwrap();

        assert_eq!(config.namespace.as_deref(), Some("from-env"));
        assert_eq!(config.deploy_wait_timeout, Timeout::Bounded(Duration::from_secs(30)));
        assert_eq!(config.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn invalid_env_value_names_the_key() {
        let cli = parse(&[]);
        let err = resolve_config(&cli, env(&[("SERVICE_READY_TIMEOUT", "soon")])).unwrap_err();
        assert!(err.to_string().contains("service_ready_timeout"), "{err}");
    }

    #[test]
    fn missing_config_file_is_a_config_error() {
        let cli = parse(&["--config", "/nonexistent/rollgate.toml"]);
        let err = resolve_config(&cli, ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn verbose_raises_rollgate_level() {
        assert_eq!(default_filter(false), "info,rollgate=info");
        assert_eq!(default_filter(true), "info,rollgate=debug");
    }
}
