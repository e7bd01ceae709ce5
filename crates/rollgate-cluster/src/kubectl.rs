//! `kubectl` driver.
//!
//! Every operation shells out to the configured kubectl binary with the
//! namespace selector prepended. Queries add `-o json` and decode the
//! output; writes return raw output or stream it line by line.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use rollgate_core::{RolloutConfig, Timeout};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::client::{ClusterMutator, ClusterStateReader, ManifestSource};
use crate::error::{ClusterError, ClusterResult};
use crate::types::{Deployment, ObjectList, Pod, Service};

/// Cluster client backed by the `kubectl` command-line tool.
#[derive(Debug, Clone)]
pub struct Kubectl {
    binary: PathBuf,
    namespace: Option<String>,
}

impl Kubectl {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            namespace: None,
        }
    }

    /// `None` targets the current context's namespace.
    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    /// Binary and namespace taken from a resolved config.
    pub fn from_config(config: &RolloutConfig) -> Self {
        Self::new(&config.kubectl).with_namespace(config.namespace.clone())
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Full argument vector for an invocation, namespace first.
    pub fn args_for(&self, args: &[&str]) -> Vec<String> {
        let mut full = Vec::with_capacity(args.len() + 1);
        if let Some(ns) = &self.namespace {
            full.push(format!("--namespace={ns}"));
        }
        full.extend(args.iter().map(|a| a.to_string()));
        full
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.args_for(args)).kill_on_drop(true);
        cmd
    }

    fn render(&self, args: &[&str]) -> String {
        let mut parts = vec![self.binary.display().to_string()];
        parts.extend(self.args_for(args));
        parts.join(" ")
    }

    fn spawn_error(&self, source: std::io::Error) -> ClusterError {
        ClusterError::Spawn {
            program: self.binary.display().to_string(),
            source,
        }
    }

    /// Run to completion and return stdout, failing on non-zero exit.
    async fn run(&self, args: &[&str]) -> ClusterResult<String> {
        let mut cmd = self.command(args);
        cmd.stdin(Stdio::null());
        debug!(command = %self.render(args), "running kubectl");

        let output = cmd.output().await.map_err(|e| self.spawn_error(e))?;
        if !output.status.success() {
            return Err(ClusterError::CommandFailed {
                command: self.render(args),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn get_json<T: DeserializeOwned>(&self, args: &[&str]) -> ClusterResult<T> {
        let mut full: Vec<&str> = args.to_vec();
        full.extend(["-o", "json"]);
        let stdout = self.run(&full).await?;
        serde_json::from_str(&stdout).map_err(|source| ClusterError::Decode {
            command: self.render(&full),
            source,
        })
    }
}

#[async_trait]
impl ClusterStateReader for Kubectl {
    async fn list_deployments(&self) -> ClusterResult<Vec<Deployment>> {
        let list: ObjectList<Deployment> = self.get_json(&["get", "deployments"]).await?;
        Ok(list.items)
    }

    async fn get_deployment(&self, name: &str) -> ClusterResult<Deployment> {
        self.get_json(&["get", "deployment", name]).await
    }

    async fn get_service(&self, name: &str) -> ClusterResult<Service> {
        self.get_json(&["get", "service", name]).await
    }

    async fn list_pods(&self, selector: &str) -> ClusterResult<Vec<Pod>> {
        let list: ObjectList<Pod> = self.get_json(&["get", "pods", "-l", selector]).await?;
        Ok(list.items)
    }
}

#[async_trait]
impl ClusterMutator for Kubectl {
    async fn apply(&self, mut manifest: ManifestSource, lines: mpsc::Sender<String>) -> ClusterResult<()> {
        let args = ["apply", "-o", "name", "-f", "-"];
        let mut cmd = self.command(&args);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!(command = %self.render(&args), "spawning kubectl apply");

        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;
        let (Some(mut stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(ClusterError::Io(std::io::Error::other(
                "kubectl apply stdio was not captured",
            )));
        };

        let feed = async move {
            let copied = tokio::io::copy(&mut manifest, &mut stdin).await;
            // Closing stdin signals end of manifest.
            drop(stdin);
            copied
        };

        let forward_stdout = async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Some(line) = reader.next_line().await? {
                if lines.send(line).await.is_err() {
                    debug!("apply line receiver dropped; draining output");
                }
            }
            Ok::<_, std::io::Error>(())
        };

        let collect_stderr = async move {
            let mut reader = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Some(line) = reader.next_line().await? {
                warn!(target: "kubectl", "[KUBECTL] ERR: {line}");
                collected.push(line);
            }
            Ok::<_, std::io::Error>(collected.join("\n"))
        };

        let (fed, streamed, stderr_text) = tokio::join!(feed, forward_stdout, collect_stderr);
        let status = child.wait().await?;

        if !status.success() {
            return Err(ClusterError::CommandFailed {
                command: self.render(&args),
                code: status.code(),
                stderr: stderr_text.unwrap_or_default(),
            });
        }
        fed?;
        streamed?;
        Ok(())
    }

    async fn rollout_status(&self, deployment: &str, timeout: Timeout) -> ClusterResult<()> {
        let args = ["rollout", "status", "deployment", deployment];
        match timeout.as_duration() {
            Some(limit) => match tokio::time::timeout(limit, self.run(&args)).await {
                Ok(result) => result.map(|_| ()),
                // The child is killed when its future is dropped.
                Err(_) => Err(ClusterError::TimedOut {
                    command: self.render(&args),
                    timeout: limit,
                }),
            },
            None => self.run(&args).await.map(|_| ()),
        }
    }

    async fn rollout_undo(&self, deployment: &str) -> ClusterResult<String> {
        let stdout = self.run(&["rollout", "undo", "deployment", deployment]).await?;
        Ok(stdout.trim().to_string())
    }
}
