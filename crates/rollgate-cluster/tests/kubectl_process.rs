//! Drives `Kubectl` against a shell script standing in for the real binary.
//!
//! Kept to a single test so no other thread forks while the script is
//! being written.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use rollgate_cluster::{ClusterError, ClusterMutator, ClusterStateReader, Kubectl};
use rollgate_core::Timeout;
use tokio::sync::mpsc;

const SCRIPT: &str = r#"#!/bin/sh
case "$1" in --namespace=*) echo "ns $1" >&2; shift;; esac
case "$1" in
  apply) cat ;;
  rollout)
    if [ "$2" = "status" ]; then sleep 5; else echo "deployment.apps/$4 rolled back"; fi ;;
  *) echo "unknown command $1" >&2; exit 3 ;;
esac
"#;

#[tokio::test]
async fn kubectl_against_scripted_binary() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kubectl");
    std::fs::write(&path, SCRIPT).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    let kubectl = Kubectl::new(&path).with_namespace(Some("prod".to_string()));

    // apply streams stdout lines back as they appear.
    let manifest = b"deployment.apps/api configured\nservice/web unchanged\n".to_vec();
    let (tx, mut rx) = mpsc::channel(8);
    kubectl
        .apply(Box::new(std::io::Cursor::new(manifest)), tx)
        .await
        .unwrap();
    let mut lines = Vec::new();
    while let Some(line) = rx.recv().await {
        lines.push(line);
    }
    assert_eq!(lines, ["deployment.apps/api configured", "service/web unchanged"]);

    // rollout status is bounded by its timeout.
    let err = kubectl
        .rollout_status("api", Timeout::Bounded(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::TimedOut { .. }), "{err}");

    // rollout undo returns trimmed output.
    let out = kubectl.rollout_undo("api").await.unwrap();
    assert_eq!(out, "deployment.apps/api rolled back");

    // unknown verbs exit non-zero with stderr attached.
    let err = kubectl.get_service("web").await.unwrap_err();
    assert_eq!(err.exit_code(), Some(3));
    assert!(err.to_string().contains("unknown command get"), "{err}");
}
