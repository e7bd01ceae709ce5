use std::process::ExitCode;
use std::sync::Arc;

use rollgate_cluster::{Kubectl, ManifestSource};
use rollgate_core::RolloutConfig;
use rollgate_rollout::DeploymentOrchestrator;
use tracing::error;

use crate::commands::report;
use crate::{EXIT_FAILED, EXIT_FATAL, OutputFormat};

/// Run the pipeline on manifests read from stdin and print the report.
pub async fn run(config: RolloutConfig, output: OutputFormat) -> anyhow::Result<ExitCode> {
    let kubectl = Arc::new(Kubectl::from_config(&config));
    let manifest: ManifestSource = Box::new(tokio::io::stdin());

    let outcome = match DeploymentOrchestrator::new(kubectl, config).run(manifest).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "rollout aborted");
            return Ok(ExitCode::from(EXIT_FATAL));
        }
    };

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        OutputFormat::Text => print!("{}", report::format_outcome(&outcome)),
    }

    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILED)
    })
}
