//! Human-readable rollout report.

use std::fmt::Write;

use rollgate_core::{
    GenerationChange, RollbackOutcome, RollbackStatus, RolloutOutcome, RolloutPhase, RolloutReport,
    StageFailure,
};

/// Render an outcome as the multi-line summary printed after a run.
pub fn format_outcome(outcome: &RolloutOutcome) -> String {
    let mut out = String::new();
    match outcome {
        RolloutOutcome::Success { report } => {
            out.push_str("rollout succeeded\n");
            format_report(&mut out, report);
        }
        RolloutOutcome::Failed {
            report,
            failure,
            rollback,
        } => {
            out.push_str("rollout FAILED\n");
            format_report(&mut out, report);
            format_failure(&mut out, failure);
            format_rollback(&mut out, rollback);
        }
    }
    out
}

fn format_report(out: &mut String, report: &RolloutReport) {
    let phases: Vec<String> = report.phases.iter().map(RolloutPhase::to_string).collect();
    let _ = writeln!(out, "phases: {}", phases.join(" -> "));

    if !report.generation_changes.is_empty() {
        out.push_str("deployments:\n");
        for change in &report.generation_changes {
            let _ = match change {
                GenerationChange::Updated { name, from, to } => {
                    writeln!(out, "  {name:<24} generation {from} => {to}")
                }
                GenerationChange::Unchanged { name, generation } => {
                    writeln!(out, "  {name:<24} unchanged (generation {generation})")
                }
                GenerationChange::Added { name, generation } => {
                    writeln!(out, "  {name:<24} added (generation {generation})")
                }
            };
        }
    }

    for (name, replicas) in &report.replicas {
        let _ = writeln!(out, "  {name:<24} {replicas} replicas available");
    }

    if !report.ready_services.is_empty() {
        let _ = writeln!(out, "services ready: {}", report.ready_services.join(", "));
    }
    for (name, address) in &report.endpoints {
        let _ = writeln!(out, "  {name:<24} at {address}");
    }
}

fn format_failure(out: &mut String, failure: &StageFailure) {
    let _ = writeln!(out, "{failure}");
    for error in &failure.errors {
        let _ = writeln!(out, "  {:<24} {}", error.name(), error.reason());
    }
}

fn format_rollback(out: &mut String, rollback: &RollbackOutcome) {
    if rollback.is_noop() {
        out.push_str("nothing rolled back: no failed name is in the changed set\n");
    }
    for result in &rollback.results {
        let _ = match &result.status {
            RollbackStatus::RolledBack { output } => writeln!(out, "  rolled back {}: {output}", result.name),
            RollbackStatus::Failed { error } => {
                writeln!(out, "  rollback FAILED {}: {}", result.name, error.reason())
            }
        };
    }
    if !rollback.skipped.is_empty() {
        let _ = writeln!(out, "left in place (not in changed set): {}", rollback.skipped.join(", "));
    }
}
