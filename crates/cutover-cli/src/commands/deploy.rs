//! The `blue-green` and `canary` subcommands.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;

use cutover_audit::AuditTrail;
use cutover_core::ReleaseStatus;
use cutover_deploy::{
    CanaryController, CanaryPlan, DeploymentOrchestrator, EngineConfig, LogNotifier, Migrator,
};
use cutover_release::ReleaseStore;

/// Run a blue-green deployment. Returns the process exit code.
pub async fn blue_green(
    config: &EngineConfig,
    artifact: &Path,
    actor: &str,
) -> anyhow::Result<i32> {
    let store = ReleaseStore::open(&config.environment, &config.env_dir)?;
    let trail = AuditTrail::open(&config.environment, &config.env_dir)?;

    let mut orchestrator = DeploymentOrchestrator::new(
        store,
        config.build_evaluator()?,
        trail,
        Arc::new(config.build_backup()?),
        Arc::new(config.build_migrator()?),
        Arc::new(LogNotifier),
        config.checks.required.clone(),
        config.candidate_target(),
        config.live_target(),
        config.retain,
    );

    match orchestrator.run(artifact, actor).await {
        Ok(outcome) => {
            println!("blue-green deployment finished: {}", outcome.state);
            print_attempt(config, outcome.attempt_start_seq)?;
            Ok(outcome.exit_code())
        }
        Err(e) => {
            eprintln!("blue-green deployment failed to start: {e}");
            Ok(e.exit_code())
        }
    }
}

/// Run a canary rollout. Returns the process exit code.
pub async fn canary(
    config: &EngineConfig,
    artifact: &Path,
    plan_path: &Path,
    actor: &str,
) -> anyhow::Result<i32> {
    let plan = match CanaryPlan::load(plan_path) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("refusing to start: {e}");
            return Ok(e.exit_code());
        }
    };

    let store = ReleaseStore::open(&config.environment, &config.env_dir)?;
    let trail = AuditTrail::open(&config.environment, &config.env_dir)?;

    // Provision the candidate and run its migration before it receives
    // any traffic.
    let candidate = match store.create(artifact) {
        Ok(release) => release,
        Err(e) => {
            eprintln!("failed to provision candidate: {e}");
            return Ok(e.exit_code());
        }
    };
    let migrator = config.build_migrator()?;
    if let Err(e) = migrator.migrate(&candidate.path).await {
        store.set_status(&candidate.id, ReleaseStatus::Failed)?;
        eprintln!("migration failed, candidate {} discarded: {e}", candidate.id);
        return Ok(e.exit_code());
    }

    // Ctrl-C becomes an operator abort: the controller cuts traffic to
    // 0% instead of dying mid-stage.
    let (abort_tx, abort_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, requesting canary abort");
            let _ = abort_tx.send(true);
        }
    });

    let mut controller = CanaryController::new(
        store,
        config.build_evaluator()?,
        config.build_gate()?,
        Arc::new(config.build_splitter()?),
        trail,
        Arc::new(LogNotifier),
        config.checks.required.clone(),
        config.candidate_target(),
        abort_rx,
    );

    match controller.run(&candidate, &plan, actor).await {
        Ok(outcome) => {
            println!("canary rollout finished: {}", outcome.state);
            print_attempt(config, outcome.attempt_start_seq)?;
            Ok(outcome.exit_code())
        }
        Err(e) => {
            eprintln!("canary rollout failed to start: {e}");
            Ok(e.exit_code())
        }
    }
}

/// Print the audit records of one attempt so the operator sees exactly
/// what happened and when.
fn print_attempt(config: &EngineConfig, from_seq: u64) -> anyhow::Result<()> {
    let trail = AuditTrail::open(&config.environment, &config.env_dir)?;
    for record in trail.records_from(from_seq)? {
        println!(
            "  [{}] {} {} → {}: {}",
            record.seq,
            record.timestamp.format("%H:%M:%S"),
            record.from_state,
            record.to_state,
            record.reason
        );
    }
    Ok(())
}
