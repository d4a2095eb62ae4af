//! The `rollback` subcommand — instant pointer-based revert.

use cutover_audit::AuditTrail;
use cutover_deploy::EngineConfig;
use cutover_release::{DeployLock, ReleaseStore};

/// Rebind the environment to the previous release, then re-verify its
/// health. Returns the process exit code.
pub async fn run(config: &EngineConfig, actor: &str) -> anyhow::Result<i32> {
    let store = ReleaseStore::open(&config.environment, &config.env_dir)?;
    let mut trail = AuditTrail::open(&config.environment, &config.env_dir)?;

    let _lock = match DeployLock::acquire(store.root()) {
        Ok(lock) => lock,
        Err(e) => {
            eprintln!("cannot roll back: {e}");
            return Ok(e.exit_code());
        }
    };

    let current = store.current_id()?;
    trail.append(
        actor,
        "live",
        "rolling-back",
        "manual rollback requested",
        current.as_ref(),
    )?;

    let restored = match store.rollback_to_previous() {
        Ok(release) => release,
        Err(e) => {
            trail.append(actor, "rolling-back", "halted", &e.to_string(), None)?;
            eprintln!("rollback failed: {e}");
            return Ok(e.exit_code());
        }
    };

    trail.append(
        actor,
        "rolling-back",
        "rolled-back",
        &format!("reverted to {}", restored.id),
        Some(&restored.id),
    )?;
    println!("✓ reverted to release {}", restored.id);

    // Re-verify the reverted environment so the operator knows whether
    // the safe state is actually healthy.
    let evaluator = config.build_evaluator()?;
    let report = evaluator
        .evaluate(&config.live_target(), &config.checks.required)
        .await;
    if report.overall {
        println!("✓ health verified on reverted environment");
        Ok(0)
    } else {
        eprintln!(
            "reverted, but health re-verification failed: {}",
            report.failure_summary(&config.checks.required)
        );
        Ok(2)
    }
}
