//! The `status` subcommand — bindings, releases, and the audit tail.

use serde::Serialize;

use cutover_audit::{AuditRecord, AuditTrail};
use cutover_core::Release;
use cutover_deploy::EngineConfig;
use cutover_release::ReleaseStore;

#[derive(Serialize)]
struct StatusReport {
    environment: String,
    current: Option<Release>,
    previous: Option<Release>,
    releases: Vec<Release>,
    audit: Vec<AuditRecord>,
}

/// Print environment status. Returns the process exit code.
pub fn run(config: &EngineConfig, json: bool, tail: usize) -> anyhow::Result<i32> {
    let store = ReleaseStore::open(&config.environment, &config.env_dir)?;
    let trail = AuditTrail::open(&config.environment, &config.env_dir)?;

    let report = StatusReport {
        environment: config.environment.clone(),
        current: store.current()?,
        previous: store.previous()?,
        releases: store.list()?,
        audit: trail.tail(tail)?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(0);
    }

    println!("environment: {}", report.environment);
    match &report.current {
        Some(release) => println!("current:  {} ({})", release.id, release.status),
        None => println!("current:  (none)"),
    }
    match &report.previous {
        Some(release) => println!("previous: {} ({})", release.id, release.status),
        None => println!("previous: (none)"),
    }

    println!("releases:");
    for release in &report.releases {
        println!("  {}  {}  {}", release.id, release.status, release.created_at);
    }

    if !report.audit.is_empty() {
        println!("recent audit trail:");
        for record in &report.audit {
            println!(
                "  [{}] {} {} {} → {}: {}",
                record.seq,
                record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                record.actor,
                record.from_state,
                record.to_state,
                record.reason
            );
        }
    }

    Ok(0)
}
