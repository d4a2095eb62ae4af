//! The blue-green deployment state machine.
//!
//! States and transitions are explicit data, and `transition` is a
//! pure function, so every edge case — explicit failure vs timeout vs
//! infrastructure error — is a testable case rather than implicit
//! control flow. The orchestrator walks this machine and performs each
//! state's side effect.

use std::fmt;

use serde::{Deserialize, Serialize};

/// States of a blue-green deployment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployState {
    Idle,
    /// Pre-deploy backup of the live environment.
    Backup,
    /// Materialize the candidate release.
    Provision,
    /// Run the release's migration step.
    Migrate,
    /// Evaluate the candidate in isolation.
    HealthCheck,
    /// Atomic pointer rebind — the single moment traffic moves.
    Switch,
    /// Re-evaluate the now-live environment.
    PostVerify,
    /// Prune old releases (best-effort).
    Cleanup,
    /// Terminal: deployment succeeded.
    Done,
    /// Reverting: discard the candidate, and if traffic already moved,
    /// rebind the pointer to the prior release.
    RollingBack,
    /// Terminal: reverted to the pre-deployment release.
    RolledBack,
    /// Terminal: stopped in a state requiring operator attention
    /// (backup failed before any candidate existed, or the rollback
    /// itself failed).
    Halted,
}

impl DeployState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeployState::Done | DeployState::RolledBack | DeployState::Halted
        )
    }
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeployState::Idle => "idle",
            DeployState::Backup => "backup",
            DeployState::Provision => "provision",
            DeployState::Migrate => "migrate",
            DeployState::HealthCheck => "health-check",
            DeployState::Switch => "switch",
            DeployState::PostVerify => "post-verify",
            DeployState::Cleanup => "cleanup",
            DeployState::Done => "done",
            DeployState::RollingBack => "rolling-back",
            DeployState::RolledBack => "rolled-back",
            DeployState::Halted => "halted",
        };
        f.write_str(s)
    }
}

/// Why a step failed. Gates are expected outcomes; infrastructure
/// faults (including timeouts) are not, but both take the same
/// rollback edge — the distinction only surfaces in the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A required health check or metrics threshold failed.
    Gate,
    /// An external call failed or timed out.
    Infra,
}

/// Events fed into the machine after each state's action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployEvent {
    Start,
    Succeeded,
    Failed(FailureKind),
}

/// The transition function. Terminal states absorb every event.
pub fn transition(state: DeployState, event: DeployEvent) -> DeployState {
    use DeployEvent::*;
    use DeployState::*;

    match (state, event) {
        (Idle, Start) => Backup,

        (Backup, Succeeded) => Provision,
        // Nothing has been touched yet; halt without a candidate.
        (Backup, Failed(_)) => Halted,

        (Provision, Succeeded) => Migrate,
        (Provision, Failed(_)) => RollingBack,

        (Migrate, Succeeded) => HealthCheck,
        (Migrate, Failed(_)) => RollingBack,

        (HealthCheck, Succeeded) => Switch,
        (HealthCheck, Failed(_)) => RollingBack,

        (Switch, Succeeded) => PostVerify,
        (Switch, Failed(_)) => RollingBack,

        (PostVerify, Succeeded) => Cleanup,
        // Fail closed: an unverifiable live environment rolls back.
        (PostVerify, Failed(_)) => RollingBack,

        // Cleanup failure is logged but never affects the outcome.
        (Cleanup, _) => Done,

        (RollingBack, Succeeded) => RolledBack,
        (RollingBack, Failed(_)) => Halted,

        // Terminal states (and Idle without Start) absorb.
        (s, _) => s,
    }
}
