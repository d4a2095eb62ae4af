//! Structured deployment events for notification channels.
//!
//! The engine only emits events; concrete transports (Slack, email,
//! pager) subscribe by implementing `Notifier`. The built-in
//! `LogNotifier` surfaces everything through the tracing pipeline.

use tracing::{info, warn};

use cutover_core::ReleaseId;

/// Terminal outcomes and escalations the engine announces.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    DeployCompleted {
        release: ReleaseId,
    },
    DeployRolledBack {
        release: Option<ReleaseId>,
        reason: String,
    },
    DeployHalted {
        reason: String,
    },
    CanaryCompleted {
        release: ReleaseId,
    },
    CanaryAborted {
        release: ReleaseId,
        reason: String,
    },
    /// The engine could not reach a safe state on its own; an operator
    /// must reconcile manually.
    ManualInterventionRequired {
        reason: String,
    },
}

/// Sink for deployment events.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &Notice);
}

/// Default notifier: structured log events.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: &Notice) {
        match notice {
            Notice::DeployCompleted { release } => {
                info!(%release, "deployment completed");
            }
            Notice::DeployRolledBack { release, reason } => {
                warn!(release = ?release, %reason, "deployment rolled back");
            }
            Notice::DeployHalted { reason } => {
                warn!(%reason, "deployment halted");
            }
            Notice::CanaryCompleted { release } => {
                info!(%release, "canary promoted to stable");
            }
            Notice::CanaryAborted { release, reason } => {
                warn!(%release, %reason, "canary aborted, traffic reverted");
            }
            Notice::ManualInterventionRequired { reason } => {
                warn!(%reason, "manual intervention required");
            }
        }
    }
}
