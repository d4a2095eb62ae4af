//! The deployment engine — blue-green and canary state machines.
//!
//! Two drivers share the release store, health evaluator, and audit
//! trail:
//!
//! - **`orchestrator`** — the blue-green machine: backup → provision →
//!   migrate → health-check → atomic switch → post-verify → cleanup,
//!   with rollback on any failure after the candidate exists.
//! - **`canary`** — the gradual machine: an ordered list of (weight,
//!   soak) stages, each gated by health checks and the metrics gate
//!   before promotion, aborted to 0% traffic on any breach.
//!
//! Every edge — explicit failure, timeout, infrastructure fault — is a
//! first-class transition, written to the audit trail before the
//! action it describes executes.

pub mod canary;
pub mod collaborators;
pub mod config;
pub mod machine;
pub mod notify;
pub mod orchestrator;
pub mod plan;

pub use canary::{CanaryController, CanaryOutcome, CanaryState};
pub use collaborators::{BackupProvider, CommandBackup, CommandMigrator, Migrator, StepFuture};
pub use config::EngineConfig;
pub use machine::{DeployEvent, DeployState, FailureKind, transition};
pub use notify::{LogNotifier, Notice, Notifier};
pub use orchestrator::{DeployOutcome, DeploymentOrchestrator};
pub use plan::{CanaryPlan, CanaryStage};
