//! Error taxonomy for the cutover deployment engine.

use thiserror::Error;

/// Result type alias for deployment operations.
pub type DeployResult<T> = Result<T, DeployError>;

/// Errors that can occur while driving a deployment.
///
/// Gate failures (`HealthGate`, `MetricsGate`) are expected outcomes:
/// they always route through the rollback/abort path and are never
/// escalated as fatal. `Storage` and `Infrastructure` errors before
/// traffic exposure abort the attempt without touching production;
/// after exposure the engine fails closed and rolls back.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("required health checks failed: {0}")]
    HealthGate(String),

    #[error("metrics gate failed: {0}")]
    MetricsGate(String),

    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    #[error("deployment already in progress: {0}")]
    AlreadyInProgress(String),

    #[error("no prior release to roll back to")]
    NoPriorRelease,

    #[error("invalid canary plan: {0}")]
    InvalidPlan(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl DeployError {
    /// Whether this is an anticipated gate failure rather than an
    /// infrastructure fault.
    pub fn is_gate_failure(&self) -> bool {
        matches!(self, DeployError::HealthGate(_) | DeployError::MetricsGate(_))
    }

    /// Process exit code for the CLI contract: 1 for gate failures
    /// (safe state), 2 for everything else (operator attention).
    pub fn exit_code(&self) -> i32 {
        if self.is_gate_failure() { 1 } else { 2 }
    }
}

impl From<std::io::Error> for DeployError {
    fn from(e: std::io::Error) -> Self {
        DeployError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_failures_exit_one() {
        assert_eq!(DeployError::HealthGate("http".into()).exit_code(), 1);
        assert_eq!(DeployError::MetricsGate("p95".into()).exit_code(), 1);
    }

    #[test]
    fn infra_errors_exit_two() {
        assert_eq!(DeployError::Storage("disk".into()).exit_code(), 2);
        assert_eq!(DeployError::Infrastructure("reload".into()).exit_code(), 2);
        assert_eq!(DeployError::NoPriorRelease.exit_code(), 2);
        assert_eq!(DeployError::AlreadyInProgress("pid 42".into()).exit_code(), 2);
    }

    #[test]
    fn io_errors_map_to_storage() {
        let io = std::io::Error::other("disk full");
        let err: DeployError = io.into();
        assert!(matches!(err, DeployError::Storage(_)));
    }
}
