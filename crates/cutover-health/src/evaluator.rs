//! Concurrent fan-out/fan-in health evaluation.
//!
//! All configured checks are spawned at once, each wrapped in its own
//! timeout; the fan-in waits for every check to finish or expire. A
//! check that exceeds its timeout is recorded as failed with the
//! diagnostic "timeout".

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info};

use cutover_core::{CheckName, CheckOutcome, HealthReport, Target};

use crate::check::Check;

/// Runs the configured check battery against a target.
pub struct HealthEvaluator {
    checks: Vec<Arc<dyn Check>>,
}

impl HealthEvaluator {
    pub fn new(checks: Vec<Arc<dyn Check>>) -> Self {
        Self { checks }
    }

    /// Evaluate the target against all configured checks.
    ///
    /// `required` names the checks that gate the `overall` verdict;
    /// every other check still runs and its diagnostic is recorded.
    /// An empty `required` set forces `overall` to pass (advisory
    /// evaluation before anything is at stake).
    pub async fn evaluate(&self, target: &Target, required: &[CheckName]) -> HealthReport {
        let mut set = JoinSet::new();
        for check in &self.checks {
            let name = check.name();
            let timeout = check.timeout();
            let fut = check.run(target);
            set.spawn(async move {
                match tokio::time::timeout(timeout, fut).await {
                    Ok(outcome) => (name, outcome),
                    Err(_) => (name, CheckOutcome::fail("timeout")),
                }
            });
        }

        let mut outcomes = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, outcome)) => {
                    debug!(
                        check = %name,
                        pass = outcome.pass,
                        diagnostic = %outcome.diagnostic,
                        "check finished"
                    );
                    outcomes.insert(name, outcome);
                }
                Err(e) => {
                    // A panicked check is missing from the outcome map
                    // and therefore counts against any required gate.
                    error!(error = %e, "health check task failed");
                }
            }
        }

        let overall = required.is_empty()
            || required
                .iter()
                .all(|name| outcomes.get(name).is_some_and(|o| o.pass));

        info!(
            environment = %target.environment,
            checks = outcomes.len(),
            required = required.len(),
            overall,
            "health evaluation complete"
        );

        HealthReport { outcomes, overall }
    }
}
