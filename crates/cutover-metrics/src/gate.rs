//! Threshold comparison over observed metrics.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use cutover_core::{GateThresholds, MetricsSnapshot, ReleaseId};

use crate::source::MetricsSource;

/// Outcome of a metrics gate check.
#[derive(Debug, Clone)]
pub struct GateVerdict {
    pub pass: bool,
    /// The observed snapshot, absent when the source was unreachable.
    pub observed: Option<MetricsSnapshot>,
    pub diagnostic: String,
}

/// Compares a candidate's trailing-window metrics against thresholds.
///
/// The selector template may contain a `{release}` placeholder, which
/// is substituted with the candidate id so the query isolates canary
/// traffic from stable traffic.
pub struct MetricsGate {
    source: Arc<dyn MetricsSource>,
    selector_template: String,
}

impl MetricsGate {
    pub fn new(source: Arc<dyn MetricsSource>, selector_template: impl Into<String>) -> Self {
        Self {
            source,
            selector_template: selector_template.into(),
        }
    }

    /// Check the candidate over the trailing `window`.
    ///
    /// Pass requires `observed <= threshold` for both error rate and
    /// p95 latency. An unreachable source fails the gate with
    /// diagnostic "metrics-unavailable" — never silently ignored.
    pub async fn check(
        &self,
        candidate: &ReleaseId,
        window: Duration,
        thresholds: &GateThresholds,
    ) -> GateVerdict {
        let selector = self.selector_template.replace("{release}", candidate);

        let snapshot = match self.source.query(&selector, window).await {
            Ok(s) => s,
            Err(e) => {
                warn!(%candidate, error = %e, "metrics source unavailable, failing closed");
                return GateVerdict {
                    pass: false,
                    observed: None,
                    diagnostic: "metrics-unavailable".to_string(),
                };
            }
        };

        let mut breaches = Vec::new();
        if snapshot.error_rate > thresholds.error_rate {
            breaches.push(format!(
                "error rate {:.4} > {:.4}",
                snapshot.error_rate, thresholds.error_rate
            ));
        }
        if snapshot.p95_ms > thresholds.p95_latency_ms {
            breaches.push(format!(
                "p95 {:.0}ms > {:.0}ms",
                snapshot.p95_ms, thresholds.p95_latency_ms
            ));
        }

        let pass = breaches.is_empty();
        let diagnostic = if pass {
            format!(
                "error rate {:.4}, p95 {:.0}ms within thresholds",
                snapshot.error_rate, snapshot.p95_ms
            )
        } else {
            breaches.join("; ")
        };

        info!(%candidate, pass, %diagnostic, "metrics gate evaluated");
        GateVerdict {
            pass,
            observed: Some(snapshot),
            diagnostic,
        }
    }
}
