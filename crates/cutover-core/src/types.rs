//! Domain types for the cutover deployment engine.
//!
//! These types are shared across the release store, health evaluator,
//! metrics gate, and the two deployment state machines. All persisted
//! types serialize to/from JSON.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a release. Zero-padded epoch seconds plus an
/// optional collision suffix, so lexicographic order is chronological.
pub type ReleaseId = String;

/// Name of a deployment environment slot (e.g. "prod", "staging").
pub type EnvName = String;

// ── Release ────────────────────────────────────────────────────────

/// An immutable, timestamped release directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Release {
    pub id: ReleaseId,
    /// Absolute path of the release directory.
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub status: ReleaseStatus,
}

/// Lifecycle status of a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    /// Created but not yet serving traffic.
    Pending,
    /// Currently bound to the environment's `current` pointer.
    Live,
    /// Superseded by a newer release.
    Retired,
    /// A required gate failed before or after traffic exposure.
    Failed,
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReleaseStatus::Pending => "pending",
            ReleaseStatus::Live => "live",
            ReleaseStatus::Retired => "retired",
            ReleaseStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ── Health checks ──────────────────────────────────────────────────

/// Names of the built-in health checks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum CheckName {
    Service,
    Http,
    Database,
    Cache,
    Queue,
    Disk,
    TlsExpiry,
}

impl fmt::Display for CheckName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckName::Service => "service",
            CheckName::Http => "http",
            CheckName::Database => "database",
            CheckName::Cache => "cache",
            CheckName::Queue => "queue",
            CheckName::Disk => "disk",
            CheckName::TlsExpiry => "tls-expiry",
        };
        f.write_str(s)
    }
}

/// Result of a single health check run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckOutcome {
    pub pass: bool,
    /// Optional numeric reading (queue depth, disk percent, days to expiry).
    pub metric: Option<f64>,
    pub diagnostic: String,
}

impl CheckOutcome {
    pub fn pass(diagnostic: impl Into<String>) -> Self {
        Self {
            pass: true,
            metric: None,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn fail(diagnostic: impl Into<String>) -> Self {
        Self {
            pass: false,
            metric: None,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn with_metric(mut self, metric: f64) -> Self {
        self.metric = Some(metric);
        self
    }
}

/// Aggregated result of evaluating all checks against a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub outcomes: BTreeMap<CheckName, CheckOutcome>,
    /// Pass only if every check listed as required passed. Forced to
    /// pass when the required set is empty (advisory evaluation).
    pub overall: bool,
}

impl HealthReport {
    /// Names of required checks that failed, for diagnostics.
    pub fn failed(&self, required: &[CheckName]) -> Vec<CheckName> {
        required
            .iter()
            .filter(|name| self.outcomes.get(name).is_none_or(|o| !o.pass))
            .copied()
            .collect()
    }

    /// One-line summary of failed required checks.
    pub fn failure_summary(&self, required: &[CheckName]) -> String {
        let failed = self.failed(required);
        let parts: Vec<String> = failed
            .iter()
            .map(|name| match self.outcomes.get(name) {
                Some(o) => format!("{name}: {}", o.diagnostic),
                None => format!("{name}: missing"),
            })
            .collect();
        parts.join("; ")
    }
}

/// The endpoint a health check probes: an environment slot and the
/// address its release listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub environment: EnvName,
    /// host:port of the slot under evaluation.
    pub address: String,
}

impl Target {
    pub fn new(environment: impl Into<EnvName>, address: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            address: address.into(),
        }
    }
}

// ── Metrics ────────────────────────────────────────────────────────

/// Observed metrics over a trailing window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    /// Error rate as a fraction of requests (0.0–1.0).
    pub error_rate: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Thresholds a candidate must stay under to pass the metrics gate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GateThresholds {
    /// Maximum tolerated error rate (fraction, 0.0–1.0).
    pub error_rate: f64,
    /// Maximum tolerated p95 latency in milliseconds.
    pub p95_latency_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_status_roundtrip() {
        let json = serde_json::to_string(&ReleaseStatus::Retired).unwrap();
        assert_eq!(json, "\"retired\"");
        let back: ReleaseStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ReleaseStatus::Retired);
    }

    #[test]
    fn check_name_serializes_kebab_case() {
        let json = serde_json::to_string(&CheckName::TlsExpiry).unwrap();
        assert_eq!(json, "\"tls-expiry\"");
        assert_eq!(CheckName::TlsExpiry.to_string(), "tls-expiry");
    }

    #[test]
    fn report_failed_lists_only_required() {
        let mut outcomes = BTreeMap::new();
        outcomes.insert(CheckName::Http, CheckOutcome::pass("200 OK"));
        outcomes.insert(CheckName::Database, CheckOutcome::fail("connection refused"));
        outcomes.insert(CheckName::Disk, CheckOutcome::fail("91% used"));

        let report = HealthReport {
            outcomes,
            overall: false,
        };

        // Disk failed but is not required here.
        let failed = report.failed(&[CheckName::Http, CheckName::Database]);
        assert_eq!(failed, vec![CheckName::Database]);
    }

    #[test]
    fn report_failed_counts_missing_outcome_as_failure() {
        let report = HealthReport {
            outcomes: BTreeMap::new(),
            overall: false,
        };
        let failed = report.failed(&[CheckName::Cache]);
        assert_eq!(failed, vec![CheckName::Cache]);
        assert!(report.failure_summary(&[CheckName::Cache]).contains("missing"));
    }

    #[test]
    fn outcome_with_metric() {
        let outcome = CheckOutcome::pass("queue depth ok").with_metric(12.0);
        assert_eq!(outcome.metric, Some(12.0));
        assert!(outcome.pass);
    }
}
