//! Metrics gating for canary promotion decisions.
//!
//! Queries an external Prometheus-style time-series source for error
//! rate and latency percentiles over a trailing window and compares
//! them against configured thresholds. The design is fail-closed: if
//! the source cannot be reached, the gate reports failure — an
//! inability to verify health is never treated as health.

pub mod gate;
pub mod source;

pub use gate::{GateVerdict, MetricsGate};
pub use source::{HttpMetricsSource, MetricsSource, QueryFuture};
