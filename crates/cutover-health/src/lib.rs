//! Health evaluation for deployment targets.
//!
//! A battery of independent checks runs concurrently against a target
//! environment, each with its own timeout, and the results aggregate
//! into a single pass/fail verdict with per-check diagnostics. Total
//! wall time is bounded by the slowest single timeout, never the sum.
//!
//! # Components
//!
//! - **`check`** — the pluggable `Check` trait plus command-driven checks
//!   (service, database, queue, disk, TLS expiry, cache ping)
//! - **`http`** — HTTP endpoint probe (status + body marker)
//! - **`evaluator`** — concurrent fan-out/fan-in aggregation

pub mod check;
pub mod evaluator;
pub mod http;

pub use check::{Check, CheckFuture, CommandCheck, RedisPingCheck, TlsExpiryCheck};
pub use evaluator::HealthEvaluator;
pub use http::HttpCheck;
