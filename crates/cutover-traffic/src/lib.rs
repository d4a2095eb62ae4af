//! Traffic splitting for canary rollouts.
//!
//! The splitter does not route packets itself. It computes and writes
//! the desired upstream weight configuration and signals the routing
//! layer (nginx-style) to reload; "reload acknowledged" vs "reload
//! failed" is the only signal the engine consumes. Monotonicity of the
//! weight sequence is the canary controller's job — the splitter stays
//! a dumb, testable primitive.

pub mod splitter;

pub use splitter::{SplitFuture, TrafficSplitter, UpstreamFileSplitter};
