//! Core domain types for the cutover deployment engine.
//!
//! Shared by every other crate in the workspace: release identities and
//! lifecycle states, health check verdicts, metrics snapshots, gate
//! thresholds, and the error taxonomy that maps onto the CLI's exit
//! codes.

pub mod duration;
pub mod error;
pub mod types;

pub use duration::parse_duration;
pub use error::{DeployError, DeployResult};
pub use types::*;
