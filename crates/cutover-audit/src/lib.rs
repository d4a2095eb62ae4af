//! Append-only audit trail for deployment attempts.
//!
//! Every state transition, gate decision, and rollback is written to a
//! JSONL file *before* the transition's action executes, so a crash
//! mid-action leaves an unambiguous record of intended vs completed
//! state. Records are never mutated or deleted; the trail is the
//! durable source of truth for "what happened and when".
//!
//! Ordering per environment is guaranteed by the deploy lock: the
//! single in-flight orchestrator is the only writer.

pub mod trail;

pub use trail::{AuditRecord, AuditTrail};
