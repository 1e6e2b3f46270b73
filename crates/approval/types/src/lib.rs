//! Approval Domain Types
//!
//! Core vocabulary of the multi-level approval engine: definitions,
//! instances, decisions, and the audit trail.
//!
//! # Key Concepts
//!
//! - **WorkflowDefinition**: An ordered chain of approval levels. Validated
//!   on registration, snapshotted into every instance created from it.
//! - **ApprovalInstance**: A running approval for one subject. Owns the
//!   definition snapshot, the per-level runtime states, and every decision.
//! - **LevelState**: Runtime state of one level — pending, satisfied,
//!   rejected, or skipped — plus its deadline bookkeeping.
//! - **Decision**: One approver's act (approve, reject, delegate). At most
//!   one active decision per (level, approver); resubmission replaces.
//! - **AuditEvent / AuditRecord**: Append-only trail of everything that
//!   happened, hash-chained by the audit store.
//!
//! # Design Principles
//!
//! 1. Instances are self-contained: definition and context are snapshotted
//!    at creation, so nothing mutates an in-flight chain from outside.
//! 2. Levels resolve in order. Exactly one level collects decisions at a
//!    time; re-entering a level resets it completely.
//! 3. System actions (timeouts) flow through the same decision pipeline as
//!    human ones, distinguished only by origin.
//! 4. Every transition leaves an audit event, never a silent state change.

#![deny(unsafe_code)]

mod audit;
mod context;
mod decision;
mod definition;
mod errors;
mod ids;
mod instance;

pub use audit::*;
pub use context::*;
pub use decision::*;
pub use definition::*;
pub use errors::*;
pub use ids::*;
pub use instance::*;
