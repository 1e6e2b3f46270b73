//! Storage abstractions for the approval engine.
//!
//! This crate defines the persistence contract the engine runs against:
//! - versioned approval instances (system of record, compare-and-set saves)
//! - an append-only, hash-chained audit log
//!
//! Design stance:
//! - Postgres is the transactional source of truth.
//! - The in-memory adapter exists for tests and single-process embedding.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
mod model;
#[cfg(feature = "postgres")]
pub mod postgres;
mod traits;

pub use error::{StorageError, StorageResult};
pub use model::StoredInstance;
pub use traits::{ApprovalStore, AuditStore, InstanceStore, QueryWindow};
