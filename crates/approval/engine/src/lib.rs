//! Multi-Level Approval Engine
//!
//! The approval engine runs multi-level approval workflows over arbitrary
//! business subjects. It advances instances through quorum-gated levels,
//! resolves approvers against a live identity directory, fires deadline
//! actions, and maintains a complete audit trail.
//!
//! # Key Principle
//!
//! **The engine decides approval state, it never mutates the subject.**
//!
//! It records decisions, evaluates quorums, and advances levels. Acting
//! on the outcome (unlocking the document, provisioning the access) is
//! the caller's job, wired in through the [`SubjectDomain`] seam.
//!
//! # Architecture
//!
//! The [`TransitionEngine`] composes specialized components:
//!
//! - [`DefinitionRegistry`] — Validates and stores workflow definitions
//! - [`EligibilityResolver`] — Resolves approver specs against the directory
//! - [`evaluator`] — Pure quorum evaluation for the four approval modes
//! - [`TimeoutScheduler`] — Sweeps blown deadlines in the background
//! - [`NotificationSink`] / [`SubjectDomain`] — Outbound collaborator seams
//!
//! # Example
//!
//! ```rust
//! use approval_engine::{
//!     DirectoryUser, EngineConfig, NoopNotifier, NoopSubjectDomain, StaticDirectory,
//!     TransitionEngine,
//! };
//! use approval_storage::memory::MemoryApprovalStore;
//! use approval_types::{
//!     ApprovalMode, ApproverSpec, LevelDefinition, TenantId, WorkflowDefinition,
//! };
//! use std::sync::Arc;
//!
//! let tenant = TenantId::new("acme");
//! let directory = StaticDirectory::new()
//!     .with_user(DirectoryUser::new(tenant, "lead-1").with_role("team-lead"));
//!
//! let engine = TransitionEngine::new(
//!     Arc::new(MemoryApprovalStore::new()),
//!     Arc::new(directory),
//!     Arc::new(NoopSubjectDomain),
//!     Arc::new(NoopNotifier),
//!     EngineConfig::default(),
//! );
//!
//! let mut def = WorkflowDefinition::new("Change approval");
//! def.add_level(LevelDefinition::new(
//!     1,
//!     "Team Lead",
//!     ApproverSpec::role("team-lead"),
//!     ApprovalMode::Any,
//! ))
//! .unwrap();
//!
//! let def_id = engine.register_definition(def).unwrap();
//! assert!(engine.definition(&def_id).is_ok());
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod directory;
pub mod error;
pub mod evaluator;
pub mod notify;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod subject;
pub mod transition;

// Re-export main types
pub use config::{EngineConfig, EscalationPolicy, RetryPolicy, SweepConfig};
pub use directory::{DirectoryUser, IdentityDirectory, StaticDirectory};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use evaluator::{evaluate, next_in_sequence, LevelOutcome};
pub use notify::{ApprovalNotice, NoopNotifier, NoticeKind, NotificationSink};
pub use registry::DefinitionRegistry;
pub use resolver::EligibilityResolver;
pub use scheduler::{SweepReport, TimeoutScheduler};
pub use subject::{NoopSubjectDomain, RejectDirective, SubjectDomain};
pub use transition::{SubmitDecision, TimeoutDisposition, TransitionEngine};
