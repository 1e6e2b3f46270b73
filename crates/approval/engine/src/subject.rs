//! Subject domain seam.
//!
//! The engine tracks approval state; the business object under approval
//! lives elsewhere. A [`SubjectDomain`] implementation is how the engine
//! reports terminal outcomes back to that system, and how a level whose
//! reject action is `Custom` asks the domain what rejection should mean.

use crate::error::EngineResult;
use approval_types::ApprovalInstance;
use async_trait::async_trait;

/// What a rejected level does to the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectDirective {
    /// Conclude the instance as rejected.
    End,
    /// Reset the named earlier level and resume the chain from it.
    ReturnToLevel(u32),
}

/// Callbacks into the system that owns the subjects under approval.
#[async_trait]
pub trait SubjectDomain: Send + Sync {
    /// Called once after an instance reaches a terminal status. The
    /// instance carries the final status, the full decision record, and
    /// the context snapshot; implementations typically update the
    /// business object (mark the order approved, unlock the document).
    ///
    /// Runs after the state change is durable. A failure is logged and
    /// does not undo the conclusion.
    async fn on_concluded(&self, instance: &ApprovalInstance) -> EngineResult<()>;

    /// Called after the workflow advances into `level`. Best-effort,
    /// like [`SubjectDomain::on_concluded`].
    async fn on_level_advanced(
        &self,
        _instance: &ApprovalInstance,
        _level: u32,
    ) -> EngineResult<()> {
        Ok(())
    }

    /// Resolves `RejectAction::Custom` for the given level. Consulted
    /// before the rejection is applied; an error here aborts the
    /// submission.
    async fn reject_directive(
        &self,
        _instance: &ApprovalInstance,
        _level: u32,
    ) -> EngineResult<RejectDirective> {
        Ok(RejectDirective::End)
    }
}

/// Domain adapter for subjects that need no callbacks. Custom reject
/// actions resolve to [`RejectDirective::End`].
#[derive(Debug, Default, Clone)]
pub struct NoopSubjectDomain;

#[async_trait]
impl SubjectDomain for NoopSubjectDomain {
    async fn on_concluded(&self, instance: &ApprovalInstance) -> EngineResult<()> {
        tracing::debug!(
            instance_id = %instance.id,
            status = %instance.status,
            "no subject domain configured; conclusion not propagated"
        );
        Ok(())
    }
}
