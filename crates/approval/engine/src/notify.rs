//! Notification seam.
//!
//! The engine describes what happened as an [`ApprovalNotice`] and hands it
//! to a [`NotificationSink`]. Delivery is best-effort: a failed delivery is
//! logged and never rolls back the state change that produced it.

use crate::error::EngineResult;
use approval_types::{ApproverId, InstanceId, SubjectRef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A notification produced by an engine transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalNotice {
    pub instance_id: InstanceId,
    pub subject: SubjectRef,
    pub kind: NoticeKind,
    /// Level the notice concerns, absent for workflow-wide notices.
    pub level: Option<u32>,
    pub recipients: Vec<ApproverId>,
    pub message: String,
}

impl ApprovalNotice {
    /// A level became active and the listed approvers should decide.
    pub fn decision_requested(
        instance_id: InstanceId,
        subject: SubjectRef,
        level: u32,
        level_name: &str,
        recipients: Vec<ApproverId>,
    ) -> Self {
        Self {
            instance_id,
            subject,
            kind: NoticeKind::DecisionRequested,
            level: Some(level),
            recipients,
            message: format!("approval requested at level {level} ({level_name})"),
        }
    }

    /// A level blew its deadline and was escalated.
    pub fn escalated(
        instance_id: InstanceId,
        subject: SubjectRef,
        level: u32,
        recipients: Vec<ApproverId>,
        extended: bool,
    ) -> Self {
        let message = if extended {
            format!("level {level} is overdue; the deadline was extended")
        } else {
            format!("level {level} is overdue; no further extensions remain")
        };
        Self {
            instance_id,
            subject,
            kind: NoticeKind::Escalated,
            level: Some(level),
            recipients,
            message,
        }
    }

    /// The workflow reached a terminal status.
    pub fn concluded(
        instance_id: InstanceId,
        subject: SubjectRef,
        recipients: Vec<ApproverId>,
        status: &str,
    ) -> Self {
        Self {
            instance_id,
            subject,
            kind: NoticeKind::Concluded,
            level: None,
            recipients,
            message: format!("approval workflow concluded: {status}"),
        }
    }
}

/// Why a notice was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeKind {
    DecisionRequested,
    Escalated,
    Concluded,
}

/// Delivery channel for approval notices (chat, email, webhooks, ...).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notice: ApprovalNotice) -> EngineResult<()>;
}

/// Sink that drops notices after logging them at debug level.
#[derive(Debug, Default, Clone)]
pub struct NoopNotifier;

#[async_trait]
impl NotificationSink for NoopNotifier {
    async fn deliver(&self, notice: ApprovalNotice) -> EngineResult<()> {
        tracing::debug!(
            instance_id = %notice.instance_id,
            kind = ?notice.kind,
            recipients = notice.recipients.len(),
            "dropping notice (no sink configured)"
        );
        Ok(())
    }
}
