//! Decisions: individual approve/reject/delegate acts by approvers.
//!
//! At most one decision per (level, approver) is active; resubmitting
//! replaces the earlier one. System-synthesized decisions (timeouts) carry
//! `DecisionOrigin::System` and the reserved system approver identity.

use crate::{ApproverId, DecisionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Decision ─────────────────────────────────────────────────────────

/// A single approver's act at a level
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Decision {
    /// Unique decision identifier
    pub id: DecisionId,
    /// The level this decision belongs to
    pub level: u32,
    /// Who decided
    pub approver: ApproverId,
    pub action: DecisionAction,
    /// Free-form rationale; mandatory for rejections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Target of a delegation; set iff `action` is `Delegate`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate_to: Option<ApproverId>,
    pub origin: DecisionOrigin,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn new(level: u32, approver: ApproverId, action: DecisionAction) -> Self {
        Self {
            id: DecisionId::generate(),
            level,
            approver,
            action,
            comment: None,
            delegate_to: None,
            origin: DecisionOrigin::Approver,
            decided_at: Utc::now(),
        }
    }

    /// Synthesized by the timeout scheduler; acts as the system identity.
    pub fn system(level: u32, action: DecisionAction, comment: impl Into<String>) -> Self {
        Self {
            id: DecisionId::generate(),
            level,
            approver: ApproverId::system(),
            action,
            comment: Some(comment.into()),
            delegate_to: None,
            origin: DecisionOrigin::System,
            decided_at: Utc::now(),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_delegate(mut self, delegate_to: ApproverId) -> Self {
        self.delegate_to = Some(delegate_to);
        self
    }

    pub fn is_system(&self) -> bool {
        self.origin == DecisionOrigin::System
    }

    /// Whether this decision participates in quorum counting.
    /// Delegations change eligibility, never the tally.
    pub fn is_vote(&self) -> bool {
        matches!(self.action, DecisionAction::Approve | DecisionAction::Reject)
    }
}

// ── Decision Action ──────────────────────────────────────────────────

/// What the approver did
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionAction {
    Approve,
    Reject,
    /// Hand this approver's slot to someone else for the level
    Delegate,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Delegate => "delegate",
        }
    }
}

impl std::fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Decision Origin ──────────────────────────────────────────────────

/// Who produced the decision
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DecisionOrigin {
    /// A human (or service) approver acting on their own slot
    #[default]
    Approver,
    /// The timeout scheduler, on behalf of a configured timeout action
    System,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_decisions_carry_system_identity() {
        let d = Decision::system(2, DecisionAction::Approve, "deadline passed");
        assert!(d.is_system());
        assert!(d.approver.is_system());
        assert!(d.comment.is_some());
    }

    #[test]
    fn delegations_are_not_votes() {
        let d = Decision::new(1, ApproverId::new("u-1"), DecisionAction::Delegate)
            .with_delegate(ApproverId::new("u-2"));
        assert!(!d.is_vote());
        assert!(Decision::new(1, ApproverId::new("u-1"), DecisionAction::Approve).is_vote());
    }
}
