//! Approval instances: running executions of workflow definitions.
//!
//! An ApprovalInstance embeds a full snapshot of its definition and
//! approval context at creation time, so template edits and subject drift
//! never change an in-flight chain. All mutation goes through methods here;
//! the engine orchestrates which method fires when.

use crate::{
    ApprovalContext, ApproverId, Decision, DecisionAction, InstanceId, SubjectRef, TenantId,
    WorkflowDefinition,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Approval Instance ────────────────────────────────────────────────

/// A running (or finished) approval chain for one subject
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalInstance {
    /// Unique instance identifier
    pub id: InstanceId,
    /// Immutable snapshot of the definition this instance runs
    pub definition: WorkflowDefinition,
    /// The business object awaiting approval
    pub subject: SubjectRef,
    /// Snapshot of requester identity and subject attributes at creation
    pub context: ApprovalContext,
    /// Current lifecycle status
    pub status: InstanceStatus,
    /// The level currently collecting decisions, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_level: Option<u32>,
    /// Per-level runtime state, one entry per definition level, in order
    pub levels: Vec<LevelState>,
    /// Every decision recorded against this instance
    pub decisions: Vec<Decision>,
    /// When the instance was created
    pub created_at: DateTime<Utc>,
    /// When the instance was last updated
    pub updated_at: DateTime<Utc>,
    /// When the instance reached a terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ApprovalInstance {
    /// Create a new pending instance. Level states start untouched; the
    /// engine enters the first applicable level.
    pub fn new(definition: WorkflowDefinition, subject: SubjectRef, context: ApprovalContext) -> Self {
        let now = Utc::now();
        let levels = definition
            .levels
            .iter()
            .map(|l| LevelState::new(l.level))
            .collect();
        Self {
            id: InstanceId::generate(),
            definition,
            subject,
            context,
            status: InstanceStatus::Pending,
            current_level: None,
            levels,
            decisions: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Enter (or re-enter) a level: it becomes the current level with a
    /// fresh state. Prior decisions for the level are cleared, so a
    /// return-to-level restart votes from scratch.
    pub fn enter_level(&mut self, level: u32, due_at: Option<DateTime<Utc>>) {
        let now = Utc::now();
        self.decisions.retain(|d| d.level != level);
        if let Some(state) = self.level_state_mut(level) {
            *state = LevelState {
                level,
                status: LevelStatus::Pending,
                entered_at: Some(now),
                due_at,
                resolved_at: None,
                escalation_rounds: 0,
                due_extensions: 0,
            };
        }
        self.current_level = Some(level);
        self.updated_at = now;
    }

    /// Record a decision. An earlier decision by the same approver at the
    /// same level is replaced and returned.
    pub fn record_decision(&mut self, decision: Decision) -> Option<Decision> {
        let replaced = self
            .decisions
            .iter()
            .position(|d| d.level == decision.level && d.approver == decision.approver)
            .map(|idx| self.decisions.remove(idx));
        self.decisions.push(decision);
        self.updated_at = Utc::now();
        replaced
    }

    /// Mark a level satisfied
    pub fn satisfy_level(&mut self, level: u32) {
        self.resolve_level(level, LevelStatus::Satisfied);
    }

    /// Mark a level rejected
    pub fn reject_level(&mut self, level: u32) {
        self.resolve_level(level, LevelStatus::Rejected);
    }

    /// Mark a level skipped (entry conditions not met)
    pub fn skip_level(&mut self, level: u32) {
        self.resolve_level(level, LevelStatus::Skipped);
    }

    fn resolve_level(&mut self, level: u32, status: LevelStatus) {
        let now = Utc::now();
        if let Some(state) = self.level_state_mut(level) {
            state.status = status;
            state.resolved_at = Some(now);
        }
        self.updated_at = now;
    }

    /// Push a level's deadline out after an escalation
    pub fn extend_level_due(&mut self, level: u32, due_at: DateTime<Utc>) {
        if let Some(state) = self.level_state_mut(level) {
            state.due_at = Some(due_at);
            state.due_extensions += 1;
        }
        self.updated_at = Utc::now();
    }

    /// Count an escalation round against a level
    pub fn mark_escalated(&mut self, level: u32) {
        if let Some(state) = self.level_state_mut(level) {
            state.escalation_rounds += 1;
        }
        self.updated_at = Utc::now();
    }

    /// Conclude the instance as approved
    pub fn approve(&mut self) {
        self.conclude(InstanceStatus::Approved);
    }

    /// Conclude the instance as rejected
    pub fn reject(&mut self) {
        self.conclude(InstanceStatus::Rejected);
    }

    /// Conclude the instance as cancelled
    pub fn cancel(&mut self) {
        self.conclude(InstanceStatus::Cancelled);
    }

    fn conclude(&mut self, status: InstanceStatus) {
        let now = Utc::now();
        self.status = status;
        self.current_level = None;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    // ── Query methods ────────────────────────────────────────────────

    pub fn tenant_id(&self) -> &TenantId {
        &self.context.tenant_id
    }

    pub fn is_pending(&self) -> bool {
        self.status == InstanceStatus::Pending
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn level_state(&self, level: u32) -> Option<&LevelState> {
        self.levels.iter().find(|s| s.level == level)
    }

    fn level_state_mut(&mut self, level: u32) -> Option<&mut LevelState> {
        self.levels.iter_mut().find(|s| s.level == level)
    }

    /// State of the level currently collecting decisions
    pub fn current_level_state(&self) -> Option<&LevelState> {
        self.current_level.and_then(|l| self.level_state(l))
    }

    /// All decisions recorded at a level, in submission order
    pub fn decisions_for(&self, level: u32) -> Vec<&Decision> {
        self.decisions.iter().filter(|d| d.level == level).collect()
    }

    /// The active decision of one approver at a level, if any
    pub fn decision_by(&self, level: u32, approver: &ApproverId) -> Option<&Decision> {
        self.decisions
            .iter()
            .find(|d| d.level == level && &d.approver == approver)
    }

    /// Delegations recorded at a level, in submission order
    pub fn delegations_for(&self, level: u32) -> Vec<&Decision> {
        self.decisions
            .iter()
            .filter(|d| d.level == level && d.action == DecisionAction::Delegate)
            .collect()
    }

    /// The current level's deadline, if one is set
    pub fn current_due_at(&self) -> Option<DateTime<Utc>> {
        self.current_level_state().and_then(|s| s.due_at)
    }

    /// Whether the current level's deadline has passed
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_pending()
            && self
                .current_level_state()
                .map(|s| s.is_overdue(now))
                .unwrap_or(false)
    }

    /// Compact projection for list views.
    ///
    /// `pending_approvers` needs the identity directory and stays empty
    /// here; the engine's summary query fills it in.
    pub fn summary(&self) -> ApprovalSummary {
        let current = self.current_level_state();
        ApprovalSummary {
            instance_id: self.id.clone(),
            subject: self.subject.clone(),
            tenant_id: self.tenant_id().clone(),
            definition_name: self.definition.name.clone(),
            status: self.status,
            current_level: self.current_level,
            current_level_name: self
                .current_level
                .and_then(|l| self.definition.level(l))
                .map(|l| l.name.clone()),
            levels_total: self.levels.len(),
            levels_resolved: self
                .levels
                .iter()
                .filter(|s| s.status != LevelStatus::Pending)
                .count(),
            pending_approvers: Vec::new(),
            due_at: current.and_then(|s| s.due_at),
            overdue: self.is_overdue(Utc::now()),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

// ── Instance Status ──────────────────────────────────────────────────

/// Lifecycle status of an approval instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InstanceStatus {
    /// Collecting decisions
    #[default]
    Pending,
    /// Every applicable level satisfied
    Approved,
    /// A level rejected with a terminal reject action
    Rejected,
    /// Withdrawn by the requester or an administrator
    Cancelled,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Level State ──────────────────────────────────────────────────────

/// Runtime state of one level within an instance
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LevelState {
    /// Level number, matching the definition
    pub level: u32,
    pub status: LevelStatus,
    /// When the level was (last) entered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entered_at: Option<DateTime<Utc>>,
    /// Deadline computed at entry from the level's timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    /// When the level reached a terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// How many escalation rounds have fired for this entry
    pub escalation_rounds: u32,
    /// How many times the deadline was extended for this entry
    pub due_extensions: u32,
}

impl LevelState {
    pub fn new(level: u32) -> Self {
        Self {
            level,
            status: LevelStatus::Pending,
            entered_at: None,
            due_at: None,
            resolved_at: None,
            escalation_rounds: 0,
            due_extensions: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == LevelStatus::Pending
    }

    /// An entered, still-pending level past its deadline
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.due_at.map(|due| now >= due).unwrap_or(false)
    }
}

/// Status of a level within an instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LevelStatus {
    /// Waiting for decisions (or not yet entered)
    #[default]
    Pending,
    /// Quorum reached; the chain moved on
    Satisfied,
    /// Quorum failed
    Rejected,
    /// Entry conditions not met; level bypassed
    Skipped,
}

// ── Approval Summary ─────────────────────────────────────────────────

/// Read-model projection of an instance for list views and dashboards
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalSummary {
    pub instance_id: InstanceId,
    pub subject: SubjectRef,
    pub tenant_id: TenantId,
    pub definition_name: String,
    pub status: InstanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_level_name: Option<String>,
    pub levels_total: usize,
    pub levels_resolved: usize,
    /// Approvers still expected to act on the current level
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_approvers: Vec<ApproverId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    /// Whether the current level is past its deadline
    #[serde(default)]
    pub overdue: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ApprovalMode, ApproverId, ApproverSpec, LevelDefinition};
    use chrono::Duration;

    fn make_instance() -> ApprovalInstance {
        let mut def = WorkflowDefinition::new("Purchase approval");
        def.add_level(LevelDefinition::new(
            1,
            "Manager",
            ApproverSpec::users(["mgr-1"]),
            ApprovalMode::Any,
        ))
        .unwrap();
        def.add_level(LevelDefinition::new(
            2,
            "Finance",
            ApproverSpec::role("finance"),
            ApprovalMode::All,
        ))
        .unwrap();
        let ctx = ApprovalContext::new(TenantId::new("t-1"), ApproverId::new("req-1"));
        ApprovalInstance::new(def, SubjectRef::new("purchase", "po-77"), ctx)
    }

    #[test]
    fn new_instance_starts_pending_with_untouched_levels() {
        let inst = make_instance();
        assert_eq!(inst.status, InstanceStatus::Pending);
        assert!(inst.current_level.is_none());
        assert_eq!(inst.levels.len(), 2);
        assert!(inst.levels.iter().all(|l| l.is_pending() && l.entered_at.is_none()));
    }

    #[test]
    fn enter_level_sets_current_and_deadline() {
        let mut inst = make_instance();
        let due = Utc::now() + Duration::hours(4);
        inst.enter_level(1, Some(due));
        assert_eq!(inst.current_level, Some(1));
        let state = inst.level_state(1).unwrap();
        assert!(state.entered_at.is_some());
        assert_eq!(state.due_at, Some(due));
    }

    #[test]
    fn reentry_clears_decisions_and_counters() {
        let mut inst = make_instance();
        inst.enter_level(1, None);
        inst.record_decision(Decision::new(
            1,
            ApproverId::new("mgr-1"),
            DecisionAction::Approve,
        ));
        inst.mark_escalated(1);
        inst.satisfy_level(1);

        inst.enter_level(1, None);
        assert!(inst.decisions_for(1).is_empty());
        let state = inst.level_state(1).unwrap();
        assert!(state.is_pending());
        assert_eq!(state.escalation_rounds, 0);
        assert!(state.resolved_at.is_none());
    }

    #[test]
    fn resubmission_replaces_earlier_decision() {
        let mut inst = make_instance();
        inst.enter_level(1, None);
        let approver = ApproverId::new("mgr-1");
        inst.record_decision(Decision::new(1, approver.clone(), DecisionAction::Reject));
        let replaced = inst.record_decision(Decision::new(
            1,
            approver.clone(),
            DecisionAction::Approve,
        ));

        assert!(replaced.is_some());
        assert_eq!(inst.decisions_for(1).len(), 1);
        assert_eq!(
            inst.decision_by(1, &approver).unwrap().action,
            DecisionAction::Approve
        );
    }

    #[test]
    fn conclude_sets_completed_at_and_clears_current_level() {
        let mut inst = make_instance();
        inst.enter_level(1, None);
        inst.satisfy_level(1);
        inst.approve();

        assert!(inst.is_terminal());
        assert!(inst.completed_at.is_some());
        assert!(inst.current_level.is_none());
    }

    #[test]
    fn overdue_tracks_current_level_deadline() {
        let mut inst = make_instance();
        let now = Utc::now();
        inst.enter_level(1, Some(now - Duration::hours(1)));
        assert!(inst.is_overdue(now));

        inst.extend_level_due(1, now + Duration::hours(4));
        assert!(!inst.is_overdue(now));
        assert_eq!(inst.level_state(1).unwrap().due_extensions, 1);
    }

    #[test]
    fn summary_counts_resolved_levels() {
        let mut inst = make_instance();
        inst.enter_level(1, None);
        inst.satisfy_level(1);
        inst.enter_level(2, None);

        let summary = inst.summary();
        assert_eq!(summary.levels_total, 2);
        assert_eq!(summary.levels_resolved, 1);
        assert_eq!(summary.current_level, Some(2));
        assert_eq!(summary.current_level_name.as_deref(), Some("Finance"));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            InstanceStatus::Pending,
            InstanceStatus::Approved,
            InstanceStatus::Rejected,
            InstanceStatus::Cancelled,
        ] {
            assert_eq!(InstanceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(InstanceStatus::parse("bogus"), None);
    }
}
