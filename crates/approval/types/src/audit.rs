//! Append-only audit trail types.
//!
//! Engines emit `AuditEvent`s; the audit store assigns sequence numbers and
//! chains each record to its predecessor by hash, making tampering evident.

use crate::{ApproverId, InstanceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Audit Kind ───────────────────────────────────────────────────────

/// What happened
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditKind {
    /// A level became the current level (first entry or re-entry)
    LevelEntered,
    /// A decision was recorded, including replaced resubmissions
    DecisionRecorded,
    /// A level reached satisfied, rejected, or skipped
    LevelTerminal,
    /// The instance reached approved, rejected, or cancelled
    WorkflowTerminal,
    /// A deadline passed and its timeout action ran
    TimeoutFired,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LevelEntered => "level_entered",
            Self::DecisionRecorded => "decision_recorded",
            Self::LevelTerminal => "level_terminal",
            Self::WorkflowTerminal => "workflow_terminal",
            Self::TimeoutFired => "timeout_fired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "level_entered" => Some(Self::LevelEntered),
            "decision_recorded" => Some(Self::DecisionRecorded),
            "level_terminal" => Some(Self::LevelTerminal),
            "workflow_terminal" => Some(Self::WorkflowTerminal),
            "timeout_fired" => Some(Self::TimeoutFired),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Audit Event ──────────────────────────────────────────────────────

/// Audit append payload. Sequencing and hashes are assigned by storage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    /// Who caused the event; the system identity for scheduler actions
    pub actor: ApproverId,
    pub kind: AuditKind,
    pub instance_id: InstanceId,
    /// The level concerned, absent for workflow-scoped events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    /// Human-readable description
    pub message: String,
    /// Structured details (decision action, quorum counts, deadlines)
    #[serde(default)]
    pub payload: Value,
}

impl AuditEvent {
    pub fn new(
        kind: AuditKind,
        instance_id: InstanceId,
        actor: ApproverId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            actor,
            kind,
            instance_id,
            level: None,
            message: message.into(),
            payload: Value::Null,
        }
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

// ── Audit Record ─────────────────────────────────────────────────────

/// Persistent tamper-evident audit record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_id: String,
    /// Global position in the append-only log, starting at 1
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: ApproverId,
    pub kind: AuditKind,
    pub instance_id: InstanceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    pub message: String,
    pub payload: Value,
    /// Hash of the previous record; `None` only for the first record
    pub previous_hash: Option<String>,
    /// Hash over this record's content and `previous_hash`
    pub hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_round_trips_through_strings() {
        for kind in [
            AuditKind::LevelEntered,
            AuditKind::DecisionRecorded,
            AuditKind::LevelTerminal,
            AuditKind::WorkflowTerminal,
            AuditKind::TimeoutFired,
        ] {
            assert_eq!(AuditKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(AuditKind::parse("unknown"), None);
    }

    #[test]
    fn event_builder_attaches_level_and_payload() {
        let event = AuditEvent::new(
            AuditKind::DecisionRecorded,
            InstanceId::new("inst-1"),
            ApproverId::new("u-1"),
            "approved",
        )
        .with_level(2)
        .with_payload(json!({"action": "approve"}));

        assert_eq!(event.level, Some(2));
        assert_eq!(event.payload["action"], "approve");
    }
}
