use crate::{StorageError, StorageResult};
use approval_types::{ApprovalInstance, AuditEvent};
use serde::{Deserialize, Serialize};

/// An instance as persisted, with its optimistic-concurrency version.
///
/// Versions start at 1 on create and increment on every successful save;
/// `save_instance` succeeds only when the caller presents the version it
/// loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredInstance {
    pub instance: ApprovalInstance,
    pub version: u64,
}

/// Canonical hash over an audit event, its sequence, and its predecessor's
/// hash. Every adapter chains records with this exact form, so a trail
/// written by one backend verifies against another.
pub(crate) fn compute_audit_hash(
    event: &AuditEvent,
    previous_hash: Option<&str>,
    sequence: u64,
) -> StorageResult<String> {
    let serializable = serde_json::json!({
        "previous_hash": previous_hash,
        "sequence": sequence,
        "timestamp": event.timestamp,
        "actor": event.actor,
        "kind": event.kind.as_str(),
        "instance_id": event.instance_id,
        "level": event.level,
        "message": event.message,
        "payload": event.payload,
    });
    let serialized = serde_json::to_vec(&serializable)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(blake3::hash(&serialized).to_hex().to_string())
}
