use crate::model::StoredInstance;
use crate::StorageResult;
use approval_types::{
    ApprovalInstance, AuditEvent, AuditRecord, InstanceId, InstanceStatus, SubjectRef, TenantId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Generic query window for paged reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

/// Storage interface for approval instances.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Insert a new instance at version 1. Fails with `Conflict` when an
    /// open instance already exists for the same tenant and subject.
    async fn create_instance(&self, instance: &ApprovalInstance) -> StorageResult<()>;

    /// Load an instance with its current version.
    async fn load_instance(&self, id: &InstanceId) -> StorageResult<StoredInstance>;

    /// Compare-and-set save. Succeeds only when the stored version still
    /// equals `expected_version`; returns the new version.
    async fn save_instance(
        &self,
        instance: &ApprovalInstance,
        expected_version: u64,
    ) -> StorageResult<u64>;

    /// List instances newest-first, optionally filtered by tenant and status.
    async fn list_instances(
        &self,
        tenant: Option<&TenantId>,
        status: Option<InstanceStatus>,
        window: QueryWindow,
    ) -> StorageResult<Vec<StoredInstance>>;

    /// List pending instances whose current level deadline is at or before
    /// `now`, oldest deadline first.
    async fn list_due_instances(
        &self,
        now: DateTime<Utc>,
        window: QueryWindow,
    ) -> StorageResult<Vec<StoredInstance>>;

    /// Find the open (pending) instance for a subject, if one exists.
    async fn find_open_by_subject(
        &self,
        tenant: &TenantId,
        subject: &SubjectRef,
    ) -> StorageResult<Option<StoredInstance>>;
}

/// Storage interface for append-only audit events.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append an event and return the canonical, hash-linked stored record.
    async fn append_audit(&self, event: AuditEvent) -> StorageResult<AuditRecord>;

    /// Read one instance's events oldest-first.
    async fn list_audit(
        &self,
        instance_id: &InstanceId,
        window: QueryWindow,
    ) -> StorageResult<Vec<AuditRecord>>;

    /// Get the latest audit hash anchor.
    async fn latest_audit_hash(&self) -> StorageResult<Option<String>>;
}

/// Unified storage bundle the engine runs against.
pub trait ApprovalStore: InstanceStore + AuditStore + Send + Sync {}

impl<T> ApprovalStore for T where T: InstanceStore + AuditStore + Send + Sync {}
