//! In-memory reference implementation of the approval storage traits.
//!
//! Deterministic, dependency-free, and fast enough for tests and demos.
//! Anything that must survive a restart belongs on a transactional
//! backend such as the PostgreSQL adapter instead.

use crate::model::{compute_audit_hash, StoredInstance};
use crate::traits::{AuditStore, InstanceStore, QueryWindow};
use crate::{StorageError, StorageResult};
use approval_types::{
    ApprovalInstance, AuditEvent, AuditRecord, InstanceId, InstanceStatus, SubjectRef, TenantId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// In-memory approval storage adapter.
#[derive(Default)]
pub struct MemoryApprovalStore {
    instances: RwLock<HashMap<InstanceId, StoredInstance>>,
    audits: RwLock<Vec<AuditRecord>>,
}

impl MemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStore for MemoryApprovalStore {
    async fn create_instance(&self, instance: &ApprovalInstance) -> StorageResult<()> {
        let mut guard = self
            .instances
            .write()
            .map_err(|_| StorageError::Backend("instances lock poisoned".to_string()))?;

        if guard.contains_key(&instance.id) {
            return Err(StorageError::Conflict(format!(
                "instance {} already exists",
                instance.id
            )));
        }
        let open_exists = guard.values().any(|stored| {
            stored.instance.is_pending()
                && stored.instance.tenant_id() == instance.tenant_id()
                && stored.instance.subject == instance.subject
        });
        if open_exists {
            return Err(StorageError::Conflict(format!(
                "subject {} already has an open approval",
                instance.subject
            )));
        }

        guard.insert(
            instance.id.clone(),
            StoredInstance {
                instance: instance.clone(),
                version: 1,
            },
        );
        Ok(())
    }

    async fn load_instance(&self, id: &InstanceId) -> StorageResult<StoredInstance> {
        let guard = self
            .instances
            .read()
            .map_err(|_| StorageError::Backend("instances lock poisoned".to_string()))?;
        guard
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("instance {} not found", id)))
    }

    async fn save_instance(
        &self,
        instance: &ApprovalInstance,
        expected_version: u64,
    ) -> StorageResult<u64> {
        let mut guard = self
            .instances
            .write()
            .map_err(|_| StorageError::Backend("instances lock poisoned".to_string()))?;
        let stored = guard
            .get_mut(&instance.id)
            .ok_or_else(|| StorageError::NotFound(format!("instance {} not found", instance.id)))?;

        if stored.version != expected_version {
            return Err(StorageError::VersionConflict {
                expected: expected_version,
                found: stored.version,
            });
        }

        stored.instance = instance.clone();
        stored.version += 1;
        Ok(stored.version)
    }

    async fn list_instances(
        &self,
        tenant: Option<&TenantId>,
        status: Option<InstanceStatus>,
        window: QueryWindow,
    ) -> StorageResult<Vec<StoredInstance>> {
        let guard = self
            .instances
            .read()
            .map_err(|_| StorageError::Backend("instances lock poisoned".to_string()))?;
        let mut values = guard
            .values()
            .filter(|stored| tenant.map_or(true, |t| stored.instance.tenant_id() == t))
            .filter(|stored| status.map_or(true, |s| stored.instance.status == s))
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| b.instance.created_at.cmp(&a.instance.created_at));
        Ok(apply_window(values, window))
    }

    async fn list_due_instances(
        &self,
        now: DateTime<Utc>,
        window: QueryWindow,
    ) -> StorageResult<Vec<StoredInstance>> {
        let guard = self
            .instances
            .read()
            .map_err(|_| StorageError::Backend("instances lock poisoned".to_string()))?;
        let mut values = guard
            .values()
            .filter(|stored| stored.instance.is_overdue(now))
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by_key(|stored| stored.instance.current_due_at());
        Ok(apply_window(values, window))
    }

    async fn find_open_by_subject(
        &self,
        tenant: &TenantId,
        subject: &SubjectRef,
    ) -> StorageResult<Option<StoredInstance>> {
        let guard = self
            .instances
            .read()
            .map_err(|_| StorageError::Backend("instances lock poisoned".to_string()))?;
        Ok(guard
            .values()
            .find(|stored| {
                stored.instance.is_pending()
                    && stored.instance.tenant_id() == tenant
                    && &stored.instance.subject == subject
            })
            .cloned())
    }
}

#[async_trait]
impl AuditStore for MemoryApprovalStore {
    async fn append_audit(&self, event: AuditEvent) -> StorageResult<AuditRecord> {
        let mut guard = self
            .audits
            .write()
            .map_err(|_| StorageError::Backend("audit lock poisoned".to_string()))?;

        let previous_hash = guard.last().map(|e| e.hash.clone());
        let sequence = guard.len() as u64 + 1;
        let hash = compute_audit_hash(&event, previous_hash.as_deref(), sequence)?;

        let record = AuditRecord {
            event_id: format!("audit-{}", Uuid::new_v4()),
            sequence,
            timestamp: event.timestamp,
            actor: event.actor,
            kind: event.kind,
            instance_id: event.instance_id,
            level: event.level,
            message: event.message,
            payload: event.payload,
            previous_hash,
            hash,
        };

        guard.push(record.clone());
        Ok(record)
    }

    async fn list_audit(
        &self,
        instance_id: &InstanceId,
        window: QueryWindow,
    ) -> StorageResult<Vec<AuditRecord>> {
        let guard = self
            .audits
            .read()
            .map_err(|_| StorageError::Backend("audit lock poisoned".to_string()))?;
        let values = guard
            .iter()
            .filter(|record| &record.instance_id == instance_id)
            .cloned()
            .collect::<Vec<_>>();
        Ok(apply_window(values, window))
    }

    async fn latest_audit_hash(&self) -> StorageResult<Option<String>> {
        let guard = self
            .audits
            .read()
            .map_err(|_| StorageError::Backend("audit lock poisoned".to_string()))?;
        Ok(guard.last().map(|e| e.hash.clone()))
    }
}

fn apply_window<T>(items: Vec<T>, window: QueryWindow) -> Vec<T> {
    let iter = items.into_iter().skip(window.offset);
    if window.limit == 0 {
        iter.collect()
    } else {
        iter.take(window.limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approval_types::{
        ApprovalContext, ApprovalMode, ApproverId, ApproverSpec, AuditKind, Decision,
        DecisionAction, LevelDefinition, WorkflowDefinition,
    };
    use chrono::Duration;

    fn make_instance(subject_id: &str) -> ApprovalInstance {
        let mut def = WorkflowDefinition::new("Expense approval");
        def.add_level(LevelDefinition::new(
            1,
            "Manager",
            ApproverSpec::users(["mgr-1"]),
            ApprovalMode::Any,
        ))
        .unwrap();
        let ctx = ApprovalContext::new(TenantId::new("t-1"), ApproverId::new("req-1"));
        ApprovalInstance::new(def, SubjectRef::new("expense", subject_id), ctx)
    }

    #[tokio::test]
    async fn create_then_load_round_trips_at_version_one() {
        let store = MemoryApprovalStore::new();
        let instance = make_instance("exp-1");
        store.create_instance(&instance).await.unwrap();

        let stored = store.load_instance(&instance.id).await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.instance.subject, instance.subject);
    }

    #[tokio::test]
    async fn second_open_instance_for_subject_is_rejected() {
        let store = MemoryApprovalStore::new();
        let first = make_instance("exp-1");
        store.create_instance(&first).await.unwrap();

        let duplicate = make_instance("exp-1");
        let result = store.create_instance(&duplicate).await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));

        // Concluding the first frees the subject for a new chain.
        let mut concluded = first.clone();
        concluded.approve();
        store.save_instance(&concluded, 1).await.unwrap();
        store.create_instance(&duplicate).await.unwrap();
    }

    #[tokio::test]
    async fn save_enforces_expected_version() {
        let store = MemoryApprovalStore::new();
        let mut instance = make_instance("exp-2");
        store.create_instance(&instance).await.unwrap();

        instance.enter_level(1, None);
        let version = store.save_instance(&instance, 1).await.unwrap();
        assert_eq!(version, 2);

        let stale = store.save_instance(&instance, 1).await;
        assert!(matches!(
            stale,
            Err(StorageError::VersionConflict {
                expected: 1,
                found: 2
            })
        ));
    }

    #[tokio::test]
    async fn reloaded_aggregate_keeps_its_position_and_votes() {
        let store = MemoryApprovalStore::new();
        let mut def = WorkflowDefinition::new("Expense approval");
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
        let mut instance = ApprovalInstance::new(def, SubjectRef::new("expense", "exp-9"), ctx);
        store.create_instance(&instance).await.unwrap();

        instance.enter_level(1, None);
        instance.record_decision(Decision::new(
            1,
            ApproverId::new("mgr-1"),
            DecisionAction::Approve,
        ));
        instance.satisfy_level(1);
        instance.enter_level(2, Some(Utc::now() + Duration::hours(8)));
        store.save_instance(&instance, 1).await.unwrap();

        let stored = store.load_instance(&instance.id).await.unwrap();
        assert_eq!(stored.instance.current_level, Some(2));
        assert_eq!(stored.instance.status, InstanceStatus::Pending);
        assert_eq!(stored.instance.decisions_for(1).len(), 1);

        // The postgres adapter persists this same aggregate as JSON.
        let json = serde_json::to_string(&stored.instance).unwrap();
        let thawed: ApprovalInstance = serde_json::from_str(&json).unwrap();
        assert_eq!(thawed.current_level, stored.instance.current_level);
        assert_eq!(thawed.status, stored.instance.status);
        assert_eq!(thawed.decisions_for(1).len(), 1);
        assert_eq!(thawed.current_due_at(), stored.instance.current_due_at());
    }

    #[tokio::test]
    async fn due_listing_returns_overdue_pending_only() {
        let store = MemoryApprovalStore::new();
        let now = Utc::now();

        let mut overdue = make_instance("exp-3");
        overdue.enter_level(1, Some(now - Duration::hours(1)));
        store.create_instance(&overdue).await.unwrap();

        let mut on_time = make_instance("exp-4");
        on_time.enter_level(1, Some(now + Duration::hours(4)));
        store.create_instance(&on_time).await.unwrap();

        let due = store
            .list_due_instances(now, QueryWindow::default())
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].instance.id, overdue.id);
    }

    #[tokio::test]
    async fn audit_chain_hashes_are_linked() {
        let store = MemoryApprovalStore::new();
        let instance_id = InstanceId::new("inst-1");
        let first = store
            .append_audit(AuditEvent::new(
                AuditKind::LevelEntered,
                instance_id.clone(),
                ApproverId::system(),
                "entered level 1",
            ))
            .await
            .unwrap();
        let second = store
            .append_audit(AuditEvent::new(
                AuditKind::DecisionRecorded,
                instance_id.clone(),
                ApproverId::new("u-1"),
                "approved",
            ))
            .await
            .unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(second.previous_hash, Some(first.hash.clone()));
        assert_eq!(
            store.latest_audit_hash().await.unwrap(),
            Some(second.hash.clone())
        );

        let listed = store
            .list_audit(&instance_id, QueryWindow::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].sequence, 1);
    }

    #[tokio::test]
    async fn windows_page_filtered_listings() {
        let store = MemoryApprovalStore::new();
        for i in 0..5 {
            let instance = make_instance(&format!("exp-{}", i));
            store.create_instance(&instance).await.unwrap();
        }

        let page = store
            .list_instances(
                Some(&TenantId::new("t-1")),
                Some(InstanceStatus::Pending),
                QueryWindow {
                    limit: 2,
                    offset: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 2);

        let other_tenant = store
            .list_instances(Some(&TenantId::new("t-9")), None, QueryWindow::default())
            .await
            .unwrap();
        assert!(other_tenant.is_empty());
    }
}
