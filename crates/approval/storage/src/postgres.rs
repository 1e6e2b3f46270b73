//! PostgreSQL adapter for approval storage.
//!
//! This adapter is the transactional source-of-truth backend. Instances are
//! stored as JSONB aggregates with a handful of denormalized columns for
//! filtering; the one-open-instance-per-subject rule is enforced by a
//! partial unique index, and optimistic concurrency by a version column.

use crate::model::{compute_audit_hash, StoredInstance};
use crate::traits::{AuditStore, InstanceStore, QueryWindow};
use crate::{StorageError, StorageResult};
use approval_types::{
    ApprovalInstance, ApproverId, AuditEvent, AuditKind, AuditRecord, InstanceId, InstanceStatus,
    SubjectRef, TenantId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Acquire, Row};
use uuid::Uuid;

/// PostgreSQL-backed approval storage adapter.
#[derive(Clone)]
pub struct PostgresApprovalStore {
    pool: PgPool,
}

impl PostgresApprovalStore {
    /// Connect to PostgreSQL and initialize required schema.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS approval_instances (
                instance_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                subject_type TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                status TEXT NOT NULL,
                current_level BIGINT,
                current_due_at TIMESTAMPTZ,
                body JSONB NOT NULL,
                version BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS approval_instances_open_subject
                ON approval_instances (tenant_id, subject_type, subject_id)
                WHERE status = 'pending'
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS approval_instances_due
                ON approval_instances (current_due_at)
                WHERE status = 'pending'
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS approval_audit_events (
                event_id TEXT PRIMARY KEY,
                sequence BIGINT NOT NULL UNIQUE,
                timestamp TIMESTAMPTZ NOT NULL,
                actor TEXT NOT NULL,
                kind TEXT NOT NULL,
                instance_id TEXT NOT NULL,
                level BIGINT,
                message TEXT NOT NULL,
                payload JSONB NOT NULL,
                previous_hash TEXT,
                hash TEXT NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS approval_audit_events_instance
                ON approval_audit_events (instance_id, sequence)
            "#,
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl InstanceStore for PostgresApprovalStore {
    async fn create_instance(&self, instance: &ApprovalInstance) -> StorageResult<()> {
        let body = serde_json::to_value(instance)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO approval_instances
                (instance_id, tenant_id, subject_type, subject_id, status, current_level, current_due_at, body, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1, $9, $10)
            "#,
        )
        .bind(instance.id.0.clone())
        .bind(instance.tenant_id().0.clone())
        .bind(instance.subject.subject_type.clone())
        .bind(instance.subject.subject_id.clone())
        .bind(instance.status.as_str())
        .bind(instance.current_level.map(i64::from))
        .bind(instance.current_due_at())
        .bind(body)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;

        Ok(())
    }

    async fn load_instance(&self, id: &InstanceId) -> StorageResult<StoredInstance> {
        let row = sqlx::query(
            "SELECT body, version FROM approval_instances WHERE instance_id = $1",
        )
        .bind(id.0.clone())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        match row {
            Some(row) => instance_row_to_stored(row),
            None => Err(StorageError::NotFound(format!("instance {} not found", id))),
        }
    }

    async fn save_instance(
        &self,
        instance: &ApprovalInstance,
        expected_version: u64,
    ) -> StorageResult<u64> {
        let body = serde_json::to_value(instance)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let row = sqlx::query(
            r#"
            UPDATE approval_instances
               SET body = $1,
                   status = $2,
                   current_level = $3,
                   current_due_at = $4,
                   updated_at = $5,
                   version = version + 1
             WHERE instance_id = $6
               AND version = $7
            RETURNING version
            "#,
        )
        .bind(body)
        .bind(instance.status.as_str())
        .bind(instance.current_level.map(i64::from))
        .bind(instance.current_due_at())
        .bind(instance.updated_at)
        .bind(instance.id.0.clone())
        .bind(to_i64(expected_version)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        if let Some(row) = row {
            let version: i64 = row
                .try_get("version")
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            return Ok(version as u64);
        }

        // Zero rows: missing instance or a lost compare-and-set.
        let found = sqlx::query("SELECT version FROM approval_instances WHERE instance_id = $1")
            .bind(instance.id.0.clone())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        match found {
            Some(row) => {
                let version: i64 = row
                    .try_get("version")
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
                Err(StorageError::VersionConflict {
                    expected: expected_version,
                    found: version as u64,
                })
            }
            None => Err(StorageError::NotFound(format!(
                "instance {} not found",
                instance.id
            ))),
        }
    }

    async fn list_instances(
        &self,
        tenant: Option<&TenantId>,
        status: Option<InstanceStatus>,
        window: QueryWindow,
    ) -> StorageResult<Vec<StoredInstance>> {
        let tenant_filter = tenant.map(|t| t.0.clone());
        let status_filter = status.map(|s| s.as_str().to_string());

        let rows = if window.limit == 0 {
            sqlx::query(
                r#"
                SELECT body, version FROM approval_instances
                 WHERE ($1::TEXT IS NULL OR tenant_id = $1)
                   AND ($2::TEXT IS NULL OR status = $2)
                 ORDER BY created_at DESC
                 OFFSET $3
                "#,
            )
            .bind(tenant_filter)
            .bind(status_filter)
            .bind(to_i64(window.offset as u64)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        } else {
            sqlx::query(
                r#"
                SELECT body, version FROM approval_instances
                 WHERE ($1::TEXT IS NULL OR tenant_id = $1)
                   AND ($2::TEXT IS NULL OR status = $2)
                 ORDER BY created_at DESC
                 LIMIT $3 OFFSET $4
                "#,
            )
            .bind(tenant_filter)
            .bind(status_filter)
            .bind(to_i64(window.limit as u64)?)
            .bind(to_i64(window.offset as u64)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        };

        rows.into_iter().map(instance_row_to_stored).collect()
    }

    async fn list_due_instances(
        &self,
        now: DateTime<Utc>,
        window: QueryWindow,
    ) -> StorageResult<Vec<StoredInstance>> {
        let rows = if window.limit == 0 {
            sqlx::query(
                r#"
                SELECT body, version FROM approval_instances
                 WHERE status = 'pending'
                   AND current_due_at IS NOT NULL
                   AND current_due_at <= $1
                 ORDER BY current_due_at ASC
                 OFFSET $2
                "#,
            )
            .bind(now)
            .bind(to_i64(window.offset as u64)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        } else {
            sqlx::query(
                r#"
                SELECT body, version FROM approval_instances
                 WHERE status = 'pending'
                   AND current_due_at IS NOT NULL
                   AND current_due_at <= $1
                 ORDER BY current_due_at ASC
                 LIMIT $2 OFFSET $3
                "#,
            )
            .bind(now)
            .bind(to_i64(window.limit as u64)?)
            .bind(to_i64(window.offset as u64)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        };

        rows.into_iter().map(instance_row_to_stored).collect()
    }

    async fn find_open_by_subject(
        &self,
        tenant: &TenantId,
        subject: &SubjectRef,
    ) -> StorageResult<Option<StoredInstance>> {
        let row = sqlx::query(
            r#"
            SELECT body, version FROM approval_instances
             WHERE tenant_id = $1
               AND subject_type = $2
               AND subject_id = $3
               AND status = 'pending'
            "#,
        )
        .bind(tenant.0.clone())
        .bind(subject.subject_type.clone())
        .bind(subject.subject_id.clone())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(instance_row_to_stored).transpose()
    }
}

#[async_trait]
impl AuditStore for PostgresApprovalStore {
    async fn append_audit(&self, event: AuditEvent) -> StorageResult<AuditRecord> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let conn = tx
            .acquire()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        sqlx::query("LOCK TABLE approval_audit_events IN EXCLUSIVE MODE")
            .execute(&mut *conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let last = sqlx::query(
            "SELECT sequence, hash FROM approval_audit_events ORDER BY sequence DESC LIMIT 1",
        )
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        let (sequence, previous_hash) = if let Some(row) = last {
            let seq: i64 = row
                .try_get("sequence")
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            let prev: String = row
                .try_get("hash")
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            (seq + 1, Some(prev))
        } else {
            (1_i64, None)
        };

        let hash = compute_audit_hash(&event, previous_hash.as_deref(), sequence as u64)?;
        let event_id = format!("audit-{}", Uuid::new_v4());

        sqlx::query(
            r#"
            INSERT INTO approval_audit_events
                (event_id, sequence, timestamp, actor, kind, instance_id, level, message, payload, previous_hash, hash)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(event_id.clone())
        .bind(sequence)
        .bind(event.timestamp)
        .bind(event.actor.0.clone())
        .bind(event.kind.as_str())
        .bind(event.instance_id.0.clone())
        .bind(event.level.map(i64::from))
        .bind(event.message.clone())
        .bind(event.payload.clone())
        .bind(previous_hash.clone())
        .bind(hash.clone())
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(AuditRecord {
            event_id,
            sequence: sequence as u64,
            timestamp: event.timestamp,
            actor: event.actor,
            kind: event.kind,
            instance_id: event.instance_id,
            level: event.level,
            message: event.message,
            payload: event.payload,
            previous_hash,
            hash,
        })
    }

    async fn list_audit(
        &self,
        instance_id: &InstanceId,
        window: QueryWindow,
    ) -> StorageResult<Vec<AuditRecord>> {
        let rows = if window.limit == 0 {
            sqlx::query(
                r#"
                SELECT event_id, sequence, timestamp, actor, kind, instance_id, level, message, payload, previous_hash, hash
                  FROM approval_audit_events
                 WHERE instance_id = $1
                 ORDER BY sequence ASC
                 OFFSET $2
                "#,
            )
            .bind(instance_id.0.clone())
            .bind(to_i64(window.offset as u64)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        } else {
            sqlx::query(
                r#"
                SELECT event_id, sequence, timestamp, actor, kind, instance_id, level, message, payload, previous_hash, hash
                  FROM approval_audit_events
                 WHERE instance_id = $1
                 ORDER BY sequence ASC
                 LIMIT $2 OFFSET $3
                "#,
            )
            .bind(instance_id.0.clone())
            .bind(to_i64(window.limit as u64)?)
            .bind(to_i64(window.offset as u64)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        };

        rows.into_iter().map(audit_row_to_record).collect()
    }

    async fn latest_audit_hash(&self) -> StorageResult<Option<String>> {
        let row =
            sqlx::query("SELECT hash FROM approval_audit_events ORDER BY sequence DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(row
            .map(|r| r.try_get::<String, _>("hash"))
            .transpose()
            .map_err(|e| StorageError::Backend(e.to_string()))?)
    }
}

fn instance_row_to_stored(row: sqlx::postgres::PgRow) -> StorageResult<StoredInstance> {
    let body: serde_json::Value = row
        .try_get("body")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let instance: ApprovalInstance =
        serde_json::from_value(body).map_err(|e| StorageError::Serialization(e.to_string()))?;
    let version: i64 = row
        .try_get("version")
        .map_err(|e| StorageError::Backend(e.to_string()))?;

    Ok(StoredInstance {
        instance,
        version: version as u64,
    })
}

fn audit_row_to_record(row: sqlx::postgres::PgRow) -> StorageResult<AuditRecord> {
    let kind_raw: String = row
        .try_get("kind")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let kind = AuditKind::parse(&kind_raw)
        .ok_or_else(|| StorageError::Serialization(format!("unknown audit kind `{kind_raw}`")))?;
    let sequence: i64 = row
        .try_get("sequence")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let level: Option<i64> = row
        .try_get("level")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let level = level
        .map(|l| {
            u32::try_from(l)
                .map_err(|_| StorageError::Serialization(format!("level {l} out of range")))
        })
        .transpose()?;
    let actor: String = row
        .try_get("actor")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let instance_id: String = row
        .try_get("instance_id")
        .map_err(|e| StorageError::Backend(e.to_string()))?;

    Ok(AuditRecord {
        event_id: row
            .try_get("event_id")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        sequence: sequence as u64,
        timestamp: row
            .try_get("timestamp")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        actor: ApproverId::new(actor),
        kind,
        instance_id: InstanceId::new(instance_id),
        level,
        message: row
            .try_get("message")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        payload: row
            .try_get("payload")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        previous_hash: row
            .try_get("previous_hash")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        hash: row
            .try_get("hash")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
    })
}

fn map_sqlx_conflict(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StorageError::Conflict(db_err.message().to_string());
        }
    }
    StorageError::Backend(err.to_string())
}

fn to_i64(value: u64) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::InvalidInput("value too large for bigint".to_string()))
}
