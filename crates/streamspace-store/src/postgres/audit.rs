use crate::error::map_sqlx_error;
use crate::postgres::rows::AuditRow;
use crate::AuditRepository;
use async_trait::async_trait;
use sqlx::PgPool;
use streamspace_types::{audit::AuditEntry, ids::OrgId, Result};

pub struct PgAuditRepo {
    pub pool: PgPool,
}

#[async_trait]
impl AuditRepository for PgAuditRepo {
    async fn append(&self, entry: AuditEntry) -> Result<AuditEntry> {
        sqlx::query_as::<_, AuditRow>(
            "INSERT INTO audit_entries (id, org_id, actor_user_id, action, target_type, target_id,
                timestamp, outcome, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id, org_id, actor_user_id, action, target_type, target_id, timestamp, outcome, metadata",
        )
        .bind(entry.id.into_uuid())
        .bind(entry.org_id.into_uuid())
        .bind(entry.actor_user_id.map(|u| u.into_uuid()))
        .bind(&entry.action)
        .bind(&entry.target_type)
        .bind(&entry.target_id)
        .bind(entry.timestamp)
        .bind(entry.outcome.as_db_str())
        .bind(&entry.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .into_domain()
    }

    async fn list(&self, org_id: OrgId, limit: u32) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT id, org_id, actor_user_id, action, target_type, target_id, timestamp, outcome, metadata
             FROM audit_entries WHERE org_id = $1 ORDER BY timestamp DESC LIMIT $2",
        )
        .bind(org_id.into_uuid())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(AuditRow::into_domain).collect()
    }
}
