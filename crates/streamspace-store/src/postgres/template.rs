use crate::error::map_sqlx_error;
use crate::postgres::rows::TemplateRow;
use crate::{TemplateRecord, TemplateRepository};
use async_trait::async_trait;
use sqlx::PgPool;
use streamspace_types::{ids::OrgId, Result};

pub struct PgTemplateRepo {
    pub pool: PgPool,
}

#[async_trait]
impl TemplateRepository for PgTemplateRepo {
    async fn get(&self, org_id: OrgId, name: &str, version: &str) -> Result<TemplateRecord> {
        sqlx::query_as::<_, TemplateRow>(
            "SELECT org_id, name, version, spec, synced_at FROM templates
             WHERE org_id = $1 AND name = $2 AND version = $3",
        )
        .bind(org_id.into_uuid())
        .bind(name)
        .bind(version)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .into_domain()
    }

    async fn list(&self, org_id: OrgId) -> Result<Vec<TemplateRecord>> {
        let rows = sqlx::query_as::<_, TemplateRow>(
            "SELECT org_id, name, version, spec, synced_at FROM templates
             WHERE org_id = $1 ORDER BY name, version",
        )
        .bind(org_id.into_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(TemplateRow::into_domain).collect()
    }

    async fn upsert(&self, record: TemplateRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO templates (org_id, name, version, spec, synced_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (org_id, name, version) DO UPDATE
                SET spec = EXCLUDED.spec, synced_at = EXCLUDED.synced_at",
        )
        .bind(record.org_id.into_uuid())
        .bind(&record.reference.name)
        .bind(&record.reference.version)
        .bind(&record.spec)
        .bind(record.synced_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}
