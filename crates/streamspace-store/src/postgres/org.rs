use crate::error::map_sqlx_error;
use crate::postgres::rows::OrgRow;
use crate::OrgRepository;
use async_trait::async_trait;
use sqlx::PgPool;
use streamspace_types::{
    ids::OrgId,
    org::{Organization, OrgStatus},
    Result,
};

pub struct PgOrgRepo {
    pub pool: PgPool,
}

#[async_trait]
impl OrgRepository for PgOrgRepo {
    async fn create(&self, org: Organization) -> Result<Organization> {
        sqlx::query_as::<_, OrgRow>(
            "INSERT INTO organizations (id, slug, display_name, namespace, status)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, slug, display_name, namespace, status",
        )
        .bind(org.id.into_uuid())
        .bind(&org.slug)
        .bind(&org.display_name)
        .bind(&org.namespace)
        .bind(org.status.as_db_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .into_domain()
    }

    async fn get(&self, id: OrgId) -> Result<Organization> {
        sqlx::query_as::<_, OrgRow>(
            "SELECT id, slug, display_name, namespace, status FROM organizations
             WHERE id = $1 AND status != 'deleted'",
        )
        .bind(id.into_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .into_domain()
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Organization> {
        sqlx::query_as::<_, OrgRow>(
            "SELECT id, slug, display_name, namespace, status FROM organizations
             WHERE slug = $1 AND status != 'deleted'",
        )
        .bind(slug)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .into_domain()
    }

    async fn set_status(&self, id: OrgId, status: OrgStatus) -> Result<()> {
        let deleted_at = matches!(status, OrgStatus::Deleted).then(chrono::Utc::now);
        sqlx::query(
            "UPDATE organizations SET status = $2, deleted_at = COALESCE($3, deleted_at)
             WHERE id = $1",
        )
        .bind(id.into_uuid())
        .bind(status.as_db_str())
        .bind(deleted_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Organization>> {
        let rows = sqlx::query_as::<_, OrgRow>(
            "SELECT id, slug, display_name, namespace, status FROM organizations
             WHERE status != 'deleted' ORDER BY slug",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(OrgRow::into_domain).collect()
    }
}
