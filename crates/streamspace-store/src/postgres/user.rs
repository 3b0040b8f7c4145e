use crate::error::map_sqlx_error;
use crate::postgres::rows::UserRow;
use crate::UserRepository;
use async_trait::async_trait;
use sqlx::PgPool;
use streamspace_types::{
    ids::{OrgId, UserId},
    user::User,
    Result,
};

pub struct PgUserRepo {
    pub pool: PgPool,
}

#[async_trait]
impl UserRepository for PgUserRepo {
    async fn create(&self, user: User) -> Result<User> {
        sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (id, org_id, username, email, role, org_role, provider, active)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING id, org_id, username, email, role, org_role, provider, active",
        )
        .bind(user.id.into_uuid())
        .bind(user.org_id.into_uuid())
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.role.as_db_str())
        .bind(user.org_role.as_db_str())
        .bind(user.provider.as_db_str())
        .bind(user.active)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .into_domain()
    }

    async fn get(&self, org_id: OrgId, id: UserId) -> Result<User> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, org_id, username, email, role, org_role, provider, active FROM users
             WHERE org_id = $1 AND id = $2 AND deleted_at IS NULL",
        )
        .bind(org_id.into_uuid())
        .bind(id.into_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .into_domain()
    }

    async fn get_by_username(&self, org_id: OrgId, username: &str) -> Result<User> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, org_id, username, email, role, org_role, provider, active FROM users
             WHERE org_id = $1 AND username = $2 AND deleted_at IS NULL",
        )
        .bind(org_id.into_uuid())
        .bind(username)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .into_domain()
    }

    async fn list(&self, org_id: OrgId) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT id, org_id, username, email, role, org_role, provider, active FROM users
             WHERE org_id = $1 AND deleted_at IS NULL ORDER BY username",
        )
        .bind(org_id.into_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(UserRow::into_domain).collect()
    }

    async fn set_active(&self, org_id: OrgId, id: UserId, active: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET active = $3 WHERE org_id = $1 AND id = $2 AND deleted_at IS NULL",
        )
        .bind(org_id.into_uuid())
        .bind(id.into_uuid())
        .bind(active)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(streamspace_types::Error::NotFound);
        }
        Ok(())
    }
}
