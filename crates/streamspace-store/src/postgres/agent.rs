use crate::error::map_sqlx_error;
use crate::postgres::rows::AgentRow;
use crate::AgentRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use streamspace_types::{
    agent::{Agent, AgentDescriptor, AgentStatus},
    ids::{AgentId, OrgId, ReplicaId},
    Error, Result,
};
use uuid::Uuid;

pub struct PgAgentRepo {
    pub pool: PgPool,
}

#[async_trait]
impl AgentRepository for PgAgentRepo {
    async fn register(&self, descriptor: AgentDescriptor) -> Result<Agent> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let existing = sqlx::query_as::<_, AgentRow>(
            "SELECT id, org_id, platform, labels, capacity, status, last_heartbeat, connected_replica_id
             FROM agents WHERE org_id IS NOT DISTINCT FROM $1 AND stable_key = $2",
        )
        .bind(descriptor.org_id.map(|o| o.into_uuid()))
        .bind(&descriptor.stable_key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if let Some(row) = existing {
            tx.commit().await.map_err(map_sqlx_error)?;
            return row.into_domain();
        }

        let labels = serde_json::to_value(&descriptor.labels)
            .map_err(|e| Error::Internal(format!("agent.labels encode: {e}")))?;
        let now = Utc::now();
        // Registration only establishes identity; the bearer token presented
        // on the gateway's WebSocket upgrade is hashed and stored separately
        // by streamspace-auth once the agent authenticates.
        let row = sqlx::query_as::<_, AgentRow>(
            "INSERT INTO agents (id, org_id, platform, stable_key, labels, capacity, status, last_heartbeat, token_hash)
             VALUES ($1, $2, $3, $4, $5, $6, 'offline', $7, '')
             RETURNING id, org_id, platform, labels, capacity, status, last_heartbeat, connected_replica_id",
        )
        .bind(Uuid::new_v4())
        .bind(descriptor.org_id.map(|o| o.into_uuid()))
        .bind(descriptor.platform.as_db_str())
        .bind(&descriptor.stable_key)
        .bind(labels)
        .bind(descriptor.capacity as i32)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        row.into_domain()
    }

    async fn get(&self, org_id: Option<OrgId>, id: AgentId) -> Result<Agent> {
        sqlx::query_as::<_, AgentRow>(
            "SELECT id, org_id, platform, labels, capacity, status, last_heartbeat, connected_replica_id
             FROM agents WHERE id = $1 AND org_id IS NOT DISTINCT FROM $2",
        )
        .bind(id.into_uuid())
        .bind(org_id.map(|o| o.into_uuid()))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .into_domain()
    }

    async fn list_eligible(&self, org_id: OrgId) -> Result<Vec<Agent>> {
        let rows = sqlx::query_as::<_, AgentRow>(
            "SELECT id, org_id, platform, labels, capacity, status, last_heartbeat, connected_replica_id
             FROM agents WHERE (org_id = $1 OR org_id IS NULL) AND status = 'online'",
        )
        .bind(org_id.into_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(AgentRow::into_domain).collect()
    }

    async fn bind(&self, id: AgentId, replica_id: ReplicaId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE agents SET connected_replica_id = $2
             WHERE id = $1 AND (connected_replica_id IS NULL OR connected_replica_id = $2)",
        )
        .bind(id.into_uuid())
        .bind(replica_id.into_uuid())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(Error::Conflict(format!("agent {} already bound to another replica", id.into_uuid())));
        }
        Ok(())
    }

    async fn unbind(&self, id: AgentId, replica_id: ReplicaId) -> Result<()> {
        sqlx::query(
            "UPDATE agents SET connected_replica_id = NULL
             WHERE id = $1 AND connected_replica_id = $2",
        )
        .bind(id.into_uuid())
        .bind(replica_id.into_uuid())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn record_heartbeat(&self, id: AgentId, at: DateTime<Utc>, _session_count: u32) -> Result<()> {
        let result = sqlx::query(
            "UPDATE agents SET last_heartbeat = $2, status = CASE WHEN status = 'offline' THEN 'online' ELSE status END
             WHERE id = $1",
        )
        .bind(id.into_uuid())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    async fn set_status(&self, id: AgentId, status: AgentStatus) -> Result<()> {
        let result = sqlx::query("UPDATE agents SET status = $2 WHERE id = $1")
            .bind(id.into_uuid())
            .bind(status.as_db_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    async fn stale_agents(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> Result<Vec<Agent>> {
        let cutoff = now - threshold;
        let rows = sqlx::query_as::<_, AgentRow>(
            "SELECT id, org_id, platform, labels, capacity, status, last_heartbeat, connected_replica_id
             FROM agents WHERE last_heartbeat < $1 AND status != 'offline'",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(AgentRow::into_domain).collect()
    }

    async fn tombstone_bindings_for_replica(&self, replica_id: ReplicaId) -> Result<Vec<AgentId>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "UPDATE agents SET connected_replica_id = NULL WHERE connected_replica_id = $1
             RETURNING id",
        )
        .bind(replica_id.into_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(|(id,)| AgentId(id)).collect())
    }

    async fn set_token_hash(&self, id: AgentId, token_hash: String) -> Result<()> {
        let result = sqlx::query("UPDATE agents SET token_hash = $2 WHERE id = $1")
            .bind(id.into_uuid())
            .bind(token_hash)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    async fn token_hash(&self, id: AgentId) -> Result<Option<String>> {
        let row: (String,) = sqlx::query_as("SELECT token_hash FROM agents WHERE id = $1")
            .bind(id.into_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(if row.0.is_empty() { None } else { Some(row.0) })
    }
}
