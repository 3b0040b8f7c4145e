use crate::error::map_sqlx_error;
use crate::postgres::rows::SessionRow;
use crate::{SessionFilter, SessionRepository};
use async_trait::async_trait;
use sqlx::PgPool;
use streamspace_types::{
    command::Command,
    ids::{AgentId, OrgId, SessionId, UserId},
    session::{Condition, ConditionKind, Session, SessionState},
    Error, Result,
};

pub struct PgSessionRepo {
    pub pool: PgPool,
}

#[async_trait]
impl SessionRepository for PgSessionRepo {
    async fn create_with_initial_command(
        &self,
        session: Session,
        initial_command: Command,
        quota_limit: u32,
    ) -> Result<(Session, Command)> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let live_count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM sessions
             WHERE org_id = $1 AND user_id = $2 AND state IN ('running', 'hibernated')",
        )
        .bind(session.org_id.into_uuid())
        .bind(session.user_id.into_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if live_count as u32 >= quota_limit {
            return Err(Error::QuotaExceeded(format!(
                "user {} already has {} live sessions in org {}",
                session.user_id, live_count, session.org_id
            )));
        }

        let conditions = serde_json::to_value(&session.conditions)
            .map_err(|e| Error::Internal(format!("session.conditions encode: {e}")))?;

        let session_row = sqlx::query_as::<_, SessionRow>(
            "INSERT INTO sessions (id, org_id, user_id, template_name, template_version, agent_id,
                namespace, state, desired_state, platform_metadata, vnc_ready, vnc_endpoint,
                created_at, last_activity_at, conditions)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             RETURNING id, org_id, user_id, template_name, template_version, agent_id, namespace,
                state, desired_state, platform_metadata, vnc_ready, vnc_endpoint, created_at,
                last_activity_at, conditions, shared_user_ids",
        )
        .bind(session.id.into_uuid())
        .bind(session.org_id.into_uuid())
        .bind(session.user_id.into_uuid())
        .bind(&session.template_ref.name)
        .bind(&session.template_ref.version)
        .bind(session.agent_id.map(|a| a.into_uuid()))
        .bind(&session.namespace)
        .bind(session.state.as_db_str())
        .bind(session.desired_state.as_db_str())
        .bind(&session.platform_metadata)
        .bind(session.vnc_ready)
        .bind(&session.vnc_endpoint)
        .bind(session.created_at)
        .bind(session.last_activity_at)
        .bind(conditions)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let command_row = sqlx::query_as::<_, crate::postgres::rows::CommandRow>(
            "INSERT INTO commands (id, session_id, org_id, action, payload, status, issued_at,
                issuing_replica_id, target_agent_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id, session_id, org_id, action, payload, status, issued_at,
                acknowledged_at, completed_at, error, result, issuing_replica_id, target_agent_id",
        )
        .bind(initial_command.id.into_uuid())
        .bind(initial_command.session_id.into_uuid())
        .bind(initial_command.org_id.into_uuid())
        .bind(initial_command.action.as_db_str())
        .bind(&initial_command.payload)
        .bind(initial_command.status.as_db_str())
        .bind(initial_command.issued_at)
        .bind(initial_command.issuing_replica_id.into_uuid())
        .bind(initial_command.target_agent_id.map(|a| a.into_uuid()))
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok((session_row.into_domain()?, command_row.into_domain()?))
    }

    async fn get(&self, org_id: OrgId, id: SessionId) -> Result<Session> {
        sqlx::query_as::<_, SessionRow>(
            "SELECT id, org_id, user_id, template_name, template_version, agent_id, namespace,
                state, desired_state, platform_metadata, vnc_ready, vnc_endpoint, created_at,
                last_activity_at, conditions, shared_user_ids
             FROM sessions WHERE org_id = $1 AND id = $2",
        )
        .bind(org_id.into_uuid())
        .bind(id.into_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .into_domain()
    }

    async fn list(&self, org_id: OrgId, filter: SessionFilter) -> Result<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT id, org_id, user_id, template_name, template_version, agent_id, namespace,
                state, desired_state, platform_metadata, vnc_ready, vnc_endpoint, created_at,
                last_activity_at, conditions, shared_user_ids
             FROM sessions
             WHERE org_id = $1
               AND ($2::uuid IS NULL OR user_id = $2)
               AND ($3::text IS NULL OR state = $3)
             ORDER BY created_at DESC",
        )
        .bind(org_id.into_uuid())
        .bind(filter.user_id.map(|u| u.into_uuid()))
        .bind(filter.state.map(|s| s.as_db_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(SessionRow::into_domain).collect()
    }

    async fn cas_state(
        &self,
        org_id: OrgId,
        id: SessionId,
        expected: SessionState,
        next: SessionState,
    ) -> Result<Session> {
        let row = sqlx::query_as::<_, SessionRow>(
            "UPDATE sessions SET state = $4, last_activity_at = now()
             WHERE org_id = $1 AND id = $2 AND state = $3
             RETURNING id, org_id, user_id, template_name, template_version, agent_id, namespace,
                state, desired_state, platform_metadata, vnc_ready, vnc_endpoint, created_at,
                last_activity_at, conditions, shared_user_ids",
        )
        .bind(org_id.into_uuid())
        .bind(id.into_uuid())
        .bind(expected.as_db_str())
        .bind(next.as_db_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(r) => r.into_domain(),
            None => Err(Error::Conflict(format!(
                "session {id} is not in expected state {expected:?}"
            ))),
        }
    }

    async fn set_desired_state(&self, org_id: OrgId, id: SessionId, desired: SessionState) -> Result<()> {
        let result = sqlx::query("UPDATE sessions SET desired_state = $3 WHERE org_id = $1 AND id = $2")
            .bind(org_id.into_uuid())
            .bind(id.into_uuid())
            .bind(desired.as_db_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    async fn set_agent(&self, org_id: OrgId, id: SessionId, agent_id: AgentId) -> Result<()> {
        let result = sqlx::query("UPDATE sessions SET agent_id = $3 WHERE org_id = $1 AND id = $2")
            .bind(org_id.into_uuid())
            .bind(id.into_uuid())
            .bind(agent_id.into_uuid())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    async fn set_vnc_ready(&self, org_id: OrgId, id: SessionId, ready: bool, endpoint: Option<String>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sessions SET vnc_ready = $3, vnc_endpoint = $4 WHERE org_id = $1 AND id = $2",
        )
        .bind(org_id.into_uuid())
        .bind(id.into_uuid())
        .bind(ready)
        .bind(endpoint)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    async fn share(&self, org_id: OrgId, id: SessionId, user_id: UserId) -> Result<Session> {
        let row = sqlx::query_as::<_, SessionRow>(
            "UPDATE sessions SET shared_user_ids = array_append(shared_user_ids, $3)
             WHERE org_id = $1 AND id = $2 AND NOT ($3 = ANY(shared_user_ids))
             RETURNING id, org_id, user_id, template_name, template_version, agent_id, namespace,
                state, desired_state, platform_metadata, vnc_ready, vnc_endpoint, created_at,
                last_activity_at, conditions, shared_user_ids",
        )
        .bind(org_id.into_uuid())
        .bind(id.into_uuid())
        .bind(user_id.into_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(r) => r.into_domain(),
            // Already shared, or the session doesn't exist: either way the
            // UPDATE matched zero rows. Distinguish with a plain read.
            None => self.get(org_id, id).await,
        }
    }

    async fn add_condition(&self, org_id: OrgId, id: SessionId, condition: Condition) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let row: (serde_json::Value,) =
            sqlx::query_as("SELECT conditions FROM sessions WHERE org_id = $1 AND id = $2 FOR UPDATE")
                .bind(org_id.into_uuid())
                .bind(id.into_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_error)?
                .ok_or(Error::NotFound)?;

        let mut conditions: Vec<Condition> = serde_json::from_value(row.0)
            .map_err(|e| Error::Internal(format!("session.conditions decode: {e}")))?;
        conditions.push(condition);
        let encoded = serde_json::to_value(&conditions)
            .map_err(|e| Error::Internal(format!("session.conditions encode: {e}")))?;

        sqlx::query("UPDATE sessions SET conditions = $3 WHERE org_id = $1 AND id = $2")
            .bind(org_id.into_uuid())
            .bind(id.into_uuid())
            .bind(encoded)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn clear_condition(&self, org_id: OrgId, id: SessionId, kind: ConditionKind) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let row: (serde_json::Value,) =
            sqlx::query_as("SELECT conditions FROM sessions WHERE org_id = $1 AND id = $2 FOR UPDATE")
                .bind(org_id.into_uuid())
                .bind(id.into_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_error)?
                .ok_or(Error::NotFound)?;

        let mut conditions: Vec<Condition> = serde_json::from_value(row.0)
            .map_err(|e| Error::Internal(format!("session.conditions decode: {e}")))?;
        let now = chrono::Utc::now();
        for c in conditions.iter_mut().filter(|c| c.kind == kind && c.cleared_at.is_none()) {
            c.cleared_at = Some(now);
        }
        let encoded = serde_json::to_value(&conditions)
            .map_err(|e| Error::Internal(format!("session.conditions encode: {e}")))?;

        sqlx::query("UPDATE sessions SET conditions = $3 WHERE org_id = $1 AND id = $2")
            .bind(org_id.into_uuid())
            .bind(id.into_uuid())
            .bind(encoded)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn count_live_for_user(&self, org_id: OrgId, user_id: UserId) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM sessions
             WHERE org_id = $1 AND user_id = $2 AND state IN ('running', 'hibernated')",
        )
        .bind(org_id.into_uuid())
        .bind(user_id.into_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(count as u32)
    }

    async fn needing_reconciliation(&self, settle: chrono::Duration) -> Result<Vec<Session>> {
        let cutoff = chrono::Utc::now() - settle;
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT id, org_id, user_id, template_name, template_version, agent_id, namespace,
                state, desired_state, platform_metadata, vnc_ready, vnc_endpoint, created_at,
                last_activity_at, conditions, shared_user_ids
             FROM sessions
             WHERE state != desired_state
               AND state NOT IN ('terminated', 'failed')
               AND last_activity_at < $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(SessionRow::into_domain).collect()
    }

    async fn list_by_agent(&self, agent_id: AgentId) -> Result<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT id, org_id, user_id, template_name, template_version, agent_id, namespace,
                state, desired_state, platform_metadata, vnc_ready, vnc_endpoint, created_at,
                last_activity_at, conditions, shared_user_ids
             FROM sessions WHERE agent_id = $1",
        )
        .bind(agent_id.into_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(SessionRow::into_domain).collect()
    }
}
