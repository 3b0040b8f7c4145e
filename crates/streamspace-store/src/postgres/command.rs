use crate::error::map_sqlx_error;
use crate::postgres::rows::CommandRow;
use crate::CommandRepository;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use streamspace_types::{
    command::{Command, CommandStatus},
    ids::{CommandId, OrgId, SessionId},
    Error, Result,
};

pub struct PgCommandRepo {
    pub pool: PgPool,
}

#[async_trait]
impl CommandRepository for PgCommandRepo {
    async fn insert(&self, command: Command) -> Result<Command> {
        sqlx::query_as::<_, CommandRow>(
            "INSERT INTO commands (id, session_id, org_id, action, payload, status, issued_at,
                issuing_replica_id, target_agent_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id, session_id, org_id, action, payload, status, issued_at,
                acknowledged_at, completed_at, error, result, issuing_replica_id, target_agent_id",
        )
        .bind(command.id.into_uuid())
        .bind(command.session_id.into_uuid())
        .bind(command.org_id.into_uuid())
        .bind(command.action.as_db_str())
        .bind(&command.payload)
        .bind(command.status.as_db_str())
        .bind(command.issued_at)
        .bind(command.issuing_replica_id.into_uuid())
        .bind(command.target_agent_id.map(|a| a.into_uuid()))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .into_domain()
    }

    async fn get(&self, org_id: OrgId, id: CommandId) -> Result<Command> {
        sqlx::query_as::<_, CommandRow>(
            "SELECT id, session_id, org_id, action, payload, status, issued_at,
                acknowledged_at, completed_at, error, result, issuing_replica_id, target_agent_id
             FROM commands WHERE org_id = $1 AND id = $2",
        )
        .bind(org_id.into_uuid())
        .bind(id.into_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .into_domain()
    }

    async fn in_flight_for_session(&self, session_id: SessionId) -> Result<Option<Command>> {
        let row = sqlx::query_as::<_, CommandRow>(
            "SELECT id, session_id, org_id, action, payload, status, issued_at,
                acknowledged_at, completed_at, error, result, issuing_replica_id, target_agent_id
             FROM commands
             WHERE session_id = $1 AND status IN ('pending', 'dispatched', 'acknowledged')",
        )
        .bind(session_id.into_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(CommandRow::into_domain).transpose()
    }

    async fn cas_status(
        &self,
        org_id: OrgId,
        id: CommandId,
        expected: CommandStatus,
        next: CommandStatus,
        error: Option<String>,
        result: Option<Value>,
    ) -> Result<Command> {
        let row = sqlx::query_as::<_, CommandRow>(
            "UPDATE commands SET
                status = $4,
                error = COALESCE($5, error),
                result = COALESCE($6, result),
                acknowledged_at = CASE WHEN $4 = 'acknowledged' THEN now() ELSE acknowledged_at END,
                completed_at = CASE WHEN $4 IN ('completed', 'failed', 'timed_out') THEN now() ELSE completed_at END
             WHERE org_id = $1 AND id = $2 AND status = $3
             RETURNING id, session_id, org_id, action, payload, status, issued_at,
                acknowledged_at, completed_at, error, result, issuing_replica_id, target_agent_id",
        )
        .bind(org_id.into_uuid())
        .bind(id.into_uuid())
        .bind(expected.as_db_str())
        .bind(next.as_db_str())
        .bind(error)
        .bind(result)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(r) => r.into_domain(),
            None => Err(Error::Conflict(format!(
                "command {id} is not in expected status {expected:?}"
            ))),
        }
    }

    async fn overdue(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<Command>> {
        // Deadlines are per-action (§4.4), not a single column, so the
        // filter is evaluated in Rust against each action's own deadline
        // rather than expressed as one SQL predicate.
        let rows = sqlx::query_as::<_, CommandRow>(
            "SELECT id, session_id, org_id, action, payload, status, issued_at,
                acknowledged_at, completed_at, error, result, issuing_replica_id, target_agent_id
             FROM commands WHERE status IN ('pending', 'dispatched', 'acknowledged')",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(CommandRow::into_domain)
            .filter(|c| match c {
                Ok(c) => now - c.issued_at > chrono::Duration::from_std(c.action.deadline()).unwrap_or_default(),
                Err(_) => true,
            })
            .collect()
    }
}
