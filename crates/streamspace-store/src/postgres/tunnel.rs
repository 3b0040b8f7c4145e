use crate::error::map_sqlx_error;
use crate::postgres::rows::TunnelRow;
use crate::TunnelRepository;
use async_trait::async_trait;
use sqlx::PgPool;
use streamspace_types::{
    ids::{OrgId, SessionId, TunnelId},
    tunnel::{TunnelState, VncTunnel},
    Error, Result,
};

pub struct PgTunnelRepo {
    pub pool: PgPool,
}

#[async_trait]
impl TunnelRepository for PgTunnelRepo {
    async fn open(&self, tunnel: VncTunnel) -> Result<VncTunnel> {
        sqlx::query_as::<_, TunnelRow>(
            "INSERT INTO vnc_tunnels (id, session_id, org_id, agent_id, client_connection_id,
                state, opened_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id, session_id, org_id, agent_id, client_connection_id, state, opened_at, closed_at",
        )
        .bind(tunnel.id.into_uuid())
        .bind(tunnel.session_id.into_uuid())
        .bind(tunnel.org_id.into_uuid())
        .bind(tunnel.agent_id.into_uuid())
        .bind(&tunnel.client_connection_id.0)
        .bind(tunnel.state.as_db_str())
        .bind(tunnel.opened_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .into_domain()
    }

    async fn get(&self, org_id: OrgId, id: TunnelId) -> Result<VncTunnel> {
        sqlx::query_as::<_, TunnelRow>(
            "SELECT id, session_id, org_id, agent_id, client_connection_id, state, opened_at, closed_at
             FROM vnc_tunnels WHERE org_id = $1 AND id = $2",
        )
        .bind(org_id.into_uuid())
        .bind(id.into_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .into_domain()
    }

    async fn get_live_for_session(&self, org_id: OrgId, session_id: SessionId) -> Result<Option<VncTunnel>> {
        let row = sqlx::query_as::<_, TunnelRow>(
            "SELECT id, session_id, org_id, agent_id, client_connection_id, state, opened_at, closed_at
             FROM vnc_tunnels
             WHERE org_id = $1 AND session_id = $2 AND state IN ('opening', 'ready')",
        )
        .bind(org_id.into_uuid())
        .bind(session_id.into_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(TunnelRow::into_domain).transpose()
    }

    async fn cas_state(&self, org_id: OrgId, id: TunnelId, next: TunnelState) -> Result<VncTunnel> {
        let closed = matches!(next, TunnelState::Closed | TunnelState::Error).then(chrono::Utc::now);
        let row = sqlx::query_as::<_, TunnelRow>(
            "UPDATE vnc_tunnels SET state = $3, closed_at = COALESCE($4, closed_at)
             WHERE org_id = $1 AND id = $2
             RETURNING id, session_id, org_id, agent_id, client_connection_id, state, opened_at, closed_at",
        )
        .bind(org_id.into_uuid())
        .bind(id.into_uuid())
        .bind(next.as_db_str())
        .bind(closed)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(TunnelRow::into_domain).transpose()?.ok_or(Error::NotFound)
    }
}
