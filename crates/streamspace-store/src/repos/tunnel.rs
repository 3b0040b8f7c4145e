use async_trait::async_trait;
use streamspace_types::{
    ids::{OrgId, SessionId, TunnelId},
    tunnel::{TunnelState, VncTunnel},
    Result,
};

#[async_trait]
pub trait TunnelRepository: Send + Sync {
    /// Fails with `Conflict` if a live tunnel (`opening`/`ready`) already
    /// exists for `session.id` — the unique index from §4.1 enforced at
    /// the repository boundary rather than surfaced as a raw constraint
    /// error.
    async fn open(&self, tunnel: VncTunnel) -> Result<VncTunnel>;

    async fn get(&self, org_id: OrgId, id: TunnelId) -> Result<VncTunnel>;

    async fn get_live_for_session(&self, org_id: OrgId, session_id: SessionId) -> Result<Option<VncTunnel>>;

    async fn cas_state(&self, org_id: OrgId, id: TunnelId, next: TunnelState) -> Result<VncTunnel>;
}
