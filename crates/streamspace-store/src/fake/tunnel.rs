use crate::TunnelRepository;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use streamspace_types::{
    ids::{OrgId, SessionId, TunnelId},
    tunnel::{TunnelState, VncTunnel},
    Error, Result,
};

pub struct FakeTunnelRepo {
    pub tunnels: Arc<DashMap<TunnelId, VncTunnel>>,
}

#[async_trait]
impl TunnelRepository for FakeTunnelRepo {
    async fn open(&self, tunnel: VncTunnel) -> Result<VncTunnel> {
        let live_exists = self
            .tunnels
            .iter()
            .any(|t| t.session_id == tunnel.session_id && t.state.is_live());
        if live_exists {
            return Err(Error::Conflict(format!(
                "session {} already has a live tunnel",
                tunnel.session_id
            )));
        }
        self.tunnels.insert(tunnel.id, tunnel.clone());
        Ok(tunnel)
    }

    async fn get(&self, org_id: OrgId, id: TunnelId) -> Result<VncTunnel> {
        self.tunnels
            .get(&id)
            .filter(|t| t.org_id == org_id)
            .map(|t| t.clone())
            .ok_or(Error::NotFound)
    }

    async fn get_live_for_session(&self, org_id: OrgId, session_id: SessionId) -> Result<Option<VncTunnel>> {
        Ok(self
            .tunnels
            .iter()
            .find(|t| t.org_id == org_id && t.session_id == session_id && t.state.is_live())
            .map(|t| t.clone()))
    }

    async fn cas_state(&self, org_id: OrgId, id: TunnelId, next: TunnelState) -> Result<VncTunnel> {
        let mut entry = self.tunnels.get_mut(&id).ok_or(Error::NotFound)?;
        if entry.org_id != org_id {
            return Err(Error::NotFound);
        }
        if !entry.can_transition_to(next) {
            return Err(Error::Conflict(format!(
                "tunnel {id} cannot transition {:?} -> {next:?}",
                entry.state
            )));
        }
        entry.state = next;
        if matches!(next, TunnelState::Closed | TunnelState::Error) {
            entry.closed_at = Some(chrono::Utc::now());
        }
        Ok(entry.clone())
    }
}
