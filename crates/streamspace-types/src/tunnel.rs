use crate::ids::{AgentId, ConnectionId, OrgId, SessionId, TunnelId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    Opening,
    Ready,
    Closed,
    Error,
}

impl TunnelState {
    /// At most one live tunnel per session, per §3 and §8; "live" means
    /// `opening` or `ready`.
    pub fn is_live(self) -> bool {
        matches!(self, TunnelState::Opening | TunnelState::Ready)
    }
}

/// The proxied byte stream carrying VNC traffic from a browser to a
/// session. `client_connection_id` is the gateway-local connection the
/// browser is attached to; it is meaningless outside the replica that
/// accepted the upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VncTunnel {
    pub id: TunnelId,
    pub session_id: SessionId,
    pub org_id: OrgId,
    pub agent_id: AgentId,
    pub client_connection_id: ConnectionId,
    pub state: TunnelState,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl VncTunnel {
    pub fn can_transition_to(&self, next: TunnelState) -> bool {
        use TunnelState::*;
        matches!(
            (self.state, next),
            (Opening, Ready) | (Opening, Error) | (Opening, Closed)
                | (Ready, Closed) | (Ready, Error)
        )
    }
}
