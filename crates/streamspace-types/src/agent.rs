use crate::ids::{AgentId, OrgId, ReplicaId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Kubernetes,
    Docker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    Draining,
    Offline,
}

/// A worker that talks to a specific platform and owns session containers
/// on behalf of the control plane. `org_id` is `None` iff the agent is
/// pool-shared across organizations (§9 open question iii leaves the
/// scheduling policy for shared agents configurable; see DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub org_id: Option<OrgId>,
    pub platform: Platform,
    pub labels: BTreeMap<String, String>,
    pub capacity: u32,
    pub status: AgentStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub connected_replica_id: Option<ReplicaId>,
}

impl Agent {
    /// An agent is eligible to receive new session placements when it is
    /// online and not at capacity. `draining` agents are excluded from new
    /// placement but keep serving sessions already assigned to them.
    pub fn accepts_new_sessions(&self, current_session_count: u32) -> bool {
        matches!(self.status, AgentStatus::Online) && current_session_count < self.capacity
    }

    /// The stable identity used for idempotent registration: `(org_id,
    /// stable_key)` from §4.3's `Register` contract. `stable_key` is
    /// supplied by the agent descriptor at registration time (e.g. a
    /// Kubernetes node name or a Docker host fingerprint) and is opaque to
    /// the core beyond this comparison.
    pub fn is_heartbeat_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        now - self.last_heartbeat > threshold
    }
}

/// Descriptor submitted on first connect; `stable_key` makes `Register`
/// idempotent for a given `(org_id, stable_key)` pair per §4.3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub org_id: Option<OrgId>,
    pub platform: Platform,
    pub stable_key: String,
    pub labels: BTreeMap<String, String>,
    pub capacity: u32,
}
