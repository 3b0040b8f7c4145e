use async_trait::async_trait;
use chrono::{DateTime, Utc};
use streamspace_types::{
    agent::{Agent, AgentDescriptor, AgentStatus},
    ids::{AgentId, OrgId, ReplicaId},
    Result,
};

#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Idempotent on `(org_id, descriptor.stable_key)` per §4.3: a second
    /// registration with the same key returns the existing agent rather
    /// than creating a duplicate row.
    async fn register(&self, descriptor: AgentDescriptor) -> Result<Agent>;

    /// `org_id: None` reads a pool-shared agent; `Some` scopes to one
    /// tenant's private agent. Both are legitimate per §3, so this is the
    /// one lookup in the store that intentionally accepts an optional
    /// scope rather than a mandatory one — every *session-owning* read
    /// still requires a concrete `org_id`.
    async fn get(&self, org_id: Option<OrgId>, id: AgentId) -> Result<Agent>;

    async fn list_eligible(&self, org_id: OrgId) -> Result<Vec<Agent>>;

    /// CAS: succeeds only if the agent is currently unbound or already
    /// bound to `replica_id`. Returns `Conflict` if bound elsewhere — the
    /// "at most one live binding per agent" invariant from §8.
    async fn bind(&self, id: AgentId, replica_id: ReplicaId) -> Result<()>;

    async fn unbind(&self, id: AgentId, replica_id: ReplicaId) -> Result<()>;

    async fn record_heartbeat(&self, id: AgentId, at: DateTime<Utc>, session_count: u32) -> Result<()>;

    async fn set_status(&self, id: AgentId, status: AgentStatus) -> Result<()>;

    /// Agents whose `last_heartbeat` is older than `threshold` relative to
    /// `now` and are not already `offline`. Driven by the heartbeat
    /// sweeper, §4.3.
    async fn stale_agents(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> Result<Vec<Agent>>;

    /// Bindings owned by `replica_id`, tombstoned `T_rebind` after a
    /// replica crash so the agent can reconnect elsewhere (§4.3).
    async fn tombstone_bindings_for_replica(&self, replica_id: ReplicaId) -> Result<Vec<AgentId>>;

    /// Sets the bearer token hash an agent must present on reconnect.
    /// Written by the auth gate once the agent authenticates for the
    /// first time after `Register`; never exposed on [`Agent`] itself.
    async fn set_token_hash(&self, id: AgentId, token_hash: String) -> Result<()>;

    /// Reads the stored hash for constant-time comparison against a
    /// presented token. `Ok(None)` means the agent has never completed
    /// the token exchange (the placeholder `""` `Register` wrote).
    async fn token_hash(&self, id: AgentId) -> Result<Option<String>>;
}
