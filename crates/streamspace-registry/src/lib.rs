//! Agent Registry (C3): the control plane's view of which agents exist,
//! which replica currently owns their WebSocket connection, and whether
//! they are still alive.
//!
//! The store is the durable source of truth; [`Registry`] layers a
//! per-replica [`DashMap`] cache on top of it, the same shape as the
//! teacher's `AppState.agents: Arc<DashMap<String, AgentInfo>>` generalized
//! from "the set of agents this one process knows about" to "a read-through
//! cache over a shared store, invalidated by a bus message when another
//! replica's write changes the answer."

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use streamspace_bus::{Bus, BusExt, Topic};
use streamspace_store::Store;
use streamspace_types::{
    agent::{Agent, AgentDescriptor, AgentStatus},
    ids::{AgentId, OrgId, ReplicaId},
    Error, Result,
};
use tracing::{info, warn};

/// Cache invalidation carries no payload beyond "something about this
/// agent changed" — the receiver always re-reads from the store rather
/// than trusting a value embedded in the bus message.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct InvalidateNotice {
    agent_id: AgentId,
}

/// Maps `agent_id -> Agent` for agents this replica has looked up recently.
/// Entries are inserted on [`Registry::locate`] and evicted either by an
/// explicit write through this replica or by an invalidation message from
/// another replica's write.
pub struct Registry {
    store: Arc<dyn Store>,
    bus: Arc<dyn Bus>,
    replica_id: ReplicaId,
    cache: DashMap<AgentId, Agent>,
    watched: DashMap<AgentId, ()>,
}

impl Registry {
    pub fn new(store: Arc<dyn Store>, bus: Arc<dyn Bus>, replica_id: ReplicaId) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            replica_id,
            cache: DashMap::new(),
            watched: DashMap::new(),
        })
    }

    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    /// Idempotent on `(org_id, stable_key)`; the store handles the
    /// idempotency, this just seeds the cache with the result.
    pub async fn register(&self, descriptor: AgentDescriptor) -> Result<Agent> {
        let agent = self.store.agents().register(descriptor).await?;
        self.cache.insert(agent.id, agent.clone());
        Ok(agent)
    }

    /// CAS-binds `id` to this replica; at most one live binding per agent
    /// (§8). Publishes an invalidation so any other replica holding a
    /// stale cache entry re-reads on next `locate`.
    pub async fn bind(self: &Arc<Self>, id: AgentId) -> Result<()> {
        self.store.agents().bind(id, self.replica_id).await?;
        self.cache.remove(&id);
        self.publish_invalidate(id).await;
        Ok(())
    }

    pub async fn unbind(self: &Arc<Self>, id: AgentId) -> Result<()> {
        self.store.agents().unbind(id, self.replica_id).await?;
        self.cache.remove(&id);
        self.publish_invalidate(id).await;
        Ok(())
    }

    /// Read-through lookup: serves from cache when present, otherwise
    /// reads the store and populates the cache, subscribing to that
    /// agent's invalidation topic the first time it is cached.
    pub async fn locate(self: &Arc<Self>, org_id: Option<OrgId>, id: AgentId) -> Result<Agent> {
        if let Some(entry) = self.cache.get(&id) {
            return Ok(entry.clone());
        }
        let agent = self.store.agents().get(org_id, id).await?;
        self.cache.insert(id, agent.clone());
        self.ensure_watching(id);
        Ok(agent)
    }

    pub async fn list_eligible(&self, org_id: OrgId) -> Result<Vec<Agent>> {
        self.store.agents().list_eligible(org_id).await
    }

    pub async fn heartbeat(&self, id: AgentId, at: DateTime<Utc>, session_count: u32) -> Result<()> {
        self.store.agents().record_heartbeat(id, at, session_count).await?;
        if let Some(mut entry) = self.cache.get_mut(&id) {
            entry.last_heartbeat = at;
            if matches!(entry.status, AgentStatus::Offline) {
                entry.status = AgentStatus::Online;
            }
        }
        Ok(())
    }

    /// Transitions agents whose heartbeat is older than `threshold` to
    /// `offline` and evicts them from the cache. Returns the affected
    /// agent ids so the caller (the coordinator, via the session-by-agent
    /// lookup) can raise `AgentUnreachable` conditions on their sessions.
    pub async fn sweep(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> Result<Vec<AgentId>> {
        let stale = self.store.agents().stale_agents(now, threshold).await?;
        let mut swept = Vec::with_capacity(stale.len());
        for agent in stale {
            if let Err(e) = self.store.agents().set_status(agent.id, AgentStatus::Offline).await {
                warn!(agent_id = %agent.id, error = %e, "failed to mark stale agent offline");
                continue;
            }
            self.cache.remove(&agent.id);
            swept.push(agent.id);
        }
        if !swept.is_empty() {
            info!(count = swept.len(), "swept stale agents offline");
        }
        Ok(swept)
    }

    /// Releases every binding this replica held, for use during graceful
    /// shutdown or after detecting a crash recovery scenario for a peer
    /// replica (§4.3's "tombstone after T_rebind").
    pub async fn tombstone_bindings(&self, replica_id: ReplicaId) -> Result<Vec<AgentId>> {
        let freed = self.store.agents().tombstone_bindings_for_replica(replica_id).await?;
        for id in &freed {
            self.cache.remove(id);
        }
        Ok(freed)
    }

    async fn publish_invalidate(&self, id: AgentId) {
        let topic = Topic::RegistryInvalidate(id.to_string());
        if let Err(e) = self
            .bus
            .publish(&topic, &InvalidateNotice { agent_id: id }, StdDuration::from_secs(30))
            .await
        {
            warn!(agent_id = %id, error = %e, "failed to publish registry invalidation");
        }
    }

    fn ensure_watching(self: &Arc<Self>, id: AgentId) {
        if self.watched.insert(id, ()).is_some() {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let topic = Topic::RegistryInvalidate(id.to_string()).to_string();
            let mut rx = match this.bus.subscribe_raw(&topic).await {
                Ok(rx) => rx,
                Err(e) => {
                    warn!(agent_id = %id, error = %e, "failed to subscribe to agent invalidation topic");
                    this.watched.remove(&id);
                    return;
                }
            };
            while rx.recv().await.is_some() {
                this.cache.remove(&id);
            }
            this.watched.remove(&id);
        });
    }
}

/// Surfaced for components (C4, C5) that only need a lookup and shouldn't
/// depend on `Registry`'s concrete cache/bus wiring directly.
#[async_trait]
pub trait AgentLocator: Send + Sync {
    async fn locate(&self, org_id: Option<OrgId>, id: AgentId) -> Result<Agent>;
}

#[async_trait]
impl AgentLocator for Arc<Registry> {
    async fn locate(&self, org_id: Option<OrgId>, id: AgentId) -> Result<Agent> {
        Registry::locate(self, org_id, id).await
    }
}

pub fn unavailable(id: AgentId) -> Error {
    Error::AgentUnavailable(format!("agent {id} has no eligible binding"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamspace_bus::LocalBus;
    use streamspace_store::fake::FakeStore;
    use streamspace_types::agent::Platform;
    use std::collections::BTreeMap;

    fn descriptor() -> AgentDescriptor {
        AgentDescriptor {
            org_id: None,
            platform: Platform::Kubernetes,
            stable_key: "node-a".to_string(),
            labels: BTreeMap::new(),
            capacity: 4,
        }
    }

    #[tokio::test]
    async fn register_is_idempotent_on_stable_key() {
        let store: Arc<dyn Store> = Arc::new(FakeStore::default());
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let registry = Registry::new(store, bus, ReplicaId::new());

        let first = registry.register(descriptor()).await.unwrap();
        let second = registry.register(descriptor()).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn bind_then_unbind_frees_the_agent() {
        let store: Arc<dyn Store> = Arc::new(FakeStore::default());
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let registry = Registry::new(store, bus, ReplicaId::new());

        let agent = registry.register(descriptor()).await.unwrap();
        registry.bind(agent.id).await.unwrap();

        let other_replica = ReplicaId::new();
        let conflict = registry.store.agents().bind(agent.id, other_replica).await;
        assert!(conflict.is_err());

        registry.unbind(agent.id).await.unwrap();
        registry.store.agents().bind(agent.id, other_replica).await.unwrap();
    }

    #[tokio::test]
    async fn sweep_marks_stale_agents_offline() {
        let store: Arc<dyn Store> = Arc::new(FakeStore::default());
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let registry = Registry::new(store, bus, ReplicaId::new());

        let agent = registry.register(descriptor()).await.unwrap();
        let far_future = Utc::now() + chrono::Duration::hours(1);
        let swept = registry.sweep(far_future, chrono::Duration::seconds(30)).await.unwrap();
        assert_eq!(swept, vec![agent.id]);
    }
}
