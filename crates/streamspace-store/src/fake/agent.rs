use crate::AgentRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use streamspace_types::{
    agent::{Agent, AgentDescriptor, AgentStatus},
    ids::{AgentId, OrgId, ReplicaId},
    Error, Result,
};

pub struct FakeAgentRepo {
    pub agents: Arc<DashMap<AgentId, Agent>>,
    pub token_hashes: Arc<DashMap<AgentId, String>>,
}

#[async_trait]
impl AgentRepository for FakeAgentRepo {
    async fn register(&self, descriptor: AgentDescriptor) -> Result<Agent> {
        let existing = self.agents.iter().find(|e| {
            e.org_id == descriptor.org_id
                && e.labels.get("stable_key") == Some(&descriptor.stable_key)
        });
        if let Some(existing) = existing {
            return Ok(existing.clone());
        }
        let mut labels = descriptor.labels.clone();
        labels.insert("stable_key".to_string(), descriptor.stable_key.clone());
        let agent = Agent {
            id: AgentId::new(),
            org_id: descriptor.org_id,
            platform: descriptor.platform,
            labels,
            capacity: descriptor.capacity,
            status: AgentStatus::Online,
            last_heartbeat: Utc::now(),
            connected_replica_id: None,
        };
        self.agents.insert(agent.id, agent.clone());
        Ok(agent)
    }

    async fn get(&self, org_id: Option<OrgId>, id: AgentId) -> Result<Agent> {
        self.agents
            .get(&id)
            .filter(|a| org_id.is_none() || a.org_id == org_id || a.org_id.is_none())
            .map(|a| a.clone())
            .ok_or(Error::NotFound)
    }

    async fn list_eligible(&self, org_id: OrgId) -> Result<Vec<Agent>> {
        Ok(self
            .agents
            .iter()
            .filter(|a| a.org_id == Some(org_id) || a.org_id.is_none())
            .map(|a| a.clone())
            .collect())
    }

    async fn bind(&self, id: AgentId, replica_id: ReplicaId) -> Result<()> {
        let mut entry = self.agents.get_mut(&id).ok_or(Error::NotFound)?;
        match entry.connected_replica_id {
            None => {
                entry.connected_replica_id = Some(replica_id);
                Ok(())
            }
            Some(current) if current == replica_id => Ok(()),
            Some(_) => Err(Error::Conflict(format!("agent {id} already bound"))),
        }
    }

    async fn unbind(&self, id: AgentId, replica_id: ReplicaId) -> Result<()> {
        let mut entry = self.agents.get_mut(&id).ok_or(Error::NotFound)?;
        if entry.connected_replica_id == Some(replica_id) {
            entry.connected_replica_id = None;
        }
        Ok(())
    }

    async fn record_heartbeat(&self, id: AgentId, at: DateTime<Utc>, session_count: u32) -> Result<()> {
        let mut entry = self.agents.get_mut(&id).ok_or(Error::NotFound)?;
        entry.last_heartbeat = at;
        let _ = session_count;
        if matches!(entry.status, AgentStatus::Offline) {
            entry.status = AgentStatus::Online;
        }
        Ok(())
    }

    async fn set_status(&self, id: AgentId, status: AgentStatus) -> Result<()> {
        let mut entry = self.agents.get_mut(&id).ok_or(Error::NotFound)?;
        entry.status = status;
        Ok(())
    }

    async fn stale_agents(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> Result<Vec<Agent>> {
        Ok(self
            .agents
            .iter()
            .filter(|a| {
                !matches!(a.status, AgentStatus::Offline) && a.is_heartbeat_stale(now, threshold)
            })
            .map(|a| a.clone())
            .collect())
    }

    async fn tombstone_bindings_for_replica(&self, replica_id: ReplicaId) -> Result<Vec<AgentId>> {
        let mut tombstoned = Vec::new();
        for mut entry in self.agents.iter_mut() {
            if entry.connected_replica_id == Some(replica_id) {
                entry.connected_replica_id = None;
                tombstoned.push(entry.id);
            }
        }
        Ok(tombstoned)
    }

    async fn set_token_hash(&self, id: AgentId, token_hash: String) -> Result<()> {
        if !self.agents.contains_key(&id) {
            return Err(Error::NotFound);
        }
        self.token_hashes.insert(id, token_hash);
        Ok(())
    }

    async fn token_hash(&self, id: AgentId) -> Result<Option<String>> {
        if !self.agents.contains_key(&id) {
            return Err(Error::NotFound);
        }
        Ok(self.token_hashes.get(&id).map(|h| h.clone()))
    }
}
