//! Command Dispatcher (C4): turns a coordinator's intent into exactly one
//! dispatch attempt at the target agent, then lets callers wait on the
//! outcome independently of that dispatch call.
//!
//! Grounded on the teacher's per-connection
//! `Arc<tokio::sync::Mutex<Option<String>>>` agent-id guard in
//! `handlers.rs`, generalized from "one mutex guarding one connection's
//! agent identity" to "one mutex per session guarding that session's
//! single in-flight command" (`session_locks`). The waiter table
//! (`DashMap<CommandId, oneshot::Sender<CommandOutcome>>`) has no teacher
//! analog — the teacher relays data without ever waiting for a reply — but
//! follows the same lock-free-registry idiom as its `AppState`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use streamspace_bus::{Bus, BusExt, Topic};
use streamspace_registry::Registry;
use streamspace_store::Store;
use streamspace_types::{
    command::{Command, CommandAction, CommandStatus},
    ids::{AgentId, CommandId, OrgId, ReplicaId, SessionId},
    Error, Result,
};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{info, warn};

/// What goes over the wire (bus topic or local sink) to reach the agent
/// connection that owns the target session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEnvelope {
    pub command_id: CommandId,
    pub session_id: SessionId,
    pub action: CommandAction,
    pub payload: Value,
}

/// The result an awaiting caller receives once the agent (or the deadline
/// sweeper) settles a command.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub status: CommandStatus,
    pub error: Option<String>,
    pub result: Option<Value>,
}

pub struct Dispatcher {
    store: Arc<dyn Store>,
    bus: Arc<dyn Bus>,
    registry: Arc<Registry>,
    replica_id: ReplicaId,
    session_locks: DashMap<SessionId, Arc<Mutex<()>>>,
    waiters: DashMap<CommandId, oneshot::Sender<CommandOutcome>>,
    local_sinks: DashMap<AgentId, mpsc::Sender<DispatchEnvelope>>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, bus: Arc<dyn Bus>, registry: Arc<Registry>, replica_id: ReplicaId) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            registry,
            replica_id,
            session_locks: DashMap::new(),
            waiters: DashMap::new(),
            local_sinks: DashMap::new(),
        })
    }

    /// Registers the outbound queue the gateway (C6) uses to push
    /// messages to an agent connected to *this* replica. Dispatch prefers
    /// this over the bus whenever the target agent is locally bound.
    pub fn register_local_sink(&self, agent_id: AgentId, tx: mpsc::Sender<DispatchEnvelope>) {
        self.local_sinks.insert(agent_id, tx);
    }

    pub fn unregister_local_sink(&self, agent_id: AgentId) {
        self.local_sinks.remove(&agent_id);
    }

    fn session_lock(&self, session_id: SessionId) -> Arc<Mutex<()>> {
        self.session_locks.entry(session_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Issues `action` against `session_id`'s agent: inserts the command
    /// as `pending`, resolves `target_agent_id`, attempts dispatch exactly
    /// once (local queue write or bus publish), then CASes to
    /// `dispatched`. Returns as soon as the dispatch attempt completes —
    /// it does not wait for the agent to acknowledge. Fails with
    /// `Conflict` if a command is already in flight for this session
    /// (§8's one-in-flight-per-session invariant, held across the lock).
    pub async fn dispatch(
        &self,
        org_id: OrgId,
        session_id: SessionId,
        agent_id: AgentId,
        action: CommandAction,
        payload: Value,
        issuing_replica_id: ReplicaId,
    ) -> Result<Command> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        if self.store.commands().in_flight_for_session(session_id).await?.is_some() {
            return Err(Error::Conflict(format!(
                "session {session_id} already has a command in flight"
            )));
        }

        let agent = match self.registry.locate(Some(org_id), agent_id).await {
            Ok(a) => a,
            Err(Error::NotFound) => self.registry.locate(None, agent_id).await?,
            Err(e) => return Err(e),
        };

        let command = Command {
            id: CommandId::new(),
            session_id,
            org_id,
            action,
            payload: payload.clone(),
            status: CommandStatus::Pending,
            issued_at: Utc::now(),
            acknowledged_at: None,
            completed_at: None,
            error: None,
            result: None,
            issuing_replica_id,
            target_agent_id: Some(agent_id),
        };
        let command = self.store.commands().insert(command).await?;

        let envelope = DispatchEnvelope {
            command_id: command.id,
            session_id,
            action,
            payload,
        };
        self.deliver(&agent, agent_id, envelope).await?;

        let command = self
            .store
            .commands()
            .cas_status(org_id, command.id, CommandStatus::Pending, CommandStatus::Dispatched, None, None)
            .await?;

        info!(command_id = %command.id, session_id = %session_id, action = ?action, "dispatched command");
        Ok(command)
    }

    /// Delivers a command the caller already inserted as `pending` —
    /// the coordinator's `create_session` inserts the session row and its
    /// initial `start_session` command in one transaction (§4.1), so by
    /// the time this runs the in-flight check `dispatch` performs would be
    /// redundant by construction. Still takes the session lock so a racing
    /// `dispatch` for the same session (there shouldn't be one, since the
    /// session was just created) cannot interleave.
    pub async fn dispatch_initial(&self, org_id: OrgId, command: Command, agent_id: AgentId) -> Result<Command> {
        let lock = self.session_lock(command.session_id);
        let _guard = lock.lock().await;

        let agent = match self.registry.locate(Some(org_id), agent_id).await {
            Ok(a) => a,
            Err(Error::NotFound) => self.registry.locate(None, agent_id).await?,
            Err(e) => return Err(e),
        };

        let envelope = DispatchEnvelope {
            command_id: command.id,
            session_id: command.session_id,
            action: command.action,
            payload: command.payload.clone(),
        };
        self.deliver(&agent, agent_id, envelope).await?;

        let command = self
            .store
            .commands()
            .cas_status(org_id, command.id, CommandStatus::Pending, CommandStatus::Dispatched, None, None)
            .await?;

        info!(command_id = %command.id, session_id = %command.session_id, "dispatched initial command");
        Ok(command)
    }

    async fn deliver(
        &self,
        agent: &streamspace_types::agent::Agent,
        agent_id: AgentId,
        envelope: DispatchEnvelope,
    ) -> Result<()> {
        if agent.connected_replica_id == Some(self.replica_id) {
            if let Some(sink) = self.local_sinks.get(&agent_id) {
                return sink
                    .send(envelope)
                    .await
                    .map_err(|_| streamspace_registry::unavailable(agent_id));
            }
        }
        let topic = Topic::AgentCommands(agent_id.to_string());
        let ttl = StdDuration::from_secs(30);
        self.bus.publish(&topic, &envelope, ttl).await.map_err(|e| Error::Upstream(e.to_string()))
    }

    /// Registers a waiter for `command_id` and blocks until the agent
    /// settles it (via [`Dispatcher::resolve`]) or `deadline` elapses, in
    /// which case the command is CASed to `timed_out` and that status is
    /// returned instead.
    pub async fn await_outcome(&self, org_id: OrgId, command_id: CommandId, deadline: StdDuration) -> Result<CommandOutcome> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(command_id, tx);

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(Error::Internal(format!("waiter for command {command_id} dropped"))),
            Err(_) => {
                self.waiters.remove(&command_id);
                self.time_out(org_id, command_id).await
            }
        }
    }

    async fn time_out(&self, org_id: OrgId, command_id: CommandId) -> Result<CommandOutcome> {
        let current = self.store.commands().get(org_id, command_id).await?;
        if current.status.is_terminal() {
            return Ok(CommandOutcome {
                status: current.status,
                error: current.error,
                result: current.result,
            });
        }
        self.store
            .commands()
            .cas_status(org_id, command_id, current.status, CommandStatus::TimedOut, Some("deadline exceeded".to_string()), None)
            .await?;
        Err(Error::CommandTimedOut)
    }

    /// Called by the gateway's inbound loop when an `ack`/`complete`/
    /// `failed` frame arrives for `command_id`. CASes the store and wakes
    /// any local waiter; a waiter registered on a different replica than
    /// the one that received the agent's reply is, by construction, on
    /// the same replica as `issuing_replica_id` reading from the bus in a
    /// future iteration — out of scope here since this workspace routes
    /// the issuing and settling path through the same replica via C6/C7.
    pub async fn resolve(
        &self,
        org_id: OrgId,
        command_id: CommandId,
        next: CommandStatus,
        error: Option<String>,
        result: Option<Value>,
    ) -> Result<Command> {
        let current = self.store.commands().get(org_id, command_id).await?;
        let command = self
            .store
            .commands()
            .cas_status(org_id, command_id, current.status, next, error.clone(), result.clone())
            .await?;

        if let Some((_, tx)) = self.waiters.remove(&command_id) {
            let _ = tx.send(CommandOutcome { status: next, error, result });
        }
        Ok(command)
    }

    /// Drains whatever command currently occupies the session's in-flight
    /// slot, if any, so a caller that needs the slot free (§4.5:
    /// "any in-flight commands cancelled before issuing `stop_session`")
    /// doesn't have to fail closed on `dispatch`'s `Conflict`. Waits up to
    /// `deadline` for the agent (or the timeout sweeper) to settle it;
    /// returns `Ok(None)` immediately if the session had nothing in flight.
    pub async fn await_in_flight_for_session(
        &self,
        org_id: OrgId,
        session_id: SessionId,
        deadline: StdDuration,
    ) -> Result<Option<CommandOutcome>> {
        let Some(command) = self.store.commands().in_flight_for_session(session_id).await? else {
            return Ok(None);
        };
        self.await_outcome(org_id, command.id, deadline).await.map(Some)
    }

    /// Periodic sweep: finds commands past their per-action deadline and
    /// times them out. Safe to call from multiple replicas concurrently —
    /// the CAS in `cas_status` makes a double-sweep a no-op on the loser.
    pub async fn sweep_timeouts(&self, now: DateTime<Utc>) -> Result<Vec<CommandId>> {
        let overdue = self.store.commands().overdue(now).await?;
        let mut timed_out = Vec::with_capacity(overdue.len());
        for command in overdue {
            let result = self
                .store
                .commands()
                .cas_status(
                    command.org_id,
                    command.id,
                    command.status,
                    CommandStatus::TimedOut,
                    Some("deadline exceeded".to_string()),
                    None,
                )
                .await;
            match result {
                Ok(_) => {
                    if let Some((_, tx)) = self.waiters.remove(&command.id) {
                        let _ = tx.send(CommandOutcome {
                            status: CommandStatus::TimedOut,
                            error: Some("deadline exceeded".to_string()),
                            result: None,
                        });
                    }
                    timed_out.push(command.id);
                }
                Err(Error::Conflict(_)) => {
                    // Another replica already settled or timed it out first.
                }
                Err(e) => warn!(command_id = %command.id, error = %e, "failed to time out overdue command"),
            }
        }
        Ok(timed_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamspace_bus::LocalBus;
    use streamspace_store::fake::FakeStore;
    use streamspace_types::agent::{AgentDescriptor, Platform};
    use std::collections::BTreeMap;

    async fn harness() -> (Arc<Dispatcher>, Arc<Registry>, OrgId) {
        let store: Arc<dyn Store> = Arc::new(FakeStore::default());
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let replica_id = ReplicaId::new();
        let registry = Registry::new(store.clone(), bus.clone(), replica_id);
        let dispatcher = Dispatcher::new(store, bus, registry.clone(), replica_id);
        (dispatcher, registry, OrgId::new())
    }

    #[tokio::test]
    async fn second_dispatch_on_same_session_conflicts() {
        let (dispatcher, registry, org_id) = harness().await;
        let agent = registry
            .register(AgentDescriptor {
                org_id: Some(org_id),
                platform: Platform::Docker,
                stable_key: "host-1".to_string(),
                labels: BTreeMap::new(),
                capacity: 2,
            })
            .await
            .unwrap();
        registry.bind(agent.id).await.unwrap();
        dispatcher.register_local_sink(agent.id, mpsc::channel(8).0);

        let session_id = SessionId::new();
        let replica_id = registry.replica_id();
        dispatcher
            .dispatch(org_id, session_id, agent.id, CommandAction::StartSession, serde_json::json!({}), replica_id)
            .await
            .unwrap();

        let second = dispatcher
            .dispatch(org_id, session_id, agent.id, CommandAction::StopSession, serde_json::json!({}), replica_id)
            .await;
        assert!(matches!(second, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn resolve_wakes_a_waiting_caller() {
        let (dispatcher, registry, org_id) = harness().await;
        let agent = registry
            .register(AgentDescriptor {
                org_id: Some(org_id),
                platform: Platform::Docker,
                stable_key: "host-2".to_string(),
                labels: BTreeMap::new(),
                capacity: 2,
            })
            .await
            .unwrap();
        registry.bind(agent.id).await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        dispatcher.register_local_sink(agent.id, tx);

        let session_id = SessionId::new();
        let replica_id = registry.replica_id();
        let command = dispatcher
            .dispatch(org_id, session_id, agent.id, CommandAction::HibernateSession, serde_json::json!({}), replica_id)
            .await
            .unwrap();
        assert!(rx.recv().await.is_some());

        let dispatcher2 = dispatcher.clone();
        let command_id = command.id;
        let waiter = tokio::spawn(async move {
            dispatcher2.await_outcome(org_id, command_id, StdDuration::from_secs(5)).await
        });

        dispatcher
            .resolve(org_id, command.id, CommandStatus::Completed, None, None)
            .await
            .unwrap();

        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome.status, CommandStatus::Completed);
    }
}
