//! Session Coordinator (C5): drives the session state machine from
//! `SessionState::allowed_transitions`, gates creation on quota, and
//! reconciles desired vs. reported state.
//!
//! Has no direct teacher analog — the teacher has no durable session
//! concept, only ephemeral tunnel sessions torn down on disconnect — so
//! this module is grounded on spec.md §4.5's state table and built in the
//! idiom the rest of the workspace established (an `Arc`-held struct over
//! `streamspace-store`/`streamspace-dispatcher`, `tracing` spans, typed
//! errors propagated with `?`).

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use streamspace_bus::{Bus, BusExt, Topic};
use streamspace_dispatcher::Dispatcher;
use streamspace_registry::Registry;
use streamspace_store::Store;
use streamspace_types::{
    command::{Command, CommandAction, CommandStatus},
    ids::{AgentId, OrgId, ReplicaId, SessionId, UserId},
    session::{Condition, ConditionKind, Session, SessionEvent, SessionState, TemplateRef},
    Error, Result,
};
use streamspace_vnc_proxy::VncProxy;
use tracing::{info, warn};

pub struct Coordinator {
    store: Arc<dyn Store>,
    bus: Arc<dyn Bus>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<Registry>,
    vnc_proxy: Arc<VncProxy>,
    replica_id: ReplicaId,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<dyn Bus>,
        dispatcher: Arc<Dispatcher>,
        registry: Arc<Registry>,
        vnc_proxy: Arc<VncProxy>,
        replica_id: ReplicaId,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            dispatcher,
            registry,
            vnc_proxy,
            replica_id,
        })
    }

    /// Fans `session` out on `session.events.<org_id>` for C9's push-stream
    /// channel. Best-effort: a publish failure is logged, never propagated
    /// — a subscriber missing one event still catches up on its next GET.
    async fn publish_event(&self, session: &Session) {
        let topic = Topic::SessionEvents(session.org_id.to_string());
        let event = SessionEvent::from_session(session);
        if let Err(e) = self.bus.publish(&topic, &event, StdDuration::from_secs(30)).await {
            warn!(session_id = %session.id, error = %e, "failed to publish session event");
        }
    }

    /// §4.1: quota check, pick an eligible agent, insert session + initial
    /// `start_session` command transactionally, then dispatch. If no agent
    /// is eligible the session is never created — `AgentUnavailable`
    /// propagates before any row is written.
    pub async fn create_session(
        &self,
        org_id: OrgId,
        user_id: UserId,
        template_ref: TemplateRef,
        namespace: String,
        platform_metadata: Value,
        quota_limit: u32,
    ) -> Result<Session> {
        let agent = self.pick_agent(org_id).await?;

        let now = Utc::now();
        let session = Session {
            id: SessionId::new(),
            org_id,
            user_id,
            template_ref,
            agent_id: Some(agent.id),
            namespace,
            state: SessionState::Pending,
            desired_state: SessionState::Running,
            platform_metadata,
            vnc_ready: false,
            vnc_endpoint: None,
            created_at: now,
            last_activity_at: now,
            conditions: Vec::new(),
            shared_user_ids: Vec::new(),
        };
        let initial_command = Command {
            id: streamspace_types::ids::CommandId::new(),
            session_id: session.id,
            org_id,
            action: CommandAction::StartSession,
            payload: serde_json::json!({}),
            status: CommandStatus::Pending,
            issued_at: now,
            acknowledged_at: None,
            completed_at: None,
            error: None,
            result: None,
            issuing_replica_id: self.replica_id,
            target_agent_id: Some(agent.id),
        };

        let (session, command) = self
            .store
            .sessions()
            .create_with_initial_command(session, initial_command, quota_limit)
            .await?;

        match self.dispatcher.dispatch_initial(org_id, command, agent.id).await {
            Ok(_) => {
                let session = self
                    .store
                    .sessions()
                    .cas_state(org_id, session.id, SessionState::Pending, SessionState::Starting)
                    .await?;
                info!(session_id = %session.id, agent_id = %agent.id, "session starting");
                self.publish_event(&session).await;
                Ok(session)
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "failed to dispatch initial start_session command");
                let session = self
                    .store
                    .sessions()
                    .cas_state(org_id, session.id, SessionState::Pending, SessionState::Failed)
                    .await?;
                self.publish_event(&session).await;
                Err(e)
            }
        }
    }

    async fn pick_agent(&self, org_id: OrgId) -> Result<streamspace_types::agent::Agent> {
        let candidates = self.registry.list_eligible(org_id).await?;
        for agent in candidates {
            let current = self.store.sessions().list_by_agent(agent.id).await?.len() as u32;
            if agent.accepts_new_sessions(current) {
                return Ok(agent);
            }
        }
        Err(Error::AgentUnavailable(format!("no eligible agent for org {org_id}")))
    }

    pub async fn get(&self, org_id: OrgId, id: SessionId) -> Result<Session> {
        self.store.sessions().get(org_id, id).await
    }

    pub async fn list(&self, org_id: OrgId, filter: streamspace_store::SessionFilter) -> Result<Vec<Session>> {
        self.store.sessions().list(org_id, filter).await
    }

    /// Grants `user_id` collaboration access to a session; the caller's own
    /// `session.share` permission is checked by C8/C9 before this is
    /// reached, not here.
    pub async fn share_session(&self, org_id: OrgId, id: SessionId, user_id: UserId) -> Result<Session> {
        self.store.sessions().share(org_id, id, user_id).await
    }

    /// Running -> Hibernated. Dispatches `hibernate_session`; on failure the
    /// session stays `Running` with a `CommandTimedOut`/`AgentUnreachable`
    /// condition for the reconciler to retry.
    pub async fn hibernate_session(&self, org_id: OrgId, id: SessionId, deadline: StdDuration) -> Result<Session> {
        let session = self.store.sessions().get(org_id, id).await?;
        if session.state != SessionState::Running {
            return Err(Error::Conflict(format!(
                "session {id} is {:?}, not running", session.state
            )));
        }
        self.store.sessions().set_desired_state(org_id, id, SessionState::Hibernated).await?;

        let agent_id = session.agent_id.ok_or_else(|| Error::Internal(format!("session {id} has no agent")))?;
        match self.run_command(org_id, id, agent_id, CommandAction::HibernateSession, deadline).await {
            Ok(_) => {
                let session = self.store.sessions().cas_state(org_id, id, SessionState::Running, SessionState::Hibernated).await?;
                self.vnc_proxy.close_for_session(org_id, id, "session hibernated").await;
                self.publish_event(&session).await;
                Ok(session)
            }
            Err(e) => {
                self.raise_condition(org_id, id, ConditionKind::CommandTimedOut, e.to_string()).await?;
                Err(e)
            }
        }
    }

    /// Hibernated -> Waking -> Running (or back to Hibernated on failure).
    pub async fn wake_session(&self, org_id: OrgId, id: SessionId, deadline: StdDuration) -> Result<Session> {
        let session = self.store.sessions().get(org_id, id).await?;
        if session.state != SessionState::Hibernated {
            return Err(Error::Conflict(format!(
                "session {id} is {:?}, not hibernated", session.state
            )));
        }
        self.store.sessions().set_desired_state(org_id, id, SessionState::Running).await?;
        self.store.sessions().cas_state(org_id, id, SessionState::Hibernated, SessionState::Waking).await?;

        let agent_id = session.agent_id.ok_or_else(|| Error::Internal(format!("session {id} has no agent")))?;
        match self.run_command(org_id, id, agent_id, CommandAction::WakeSession, deadline).await {
            Ok(_) => {
                let session = self.store.sessions().cas_state(org_id, id, SessionState::Waking, SessionState::Running).await?;
                self.publish_event(&session).await;
                Ok(session)
            }
            Err(e) => {
                self.raise_condition(org_id, id, ConditionKind::CommandTimedOut, e.to_string()).await?;
                let session = self.store.sessions().cas_state(org_id, id, SessionState::Waking, SessionState::Hibernated).await?;
                self.publish_event(&session).await;
                Err(e)
            }
        }
    }

    /// Any live state -> Terminating -> Terminated, per user request or a
    /// quota sweep (the sweep's policy lives in the caller; this just
    /// performs the transition once asked).
    pub async fn terminate_session(&self, org_id: OrgId, id: SessionId, deadline: StdDuration) -> Result<Session> {
        let session = self.store.sessions().get(org_id, id).await?;
        if session.state.is_terminal() {
            return Ok(session);
        }
        self.store.sessions().set_desired_state(org_id, id, SessionState::Terminated).await?;
        let terminating = self.store.sessions().cas_state(org_id, id, session.state, SessionState::Terminating).await?;
        self.vnc_proxy.close_for_session(org_id, id, "session terminating").await;
        self.publish_event(&terminating).await;

        if let Some(agent_id) = session.agent_id {
            // §4.5: any in-flight command is drained before stop_session is
            // issued, so dispatch doesn't fail closed on the one-in-flight
            // invariant. Best-effort: a timed-out drain still proceeds to
            // dispatch stop_session below rather than leaving the container
            // running.
            if let Err(e) = self.dispatcher.await_in_flight_for_session(org_id, id, deadline).await {
                warn!(session_id = %id, error = %e, "in-flight command did not settle before terminate");
            }

            // Best-effort: a failed stop_session still results in
            // `terminated` on our side, the agent's own reconciliation
            // against its platform is out of scope (C10).
            if let Err(e) = self.run_command(org_id, id, agent_id, CommandAction::StopSession, deadline).await {
                warn!(session_id = %id, error = %e, "stop_session did not complete cleanly");
            }
        }
        let session = self.store.sessions().cas_state(org_id, id, SessionState::Terminating, SessionState::Terminated).await?;
        self.publish_event(&session).await;
        Ok(session)
    }

    async fn run_command(
        &self,
        org_id: OrgId,
        session_id: SessionId,
        agent_id: AgentId,
        action: CommandAction,
        deadline: StdDuration,
    ) -> Result<streamspace_dispatcher::CommandOutcome> {
        let command = self
            .dispatcher
            .dispatch(org_id, session_id, agent_id, action, serde_json::json!({}), self.replica_id)
            .await?;
        let outcome = self.dispatcher.await_outcome(org_id, command.id, deadline).await?;
        if outcome.status == CommandStatus::Failed {
            return Err(Error::Upstream(outcome.error.unwrap_or_else(|| format!("{action:?} failed"))));
        }
        Ok(outcome)
    }

    async fn raise_condition(&self, org_id: OrgId, id: SessionId, kind: ConditionKind, message: String) -> Result<()> {
        self.store
            .sessions()
            .add_condition(
                org_id,
                id,
                Condition {
                    kind,
                    message,
                    set_at: Utc::now(),
                    cleared_at: None,
                },
            )
            .await
    }

    /// Marks every session owned by a now-unreachable agent with an
    /// `AgentUnreachable` condition, for the registry's heartbeat sweeper
    /// to call once it transitions an agent `offline`.
    pub async fn mark_agent_unreachable(&self, agent_id: AgentId) -> Result<()> {
        let sessions = self.store.sessions().list_by_agent(agent_id).await?;
        for session in sessions {
            if session.state.is_live() {
                self.raise_condition(session.org_id, session.id, ConditionKind::AgentUnreachable, format!("agent {agent_id} missed its heartbeat deadline")).await?;
                self.vnc_proxy.close_for_session(session.org_id, session.id, "agent unreachable").await;
            }
        }
        Ok(())
    }

    /// The reconciliation loop's single pass: sessions whose desired state
    /// diverges from reported state and have settled past `settle` get
    /// nudged toward their desired state, provided no command is already
    /// in flight for them.
    pub async fn reconcile_once(&self, settle: ChronoDuration, deadline: StdDuration) -> Result<usize> {
        let candidates = self.store.sessions().needing_reconciliation(settle).await?;
        let mut acted = 0;
        for session in candidates {
            if self.store.commands().in_flight_for_session(session.id).await?.is_some() {
                continue;
            }
            let outcome = match (session.state, session.desired_state) {
                (SessionState::Hibernated, SessionState::Running) => {
                    self.wake_session(session.org_id, session.id, deadline).await
                }
                (SessionState::Running, SessionState::Hibernated) => {
                    self.hibernate_session(session.org_id, session.id, deadline).await
                }
                (_, SessionState::Terminated) if session.state.is_live() => {
                    self.terminate_session(session.org_id, session.id, deadline).await
                }
                _ => continue,
            };
            match outcome {
                Ok(_) => acted += 1,
                Err(e) => warn!(session_id = %session.id, error = %e, "reconciliation step failed"),
            }
        }
        Ok(acted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamspace_agent_gateway::{Gateway, NullVncHandler};
    use streamspace_auth::AuthGate;
    use streamspace_bus::LocalBus;
    use streamspace_store::fake::FakeStore;
    use streamspace_types::agent::{AgentDescriptor, Platform};
    use std::collections::BTreeMap;

    async fn harness() -> (Arc<Coordinator>, Arc<Registry>, OrgId) {
        let store: Arc<dyn Store> = Arc::new(FakeStore::default());
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let replica_id = ReplicaId::new();
        let registry = Registry::new(store.clone(), bus.clone(), replica_id);
        let dispatcher = Dispatcher::new(store.clone(), bus.clone(), registry.clone(), replica_id);
        let auth = AuthGate::new(store.clone(), "test-secret".to_string());
        let config = Arc::new(streamspace_config::Config::default());
        let gateway = Gateway::new(store.clone(), dispatcher.clone(), registry.clone(), auth, Arc::new(NullVncHandler), config.clone());
        let vnc_proxy = VncProxy::new(store.clone(), bus.clone(), dispatcher.clone(), gateway, config, replica_id);
        let coordinator = Coordinator::new(store, bus, dispatcher, registry.clone(), vnc_proxy, replica_id);
        (coordinator, registry, OrgId::new())
    }

    #[tokio::test]
    async fn create_session_without_an_agent_fails_closed() {
        let (coordinator, _registry, org_id) = harness().await;
        let err = coordinator
            .create_session(
                org_id,
                UserId::new(),
                TemplateRef { name: "desktop".into(), version: "1".into() },
                "ns".into(),
                serde_json::json!({}),
                5,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AgentUnavailable(_)));
    }

    #[tokio::test]
    async fn create_session_dispatches_and_advances_to_starting() {
        let (coordinator, registry, org_id) = harness().await;
        let agent = registry
            .register(AgentDescriptor {
                org_id: Some(org_id),
                platform: Platform::Kubernetes,
                stable_key: "node-1".into(),
                labels: BTreeMap::new(),
                capacity: 3,
            })
            .await
            .unwrap();
        registry.bind(agent.id).await.unwrap();
        coordinator.dispatcher.register_local_sink(agent.id, tokio::sync::mpsc::channel(8).0);

        let session = coordinator
            .create_session(
                org_id,
                UserId::new(),
                TemplateRef { name: "desktop".into(), version: "1".into() },
                "ns".into(),
                serde_json::json!({}),
                5,
            )
            .await
            .unwrap();
        assert_eq!(session.state, SessionState::Starting);
    }

    #[tokio::test]
    async fn quota_exceeded_blocks_a_third_session() {
        let (coordinator, registry, org_id) = harness().await;
        let agent = registry
            .register(AgentDescriptor {
                org_id: Some(org_id),
                platform: Platform::Kubernetes,
                stable_key: "node-2".into(),
                labels: BTreeMap::new(),
                capacity: 10,
            })
            .await
            .unwrap();
        registry.bind(agent.id).await.unwrap();
        coordinator.dispatcher.register_local_sink(agent.id, tokio::sync::mpsc::channel(8).0);
        let user_id = UserId::new();

        for _ in 0..1 {
            coordinator
                .create_session(org_id, user_id, TemplateRef { name: "d".into(), version: "1".into() }, "ns".into(), serde_json::json!({}), 1)
                .await
                .unwrap();
        }

        let err = coordinator
            .create_session(org_id, user_id, TemplateRef { name: "d".into(), version: "1".into() }, "ns".into(), serde_json::json!({}), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded(_)));
    }
}
