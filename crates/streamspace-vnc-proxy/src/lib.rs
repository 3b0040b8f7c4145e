//! VNC Proxy (C7): opens the tunnel between a browser client's WebSocket
//! and an agent's VNC segment stream, then pumps data in both directions
//! until either side closes, the session leaves `running`, the agent
//! reports `vnc_error`, or the tunnel sits idle past `T_tunnel_idle`.
//!
//! Grounded on the teacher's `StreamOpen`/`StreamClose`/`Data` relay-by-role
//! logic in `handlers.rs` (`relay_message` and `handle_message`'s `Data`
//! arm), generalized from "relay to the other connection on this replica"
//! to "relay directly when both sides are local, otherwise bridge through
//! `tunnel.ingress.<id>` / `tunnel.egress.<id>` bus topics" — a tunnel's two
//! endpoints (browser client, agent connection) can each be bound to a
//! different replica.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use base64::Engine;
use chrono::Utc;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration as StdDuration;
use streamspace_agent_gateway::protocol::ControlToAgent;
use streamspace_agent_gateway::{Gateway, VncInboundHandler};
use streamspace_auth::Principal;
use streamspace_bus::{decode, Bus, BusExt, Topic};
use streamspace_config::Config;
use streamspace_dispatcher::Dispatcher;
use streamspace_store::Store;
use streamspace_types::{
    command::CommandAction,
    ids::{AgentId, ConnectionId, OrgId, ReplicaId, SessionId, TunnelId, UserId},
    permission::Permission,
    session::SessionState,
    tunnel::{TunnelState, VncTunnel},
    user::OrgRole,
    Error, Result,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// `OrgAdmin`/`Maintainer` may open any session's stream; everyone else
/// needs to own the session or hold a collaboration share, mirrored from
/// the same rule `streamspace-api`'s session handlers apply.
fn is_visible(principal: &Principal, session: &streamspace_types::session::Session) -> bool {
    let privileged = matches!(principal.org_role, Some(OrgRole::OrgAdmin) | Some(OrgRole::Maintainer));
    let Ok(user_id) = Uuid::parse_str(&principal.actor_id).map(UserId) else {
        return false;
    };
    session.is_visible_to(user_id, privileged)
}

fn b64_encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn b64_decode(data: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(data)
}

/// What the agent told us once its local VNC listener was bound.
struct VncReadyInfo {
    local_port: u16,
}

/// State kept while this replica owns the *agent* side of a tunnel: set up
/// in [`VncProxy::on_vnc_ready`], torn down in [`VncProxy::close`].
struct AgentSide {
    cancel: CancellationToken,
}

/// State kept while this replica owns the *client* WebSocket side of a
/// tunnel: the egress channel the bus-subscription or local-delivery path
/// feeds, and the dedup counter for strictly-increasing sequence numbers.
struct ClientSide {
    egress_tx: mpsc::Sender<Vec<u8>>,
    next_seq: Arc<AtomicU64>,
    cancel: CancellationToken,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct IngressFrame {
    seq: u64,
    data: String,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct EgressFrame {
    seq: u64,
    data: String,
}

pub struct VncProxy {
    store: Arc<dyn Store>,
    bus: Arc<dyn Bus>,
    dispatcher: Arc<Dispatcher>,
    gateway: Arc<Gateway>,
    config: Arc<Config>,
    replica_id: ReplicaId,
    /// Lets a `&self` trait method (fixed by [`VncInboundHandler`]'s
    /// signature) obtain an owned `Arc<Self>` to spawn 'static background
    /// tasks from, the same self-referential-`Arc` shape `Arc::new_cyclic`
    /// exists for.
    self_ref: Weak<VncProxy>,
    ready_waiters: DashMap<TunnelId, oneshot::Sender<VncReadyInfo>>,
    agent_side: DashMap<TunnelId, AgentSide>,
    client_side: DashMap<TunnelId, ClientSide>,
}

impl VncProxy {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<dyn Bus>,
        dispatcher: Arc<Dispatcher>,
        gateway: Arc<Gateway>,
        config: Arc<Config>,
        replica_id: ReplicaId,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            store,
            bus,
            dispatcher,
            gateway,
            config,
            replica_id,
            self_ref: self_ref.clone(),
            ready_waiters: DashMap::new(),
            agent_side: DashMap::new(),
            client_side: DashMap::new(),
        })
    }

    /// Authenticates the request, opens a tunnel row, dispatches
    /// `open_vnc_tunnel`, and upgrades `socket` once the agent reports
    /// `vnc_ready`. Runs the pump loop itself and returns only once the
    /// tunnel has closed.
    pub async fn serve(self: &Arc<Self>, principal: &Principal, session_id: SessionId, socket: WebSocket) {
        let org_id = principal.org_id;
        let tunnel = match self.open(principal, session_id).await {
            Ok(t) => t,
            Err(e) => {
                warn!(%session_id, error = %e, "vnc tunnel open rejected");
                let mut socket = socket;
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
        };

        info!(tunnel_id = %tunnel.id, %session_id, "vnc tunnel open, starting pump");
        self.pump(org_id, tunnel, socket).await;
    }

    /// Verifies the caller's permission and the session's state, opens the
    /// tunnel row, dispatches `open_vnc_tunnel`, and blocks until the
    /// agent's `vnc_ready` frame arrives or `T_tunnel_open` elapses.
    async fn open(&self, principal: &Principal, session_id: SessionId) -> Result<VncTunnel> {
        principal.require(Permission::SessionRead)?;
        let org_id = principal.org_id;

        let session = self.store.sessions().get(org_id, session_id).await?;
        if !is_visible(principal, &session) {
            return Err(Error::NotFound);
        }
        if session.state != SessionState::Running {
            return Err(Error::Conflict(format!(
                "session {session_id} is {:?}, not running",
                session.state
            )));
        }
        let agent_id = session
            .agent_id
            .ok_or_else(|| Error::Internal(format!("running session {session_id} has no agent")))?;

        let tunnel = VncTunnel {
            id: TunnelId::new(),
            session_id,
            org_id,
            agent_id,
            client_connection_id: ConnectionId::new(),
            state: TunnelState::Opening,
            opened_at: Utc::now(),
            closed_at: None,
        };
        let tunnel = self.store.tunnels().open(tunnel).await?;

        let (ready_tx, ready_rx) = oneshot::channel();
        self.ready_waiters.insert(tunnel.id, ready_tx);

        let payload = serde_json::json!({ "tunnel_id": tunnel.id });
        if let Err(e) = self
            .dispatcher
            .dispatch(org_id, session_id, agent_id, CommandAction::OpenVncTunnel, payload, self.replica_id)
            .await
        {
            self.ready_waiters.remove(&tunnel.id);
            let _ = self.store.tunnels().cas_state(org_id, tunnel.id, TunnelState::Error).await;
            return Err(e);
        }

        let deadline = self.config.command_timeouts.tunnel_open();
        let ready = match tokio::time::timeout(deadline, ready_rx).await {
            Ok(Ok(ready)) => ready,
            _ => {
                self.ready_waiters.remove(&tunnel.id);
                let _ = self.store.tunnels().cas_state(org_id, tunnel.id, TunnelState::Error).await;
                return Err(Error::CommandTimedOut);
            }
        };

        info!(tunnel_id = %tunnel.id, local_port = ready.local_port, "agent reported vnc_ready");
        self.store.tunnels().cas_state(org_id, tunnel.id, TunnelState::Ready).await
    }

    /// Runs the bidirectional pump for an already-`ready` tunnel until the
    /// client disconnects, the tunnel is closed from elsewhere, or
    /// `T_tunnel_idle` passes with no traffic.
    async fn pump(self: &Arc<Self>, org_id: OrgId, tunnel: VncTunnel, socket: WebSocket) {
        let (mut ws_sink, mut ws_stream) = socket.split();
        let (egress_tx, mut egress_rx) = mpsc::channel::<Vec<u8>>(self.config.vnc_queue_depth);
        let cancel = CancellationToken::new();

        self.client_side.insert(
            tunnel.id,
            ClientSide { egress_tx, next_seq: Arc::new(AtomicU64::new(0)), cancel: cancel.clone() },
        );
        self.ensure_egress_subscription(org_id, tunnel.id, cancel.clone());

        let idle = self.config.tunnel_idle();
        let mut ingress_seq: u64 = 0;
        let mut close_reason = "client_disconnect";

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    close_reason = "closed_elsewhere";
                    break;
                }
                _ = tokio::time::sleep(idle) => {
                    close_reason = "idle_timeout";
                    break;
                }
                egress = egress_rx.recv() => {
                    match egress {
                        Some(bytes) => {
                            if ws_sink.send(Message::Binary(bytes.into())).await.is_err() {
                                close_reason = "client_send_failed";
                                break;
                            }
                        }
                        None => {
                            close_reason = "egress_channel_closed";
                            break;
                        }
                    }
                }
                inbound = ws_stream.next() => {
                    match inbound {
                        Some(Ok(Message::Binary(bytes))) => {
                            let data = b64_encode(&bytes);
                            self.send_to_agent(tunnel.id, tunnel.agent_id, ingress_seq, data).await;
                            ingress_seq += 1;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            warn!(tunnel_id = %tunnel.id, error = %e, "client websocket error");
                            break;
                        }
                    }
                }
            }
        }

        self.close(org_id, tunnel.id, close_reason).await;
    }

    /// Sends a VNC segment toward the agent owning `agent_id`. Tries the
    /// direct path first (the agent is connected to this replica); falls
    /// back to `tunnel.ingress.<id>` for a remote agent.
    async fn send_to_agent(&self, tunnel_id: TunnelId, agent_id: AgentId, seq: u64, data: String) {
        let msg = ControlToAgent::VncData { tunnel_id, seq, data: data.clone() };
        if self.gateway.send_vnc(agent_id, msg) {
            return;
        }
        let topic = Topic::TunnelIngress(tunnel_id.to_string());
        if let Err(e) = self.bus.publish(&topic, &IngressFrame { seq, data }, StdDuration::from_secs(30)).await {
            warn!(%tunnel_id, error = %e, "failed to publish vnc ingress frame");
        }
    }

    /// Delivers an egress segment to the client WebSocket owned by this
    /// replica, enforcing the strictly-increasing sequence invariant — a
    /// gap closes the tunnel (§4's "sequence numbers: strictly increasing
    /// on egress, gap closes the tunnel").
    async fn deliver_to_client(&self, org_id: OrgId, tunnel_id: TunnelId, seq: u64, data: String) {
        let Some(client) = self.client_side.get(&tunnel_id) else {
            return;
        };
        let expected = client.next_seq.load(Ordering::Acquire);
        if seq != expected {
            warn!(%tunnel_id, expected, got = seq, "vnc sequence gap, closing tunnel");
            client.cancel.cancel();
            drop(client);
            self.close(org_id, tunnel_id, "sequence_gap").await;
            return;
        }
        client.next_seq.store(seq + 1, Ordering::Release);
        let bytes = match b64_decode(&data) {
            Ok(b) => b,
            Err(e) => {
                warn!(%tunnel_id, error = %e, "malformed base64 vnc segment");
                return;
            }
        };
        let _ = client.egress_tx.try_send(bytes);
    }

    /// Subscribes (once, per tunnel) to this tunnel's egress bus topic so a
    /// remote agent's data reaches the client connection this replica
    /// owns. Same-replica delivery never touches the bus — see
    /// [`Self::on_vnc_data`]'s local-sink check.
    fn ensure_egress_subscription(self: &Arc<Self>, org_id: OrgId, tunnel_id: TunnelId, cancel: CancellationToken) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let topic = Topic::TunnelEgress(tunnel_id.to_string()).to_string();
            let mut rx = match this.bus.subscribe_raw(&topic).await {
                Ok(rx) => rx,
                Err(e) => {
                    warn!(%tunnel_id, error = %e, "failed to subscribe to tunnel egress topic");
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    delivery = rx.recv() => {
                        match delivery {
                            Some(delivery) => {
                                if let Ok(frame) = decode::<EgressFrame>(&delivery) {
                                    this.deliver_to_client(org_id, tunnel_id, frame.seq, frame.data).await;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });
    }

    /// Subscribes (once, per tunnel) to `tunnel.ingress.<id>` on the
    /// replica that owns the agent-side connection, relaying each frame
    /// into the agent's own VNC queue via [`Gateway::send_vnc`].
    fn ensure_ingress_subscription(self: &Arc<Self>, tunnel_id: TunnelId, agent_id: AgentId, cancel: CancellationToken) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let topic = Topic::TunnelIngress(tunnel_id.to_string()).to_string();
            let mut rx = match this.bus.subscribe_raw(&topic).await {
                Ok(rx) => rx,
                Err(e) => {
                    warn!(%tunnel_id, error = %e, "failed to subscribe to tunnel ingress topic");
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    delivery = rx.recv() => {
                        match delivery {
                            Some(delivery) => {
                                if let Ok(frame) = decode::<IngressFrame>(&delivery) {
                                    this.gateway.send_vnc(agent_id, ControlToAgent::VncData {
                                        tunnel_id,
                                        seq: frame.seq,
                                        data: frame.data,
                                    });
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });
    }

    /// Looks up the session's live tunnel, if any, and closes it. Called by
    /// the coordinator whenever a session leaves `running` (hibernate,
    /// terminate, agent becomes unreachable) per the close-condition list:
    /// safe to call from whichever replica drove the transition, since
    /// `close` dispatches `close_vnc_tunnel` to the agent's owning replica
    /// regardless of where the client side of the tunnel lives.
    pub async fn close_for_session(&self, org_id: OrgId, session_id: SessionId, reason: &str) {
        match self.store.tunnels().get_live_for_session(org_id, session_id).await {
            Ok(Some(tunnel)) => self.close(org_id, tunnel.id, reason).await,
            Ok(None) => {}
            Err(e) => warn!(%session_id, error = %e, "failed to look up live tunnel to close"),
        }
    }

    /// Closes a tunnel: CASes it to `closed`, best-effort dispatches
    /// `close_vnc_tunnel`, and drops whatever local pump state this
    /// replica held for either side.
    pub async fn close(&self, org_id: OrgId, tunnel_id: TunnelId, reason: &str) {
        info!(%tunnel_id, reason, "closing vnc tunnel");
        self.ready_waiters.remove(&tunnel_id);

        if let Some((_, client)) = self.client_side.remove(&tunnel_id) {
            client.cancel.cancel();
        }
        if let Some((_, agent)) = self.agent_side.remove(&tunnel_id) {
            agent.cancel.cancel();
        }

        let Ok(tunnel) = self.store.tunnels().get(org_id, tunnel_id).await else {
            return;
        };
        if !tunnel.state.is_live() {
            return;
        }
        let _ = self.store.tunnels().cas_state(org_id, tunnel_id, TunnelState::Closed).await;

        let payload = serde_json::json!({ "tunnel_id": tunnel_id });
        let deadline = self.config.command_timeouts.tunnel_open();
        if let Ok(cmd) = self
            .dispatcher
            .dispatch(org_id, tunnel.session_id, tunnel.agent_id, CommandAction::CloseVncTunnel, payload, self.replica_id)
            .await
        {
            let _ = self.dispatcher.await_outcome(org_id, cmd.id, deadline).await;
        }
    }
}

#[async_trait]
impl VncInboundHandler for VncProxy {
    async fn on_vnc_ready(&self, agent_id: AgentId, org_id: Option<OrgId>, _session_id: SessionId, tunnel_id: TunnelId, local_port: u16) {
        if let Some((_, tx)) = self.ready_waiters.remove(&tunnel_id) {
            let _ = tx.send(VncReadyInfo { local_port });
        }
        let Some(this) = self.self_ref.upgrade() else { return };
        let cancel = CancellationToken::new();
        this.agent_side.insert(tunnel_id, AgentSide { cancel: cancel.clone() });
        this.ensure_ingress_subscription(tunnel_id, agent_id, cancel);
        let _ = org_id;
    }

    async fn on_vnc_data(&self, _agent_id: AgentId, org_id: Option<OrgId>, tunnel_id: TunnelId, seq: u64, data: String) {
        let Some(org_id) = org_id else {
            warn!(%tunnel_id, "vnc_data from a pool-shared agent connection, dropping: no org scope to deliver under");
            return;
        };
        if self.client_side.contains_key(&tunnel_id) {
            self.deliver_to_client(org_id, tunnel_id, seq, data).await;
            return;
        }
        let topic = Topic::TunnelEgress(tunnel_id.to_string());
        if let Err(e) = self.bus.publish(&topic, &EgressFrame { seq, data }, StdDuration::from_secs(30)).await {
            warn!(%tunnel_id, error = %e, "failed to publish vnc egress frame");
        }
    }

    async fn on_vnc_error(&self, _agent_id: AgentId, org_id: Option<OrgId>, tunnel_id: TunnelId, message: String) {
        warn!(%tunnel_id, message, "agent reported vnc_error");
        let Some(org_id) = org_id else { return };
        let Some(this) = self.self_ref.upgrade() else { return };
        tokio::spawn(async move { this.close(org_id, tunnel_id, "vnc_error").await });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamspace_agent_gateway::NullVncHandler;
    use streamspace_auth::{ActorKind, AuthGate};
    use streamspace_bus::LocalBus;
    use streamspace_registry::Registry;
    use streamspace_store::fake::FakeStore;
    use streamspace_types::session::{Session, SessionState, TemplateRef};
    use streamspace_types::user::OrgRole;

    fn harness() -> (Arc<VncProxy>, Arc<dyn Store>, OrgId) {
        let store: Arc<dyn Store> = Arc::new(FakeStore::default());
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let replica_id = ReplicaId::new();
        let registry = Registry::new(store.clone(), bus.clone(), replica_id);
        let dispatcher = Dispatcher::new(store.clone(), bus.clone(), registry.clone(), replica_id);
        let auth = AuthGate::new(store.clone(), "test-secret".to_string());
        let config = Arc::new(Config::default());
        let gateway = Gateway::new(store.clone(), dispatcher.clone(), registry.clone(), auth, Arc::new(NullVncHandler), config.clone());
        let proxy = VncProxy::new(store.clone(), bus, dispatcher, gateway, config, replica_id);
        (proxy, store, OrgId::new())
    }

    #[tokio::test]
    async fn open_fails_when_session_is_not_running() {
        let (proxy, store, org_id) = harness();
        let user_id = streamspace_types::ids::UserId::new();
        let session = Session {
            id: SessionId::new(),
            org_id,
            user_id,
            template_ref: TemplateRef { name: "ide".to_string(), version: "1".to_string() },
            agent_id: None,
            namespace: "default".to_string(),
            state: SessionState::Pending,
            desired_state: SessionState::Running,
            platform_metadata: serde_json::json!({}),
            vnc_ready: false,
            vnc_endpoint: None,
            created_at: Utc::now(),
            last_activity_at: Utc::now(),
            conditions: vec![],
            shared_user_ids: vec![],
        };
        let command = streamspace_types::command::Command {
            id: streamspace_types::ids::CommandId::new(),
            session_id: session.id,
            org_id,
            action: CommandAction::StartSession,
            payload: serde_json::json!({}),
            status: streamspace_types::command::CommandStatus::Pending,
            issued_at: Utc::now(),
            acknowledged_at: None,
            completed_at: None,
            error: None,
            result: None,
            issuing_replica_id: ReplicaId::new(),
            target_agent_id: None,
        };
        store.sessions().create_with_initial_command(session.clone(), command, 5).await.unwrap();

        let principal = Principal { actor_kind: ActorKind::User, actor_id: user_id.to_string(), org_id, org_role: Some(OrgRole::User) };
        let result = proxy.open(&principal, session.id).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn sequence_gap_closes_the_tunnel() {
        let (proxy, _store, org_id) = harness();
        let tunnel_id = TunnelId::new();
        let (tx, _rx) = mpsc::channel(8);
        proxy.client_side.insert(
            tunnel_id,
            ClientSide { egress_tx: tx, next_seq: Arc::new(AtomicU64::new(0)), cancel: CancellationToken::new() },
        );

        proxy.deliver_to_client(org_id, tunnel_id, 5, b64_encode(b"frame")).await;
        assert!(!proxy.client_side.contains_key(&tunnel_id));
    }
}
