//! Agent Connection Endpoint (C6): the WebSocket lifecycle every agent
//! connects through.
//!
//! Grounded directly on the teacher's `server/src/handlers.rs`:
//! `ws_handler` + `handle_connection` + the split sink/writer-task/
//! reader-loop shape carries over unchanged in spirit. What changes is
//! scope — the teacher's `AppState.agents` entry is replaced by a bind
//! through `streamspace-registry`, its single `mpsc::unbounded_channel`
//! outbound queue is replaced by two *bounded* queues per §4.6, and the
//! teacher's no-auth `Register` is replaced by a token-authenticated
//! `Hello` handshake through `streamspace-auth`.

pub mod protocol;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use chrono::Utc;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use protocol::{AgentToControl, ControlToAgent, Frame};
use std::sync::Arc;
use std::time::Duration;
use streamspace_auth::AuthGate;
use streamspace_config::Config;
use streamspace_dispatcher::Dispatcher;
use streamspace_registry::Registry;
use streamspace_store::Store;
use streamspace_types::{
    command::CommandStatus,
    ids::{AgentId, ConnectionId, OrgId, SessionId, TunnelId},
    session::{ConditionKind, SessionState},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Where inbound VNC frames go once the reader loop decodes them — kept as
/// a trait so this crate has no compile-time dependency on
/// `streamspace-vnc-proxy`, mirroring how `streamspace-dispatcher` depends
/// on `AgentLocator` rather than the concrete `Registry`.
/// `org_id` is the connection-level scope resolved at handshake time — `None`
/// for a pool-shared agent, same caveat as `Dispatcher::resolve`'s callers in
/// [`handle_inbound`]: without it, the handler cannot perform an org-scoped
/// store write and is expected to log and skip rather than guess a scope.
#[async_trait]
pub trait VncInboundHandler: Send + Sync {
    async fn on_vnc_ready(&self, agent_id: AgentId, org_id: Option<OrgId>, session_id: SessionId, tunnel_id: TunnelId, local_port: u16);
    async fn on_vnc_data(&self, agent_id: AgentId, org_id: Option<OrgId>, tunnel_id: TunnelId, seq: u64, data: String);
    async fn on_vnc_error(&self, agent_id: AgentId, org_id: Option<OrgId>, tunnel_id: TunnelId, message: String);
}

/// A handler that drops every inbound VNC frame, for deployments or tests
/// that wire the gateway before C7 is in place.
pub struct NullVncHandler;

#[async_trait]
impl VncInboundHandler for NullVncHandler {
    async fn on_vnc_ready(&self, _agent_id: AgentId, _org_id: Option<OrgId>, _session_id: SessionId, _tunnel_id: TunnelId, _local_port: u16) {}
    async fn on_vnc_data(&self, _agent_id: AgentId, _org_id: Option<OrgId>, _tunnel_id: TunnelId, _seq: u64, _data: String) {}
    async fn on_vnc_error(&self, _agent_id: AgentId, _org_id: Option<OrgId>, _tunnel_id: TunnelId, _message: String) {}
}

struct ConnectionHandle {
    vnc_tx: mpsc::Sender<ControlToAgent>,
    cancel: CancellationToken,
}

pub struct Gateway {
    store: Arc<dyn Store>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<Registry>,
    auth: Arc<AuthGate>,
    vnc_inbound: Arc<dyn VncInboundHandler>,
    config: Arc<Config>,
    connections: DashMap<AgentId, ConnectionHandle>,
}

impl Gateway {
    pub fn new(
        store: Arc<dyn Store>,
        dispatcher: Arc<Dispatcher>,
        registry: Arc<Registry>,
        auth: Arc<AuthGate>,
        vnc_inbound: Arc<dyn VncInboundHandler>,
        config: Arc<Config>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            dispatcher,
            registry,
            auth,
            vnc_inbound,
            config,
            connections: DashMap::new(),
        })
    }

    /// Sends a VNC segment or close frame to the agent currently bound to
    /// this replica. Non-blocking: a full VNC queue drops the frame rather
    /// than stall the caller (§4.6). Returns `false` if no connection is
    /// live so `streamspace-vnc-proxy` can close the tunnel on its side.
    pub fn send_vnc(&self, agent_id: AgentId, msg: ControlToAgent) -> bool {
        match self.connections.get(&agent_id) {
            Some(handle) => handle.vnc_tx.try_send(msg).is_ok(),
            None => false,
        }
    }

    /// Requests a graceful disconnect: sends `shutdown{reason}` and gives
    /// the connection `T_drain` to flush before the reader loop is allowed
    /// to exit on its own (the agent is expected to close after reading
    /// the shutdown frame; we do not force-close the socket here).
    pub fn request_shutdown(&self, agent_id: AgentId, reason: &str) {
        if let Some(handle) = self.connections.get(&agent_id) {
            let _ = handle.vnc_tx.try_send(ControlToAgent::Shutdown { reason: reason.to_string() });
            handle.cancel.cancel();
        }
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, gateway))
}

async fn handle_connection(socket: WebSocket, gateway: Arc<Gateway>) {
    let conn_id = ConnectionId::new();
    info!(%conn_id, "agent connection opened");

    let (mut ws_sink, mut ws_stream) = socket.split();

    // The handshake: the first frame on a fresh socket must be `hello`.
    let (agent_id, token) = match tokio::time::timeout(Duration::from_secs(10), ws_stream.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => {
            let decoded = serde_json::from_str::<Frame>(&text).ok().and_then(|f| AgentToControl::from_frame(f).ok());
            match decoded {
                Some(AgentToControl::Hello { agent_id, token }) => (agent_id, token),
                _ => {
                    warn!(%conn_id, "first frame was not a valid hello");
                    return;
                }
            }
        }
        _ => {
            warn!(%conn_id, "handshake timed out or socket closed before hello");
            return;
        }
    };

    let org_id = match gateway.auth.validate_agent_token(agent_id, &token).await {
        Ok(org_id) => org_id,
        Err(e) => {
            warn!(%conn_id, %agent_id, error = %e, "agent token rejected");
            return;
        }
    };

    if let Err(e) = gateway.registry.bind(agent_id).await {
        warn!(%conn_id, %agent_id, error = %e, "bind conflict, rejecting connection");
        let frame = ControlToAgent::Shutdown { reason: "already_bound".to_string() }.into_frame();
        if let Ok(text) = serde_json::to_string(&frame) {
            let _ = ws_sink.send(Message::Text(text.into())).await;
        }
        return;
    }

    let (dispatch_tx, mut dispatch_rx) = mpsc::channel(gateway.config.outbound_queue_depth);
    let (vnc_tx, mut vnc_rx) = mpsc::channel(gateway.config.vnc_queue_depth);
    let cancel = CancellationToken::new();

    gateway.dispatcher.register_local_sink(agent_id, dispatch_tx);
    gateway.connections.insert(agent_id, ConnectionHandle { vnc_tx, cancel: cancel.clone() });

    let writer_conn_id = conn_id.clone();
    let writer_cancel = cancel.clone();
    let hb_interval = gateway.config.hb_interval();
    let writer_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(hb_interval);
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                maybe = dispatch_rx.recv() => {
                    match maybe {
                        Some(envelope) => {
                            let frame = ControlToAgent::Command {
                                command_id: envelope.command_id,
                                session_id: envelope.session_id,
                                action: envelope.action,
                                payload: envelope.payload,
                            }.into_frame();
                            if !send_frame(&mut ws_sink, frame).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                maybe = vnc_rx.recv() => {
                    match maybe {
                        Some(msg) => {
                            let is_shutdown = matches!(msg, ControlToAgent::Shutdown { .. });
                            if !send_frame(&mut ws_sink, msg.into_frame()).await || is_shutdown {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if !send_frame(&mut ws_sink, ControlToAgent::Ping.into_frame()).await {
                        break;
                    }
                }
            }
        }
        info!(conn_id = %writer_conn_id, "writer task exiting");
    });

    // ── Reader loop ──
    while let Some(Ok(msg)) = ws_stream.next().await {
        if cancel.is_cancelled() {
            break;
        }
        let Message::Text(text) = msg else {
            if matches!(msg, Message::Close(_)) {
                break;
            }
            continue;
        };
        let frame: Frame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                warn!(%conn_id, %agent_id, error = %e, "malformed frame");
                continue;
            }
        };
        let decoded = match AgentToControl::from_frame(frame) {
            Ok(d) => d,
            Err(e) => {
                warn!(%conn_id, %agent_id, error = %e, "unrecognized frame");
                continue;
            }
        };
        handle_inbound(&gateway, agent_id, org_id, decoded).await;
    }

    // ── Cleanup ──
    info!(%conn_id, %agent_id, "agent connection closed");
    cancel.cancel();
    writer_task.abort();
    gateway.dispatcher.unregister_local_sink(agent_id);
    gateway.connections.remove(&agent_id);
    if let Err(e) = gateway.registry.unbind(agent_id).await {
        warn!(%agent_id, error = %e, "failed to unbind agent on disconnect");
    }
}

async fn send_frame(sink: &mut futures::stream::SplitSink<WebSocket, Message>, frame: Frame) -> bool {
    match serde_json::to_string(&frame) {
        Ok(text) => sink.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "failed to serialize outbound frame");
            true
        }
    }
}

async fn handle_inbound(
    gateway: &Arc<Gateway>,
    agent_id: AgentId,
    org_id: Option<OrgId>,
    msg: AgentToControl,
) {
    match msg {
        AgentToControl::Hello { .. } => {
            warn!(%agent_id, "unexpected hello after handshake, ignoring");
        }
        AgentToControl::Heartbeat { session_count } => {
            if let Err(e) = gateway.registry.heartbeat(agent_id, Utc::now(), session_count).await {
                warn!(%agent_id, error = %e, "failed to record heartbeat");
            }
        }
        AgentToControl::Ack { command_id } => match org_id {
            Some(org_id) => {
                let _ = gateway.dispatcher.resolve(org_id, command_id, CommandStatus::Acknowledged, None, None).await;
            }
            None => warn!(%agent_id, %command_id, "cannot resolve ack for a pool-shared agent without an org scope"),
        },
        AgentToControl::Complete { command_id, result } => match org_id {
            Some(org_id) => {
                let _ = gateway.dispatcher.resolve(org_id, command_id, CommandStatus::Completed, None, result).await;
            }
            None => warn!(%agent_id, %command_id, "cannot resolve completion for a pool-shared agent without an org scope"),
        },
        AgentToControl::Failed { command_id, error } => match org_id {
            Some(org_id) => {
                let _ = gateway.dispatcher.resolve(org_id, command_id, CommandStatus::Failed, Some(error), None).await;
            }
            None => warn!(%agent_id, %command_id, "cannot resolve failure for a pool-shared agent without an org scope"),
        },
        AgentToControl::Status { detail } => {
            handle_status_report(gateway, agent_id, org_id, detail).await;
        }
        AgentToControl::VncReady { session_id, tunnel_id, local_port } => {
            gateway.vnc_inbound.on_vnc_ready(agent_id, org_id, session_id, tunnel_id, local_port).await;
        }
        AgentToControl::VncData { tunnel_id, seq, data } => {
            gateway.vnc_inbound.on_vnc_data(agent_id, org_id, tunnel_id, seq, data).await;
        }
        AgentToControl::VncError { tunnel_id, message } => {
            gateway.vnc_inbound.on_vnc_error(agent_id, org_id, tunnel_id, message).await;
        }
    }
}

#[derive(serde::Deserialize)]
struct StatusDetail {
    session_id: SessionId,
    state: SessionState,
}

/// A reconnecting agent re-announces every live session's state in a burst
/// of `status` frames (§4.6). Per §8's round-trip property this is a no-op
/// when the reported state already matches ours, beyond clearing whatever
/// `AgentUnreachable` condition the heartbeat sweeper raised while the
/// agent was missing. A mismatch is left for the reconciler, which CASes
/// through the dispatcher's one-in-flight-per-session discipline rather
/// than trusting an unauthenticated agent report to force a state directly.
async fn handle_status_report(gateway: &Arc<Gateway>, agent_id: AgentId, org_id: Option<OrgId>, detail: serde_json::Value) {
    let Some(org_id) = org_id else {
        warn!(%agent_id, "status report from a pool-shared agent connection, dropping: no org scope to reconcile under");
        return;
    };
    let Ok(report) = serde_json::from_value::<StatusDetail>(detail) else {
        warn!(%agent_id, "malformed status report, ignoring");
        return;
    };

    let session = match gateway.store.sessions().get(org_id, report.session_id).await {
        Ok(s) => s,
        Err(e) => {
            warn!(%agent_id, session_id = %report.session_id, error = %e, "status report for unknown session");
            return;
        }
    };

    if session.state != report.state {
        info!(%agent_id, session_id = %report.session_id, reported = ?report.state, current = ?session.state, "status report does not match reported state, leaving to reconciler");
        return;
    }

    if let Err(e) = gateway.store.sessions().clear_condition(org_id, report.session_id, ConditionKind::AgentUnreachable).await {
        warn!(%agent_id, session_id = %report.session_id, error = %e, "failed to clear agent_unreachable condition on status re-announcement");
    }
}

