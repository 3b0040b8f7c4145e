//! Control plane entry point: loads configuration, wires every core
//! component, and serves the client API and agent gateway on their own
//! listeners.
//!
//! Grounded on the teacher's `main.rs`: `tracing_subscriber::fmt` init,
//! build a `Router`, `axum::serve` a `TcpListener`. Generalized from one
//! listener to two, since §4.6 keeps the agent protocol off the surface a
//! browser client talks to, and from a zero-dependency `AppState` to the
//! full component graph C1-C9 wire together.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use streamspace_agent_gateway::{Gateway, VncInboundHandler};
use streamspace_auth::AuthGate;
use streamspace_bus::{Bus, RedisBus};
use streamspace_config::ConfigLoader;
use streamspace_coordinator::Coordinator;
use streamspace_dispatcher::Dispatcher;
use streamspace_registry::Registry;
use streamspace_store::{postgres::PostgresStore, Store};
use streamspace_types::ids::{AgentId, OrgId, ReplicaId, SessionId, TunnelId};
use streamspace_vnc_proxy::VncProxy;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

/// Bridges the cyclic `Gateway <-> VncProxy` dependency: `Gateway::new`
/// needs a `VncInboundHandler` before a `VncProxy` can exist (it needs the
/// `Gateway` itself), so this forwards to whichever `VncProxy` is filled in
/// once both are constructed.
struct VncHandoff(OnceCell<Arc<VncProxy>>);

impl VncHandoff {
    fn new() -> Arc<Self> {
        Arc::new(Self(OnceCell::new()))
    }

    fn bind(&self, proxy: Arc<VncProxy>) {
        let _ = self.0.set(proxy);
    }
}

#[async_trait]
impl VncInboundHandler for VncHandoff {
    async fn on_vnc_ready(&self, agent_id: AgentId, org_id: Option<OrgId>, session_id: SessionId, tunnel_id: TunnelId, local_port: u16) {
        if let Some(proxy) = self.0.get() {
            proxy.on_vnc_ready(agent_id, org_id, session_id, tunnel_id, local_port).await;
        }
    }

    async fn on_vnc_data(&self, agent_id: AgentId, org_id: Option<OrgId>, tunnel_id: TunnelId, seq: u64, data: String) {
        if let Some(proxy) = self.0.get() {
            proxy.on_vnc_data(agent_id, org_id, tunnel_id, seq, data).await;
        }
    }

    async fn on_vnc_error(&self, agent_id: AgentId, org_id: Option<OrgId>, tunnel_id: TunnelId, message: String) {
        if let Some(proxy) = self.0.get() {
            proxy.on_vnc_error(agent_id, org_id, tunnel_id, message).await;
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "streamspace_server=info,streamspace_api=info".into()),
        )
        .init();

    let config = match ConfigLoader::new().load() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let store: Arc<dyn Store> = match PostgresStore::connect(&config.store_url).await {
        Ok(store) => {
            if let Err(e) = store.migrate().await {
                error!(error = %e, "failed to run database migrations");
                std::process::exit(1);
            }
            Arc::new(store)
        }
        Err(e) => {
            error!(error = %e, "failed to connect to the store");
            std::process::exit(1);
        }
    };

    let bus: Arc<dyn Bus> = match RedisBus::new(&config.bus_url) {
        Ok(bus) => Arc::new(bus),
        Err(e) => {
            error!(error = %e, "failed to connect to the bus");
            std::process::exit(1);
        }
    };

    let replica_id = ReplicaId::new();
    info!(%replica_id, "starting streamspace control plane");

    let auth = AuthGate::new(store.clone(), config.jwt_secret.clone());
    let registry = Registry::new(store.clone(), bus.clone(), replica_id);
    let dispatcher = Dispatcher::new(store.clone(), bus.clone(), registry.clone(), replica_id);

    let vnc_handoff = VncHandoff::new();
    let gateway = Gateway::new(store.clone(), dispatcher.clone(), registry.clone(), auth.clone(), vnc_handoff.clone(), config.clone());
    let vnc_proxy = VncProxy::new(store.clone(), bus.clone(), dispatcher.clone(), gateway.clone(), config.clone(), replica_id);
    vnc_handoff.bind(vnc_proxy.clone());

    let coordinator = Coordinator::new(store.clone(), bus.clone(), dispatcher.clone(), registry.clone(), vnc_proxy.clone(), replica_id);

    spawn_sweepers(registry.clone(), dispatcher.clone(), coordinator.clone(), config.clone());

    let api_state = streamspace_api::AppState {
        store: store.clone(),
        bus: bus.clone(),
        coordinator,
        vnc_proxy,
        auth,
        config: config.clone(),
    };
    let api_router = streamspace_api::router(api_state);

    let gateway_router = axum::Router::new()
        .route("/ws", axum::routing::get(streamspace_agent_gateway::ws_handler))
        .with_state(gateway);

    let api_addr = config.bind_address.clone();
    let agent_addr = config.agent_bind_address.clone();

    let api_task = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(api_addr.as_str()).await.unwrap();
        info!(addr = %api_addr, "client API listening");
        axum::serve(listener, api_router).await.unwrap();
    });

    let gateway_task = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(agent_addr.as_str()).await.unwrap();
        info!(addr = %agent_addr, "agent gateway listening");
        axum::serve(listener, gateway_router).await.unwrap();
    });

    let _ = tokio::join!(api_task, gateway_task);
}

/// Spawns the three periodic background passes §4's scheduling model
/// names: the agent-heartbeat sweeper, the command-timeout sweeper, and
/// the session reconciler. Each runs on its own interval and logs rather
/// than propagates a failed pass, since a transient store error should not
/// take the whole replica down.
fn spawn_sweepers(registry: Arc<Registry>, dispatcher: Arc<Dispatcher>, coordinator: Arc<Coordinator>, config: Arc<streamspace_config::Config>) {
    let heartbeat_registry = registry.clone();
    let heartbeat_coordinator = coordinator.clone();
    let heartbeat_threshold = chrono::Duration::seconds(config.hb_stale_secs as i64);
    let heartbeat_interval = config.hb_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        loop {
            ticker.tick().await;
            match heartbeat_registry.sweep(chrono::Utc::now(), heartbeat_threshold).await {
                Ok(swept) => {
                    for agent_id in swept {
                        if let Err(e) = heartbeat_coordinator.mark_agent_unreachable(agent_id).await {
                            warn!(%agent_id, error = %e, "failed to raise agent_unreachable conditions");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "agent heartbeat sweep failed"),
            }
        }
    });

    let command_dispatcher = dispatcher;
    let command_interval = config.reconcile_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(command_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = command_dispatcher.sweep_timeouts(chrono::Utc::now()).await {
                warn!(error = %e, "command timeout sweep failed");
            }
        }
    });

    let reconcile_coordinator = coordinator;
    let reconcile_settle = config.reconcile_settle();
    let reconcile_deadline = Duration::from_secs(config.command_timeouts.start_secs);
    let reconcile_interval = config.reconcile_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(reconcile_interval);
        loop {
            ticker.tick().await;
            match reconcile_coordinator.reconcile_once(reconcile_settle, reconcile_deadline).await {
                Ok(acted) if acted > 0 => info!(acted, "reconciliation pass drove sessions toward desired state"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "reconciliation pass failed"),
            }
        }
    });
}
