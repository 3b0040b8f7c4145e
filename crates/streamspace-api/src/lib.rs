//! Client API Surface (C9): the HTTP/WebSocket surface a browser or CLI
//! client talks to, session CRUD/lifecycle, the VNC WebSocket upgrade, a
//! push-stream channel for session events, and read-only listing
//! endpoints for agents, templates, and the audit log.
//!
//! Grounded on the teacher's `main.rs`/`api.rs` shape: a plain
//! `Router::new().route(...).layer(CorsLayer::permissive()).with_state(state)`
//! with one `AppState` threaded through every handler via axum's
//! `State` extractor, generalized from the teacher's single `AppState`
//! (a couple of `DashMap`s) to one bundling every core component this
//! crate's handlers call into.

pub mod error;
pub mod extract;
pub mod listing;
pub mod sessions;
pub mod stream;
pub mod vnc;

use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use streamspace_auth::AuthGate;
use streamspace_bus::Bus;
use streamspace_config::Config;
use streamspace_coordinator::Coordinator;
use streamspace_store::Store;
use streamspace_vnc_proxy::VncProxy;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub bus: Arc<dyn Bus>,
    pub coordinator: Arc<Coordinator>,
    pub vnc_proxy: Arc<VncProxy>,
    pub auth: Arc<AuthGate>,
    pub config: Arc<Config>,
}

impl FromRef<AppState> for Arc<AuthGate> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

/// Wires every C9 route onto a fresh [`Router`]. The admin CRUD surface
/// (user/org management, per-user quota overrides) has no route here since
/// it is an external collaborator per spec.md's non-goals.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", post(sessions::create).get(sessions::list))
        .route(
            "/api/sessions/{id}",
            get(sessions::get).delete(sessions::terminate),
        )
        .route("/api/sessions/{id}/hibernate", post(sessions::hibernate))
        .route("/api/sessions/{id}/wake", post(sessions::wake))
        .route("/api/sessions/{id}/share", post(sessions::share))
        .route("/api/sessions/{id}/vnc", get(vnc::upgrade))
        .route("/api/stream/{channel}", get(stream::subscribe))
        .route("/api/agents", get(listing::list_agents))
        .route("/api/templates", get(listing::list_templates))
        .route("/api/audit", get(listing::list_audit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
