//! `GET /api/sessions/{id}/vnc`, upgrades to the WebSocket [`VncProxy`]
//! pumps for the session's display stream. Mirrors the teacher's
//! `ws_handler`: the auth/permission check happens before the upgrade so a
//! rejected caller gets a plain HTTP error rather than a WebSocket that
//! opens and immediately closes.

use axum::{
    extract::{
        ws::WebSocketUpgrade,
        Path, State,
    },
    response::IntoResponse,
};
use streamspace_types::{ids::SessionId, permission::Permission};

use crate::{error::ApiResult, extract::AuthedPrincipal, AppState};

pub async fn upgrade(
    State(state): State<AppState>,
    AuthedPrincipal(principal): AuthedPrincipal,
    Path(id): Path<SessionId>,
    ws: WebSocketUpgrade,
) -> ApiResult<impl IntoResponse> {
    principal.require(Permission::SessionRead)?;
    let vnc_proxy = state.vnc_proxy.clone();
    Ok(ws.on_upgrade(move |socket| async move {
        vnc_proxy.serve(&principal, id, socket).await;
    }))
}
