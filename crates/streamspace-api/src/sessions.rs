//! Session CRUD/lifecycle handlers. Every handler resolves a
//! [`Principal`](streamspace_auth::Principal) first, checks the coarse
//! role permission from `streamspace_types::permission`, then, for
//! anything that names a specific session, applies the row-level
//! `Session::is_visible_to` check before acting, since the permission
//! table alone grants `SessionRead`/`SessionUpdate` to every role.

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use streamspace_auth::Principal;
use streamspace_store::SessionFilter;
use streamspace_types::{
    ids::{SessionId, UserId},
    permission::Permission,
    session::{Session, SessionState, TemplateRef},
    user::OrgRole,
    Error,
};
use uuid::Uuid;

use crate::{error::ApiResult, extract::AuthedPrincipal, AppState};

fn user_id_of(principal: &Principal) -> ApiResult<UserId> {
    Uuid::parse_str(&principal.actor_id)
        .map(UserId::from_uuid)
        .map_err(|_| Error::Unauthenticated.into())
}

/// `OrgAdmin`/`Maintainer` see every session in the org; `User`/`Viewer`
/// only their own plus whatever has been shared with them.
fn is_privileged(principal: &Principal) -> bool {
    matches!(principal.org_role, Some(OrgRole::OrgAdmin) | Some(OrgRole::Maintainer))
}

fn visible_or_not_found(session: Session, principal: &Principal, user_id: UserId) -> ApiResult<Session> {
    if session.is_visible_to(user_id, is_privileged(principal)) {
        Ok(session)
    } else {
        Err(Error::NotFound.into())
    }
}

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub template_name: String,
    pub template_version: String,
    pub namespace: String,
    #[serde(default)]
    pub platform_metadata: Value,
}

pub async fn create(
    State(state): State<AppState>,
    AuthedPrincipal(principal): AuthedPrincipal,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    principal.require(Permission::SessionCreate)?;
    let user_id = user_id_of(&principal)?;

    let session = state
        .coordinator
        .create_session(
            principal.org_id,
            user_id,
            TemplateRef { name: req.template_name, version: req.template_version },
            req.namespace,
            req.platform_metadata,
            state.config.default_session_quota,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Deserialize)]
pub struct ListSessionsQuery {
    #[serde(default)]
    pub state: Option<SessionState>,
}

pub async fn list(
    State(state): State<AppState>,
    AuthedPrincipal(principal): AuthedPrincipal,
    Query(query): Query<ListSessionsQuery>,
) -> ApiResult<Json<Vec<Session>>> {
    principal.require(Permission::SessionRead)?;
    let user_id = user_id_of(&principal)?;
    let privileged = is_privileged(&principal);

    let filter = SessionFilter { user_id: None, state: query.state };
    let sessions = state.coordinator.list(principal.org_id, filter).await?;
    let visible = sessions
        .into_iter()
        .filter(|s| s.is_visible_to(user_id, privileged))
        .collect();
    Ok(Json(visible))
}

pub async fn get(
    State(state): State<AppState>,
    AuthedPrincipal(principal): AuthedPrincipal,
    Path(id): Path<SessionId>,
) -> ApiResult<Json<Session>> {
    principal.require(Permission::SessionRead)?;
    let user_id = user_id_of(&principal)?;
    let session = state.coordinator.get(principal.org_id, id).await?;
    Ok(Json(visible_or_not_found(session, &principal, user_id)?))
}

pub async fn hibernate(
    State(state): State<AppState>,
    AuthedPrincipal(principal): AuthedPrincipal,
    Path(id): Path<SessionId>,
) -> ApiResult<Json<Session>> {
    principal.require(Permission::SessionUpdate)?;
    let user_id = user_id_of(&principal)?;
    let current = state.coordinator.get(principal.org_id, id).await?;
    visible_or_not_found(current, &principal, user_id)?;

    let deadline = state.config.command_timeouts.hibernate();
    let session = state.coordinator.hibernate_session(principal.org_id, id, deadline).await?;
    Ok(Json(session))
}

pub async fn wake(
    State(state): State<AppState>,
    AuthedPrincipal(principal): AuthedPrincipal,
    Path(id): Path<SessionId>,
) -> ApiResult<Json<Session>> {
    principal.require(Permission::SessionUpdate)?;
    let user_id = user_id_of(&principal)?;
    let current = state.coordinator.get(principal.org_id, id).await?;
    visible_or_not_found(current, &principal, user_id)?;

    let deadline = state.config.command_timeouts.wake();
    let session = state.coordinator.wake_session(principal.org_id, id, deadline).await?;
    Ok(Json(session))
}

pub async fn terminate(
    State(state): State<AppState>,
    AuthedPrincipal(principal): AuthedPrincipal,
    Path(id): Path<SessionId>,
) -> ApiResult<Json<Session>> {
    principal.require(Permission::SessionDelete)?;
    let user_id = user_id_of(&principal)?;
    let current = state.coordinator.get(principal.org_id, id).await?;
    visible_or_not_found(current, &principal, user_id)?;

    let deadline = state.config.command_timeouts.stop();
    let session = state.coordinator.terminate_session(principal.org_id, id, deadline).await?;
    Ok(Json(session))
}

#[derive(Deserialize)]
pub struct ShareSessionRequest {
    pub user_id: Uuid,
}

#[derive(Serialize)]
pub struct ShareSessionResponse {
    pub session: Session,
}

pub async fn share(
    State(state): State<AppState>,
    AuthedPrincipal(principal): AuthedPrincipal,
    Path(id): Path<SessionId>,
    Json(req): Json<ShareSessionRequest>,
) -> ApiResult<Json<ShareSessionResponse>> {
    principal.require(Permission::SessionShare)?;
    let user_id = user_id_of(&principal)?;
    let current = state.coordinator.get(principal.org_id, id).await?;
    visible_or_not_found(current, &principal, user_id)?;

    let session = state
        .coordinator
        .share_session(principal.org_id, id, UserId::from_uuid(req.user_id))
        .await?;
    Ok(Json(ShareSessionResponse { session }))
}
