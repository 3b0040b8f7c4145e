//! Read-only listing endpoints, grounded on the teacher's `GET
//! /api/agents` handler in `api.rs`: a thin `State` extraction straight
//! into a `Json<Vec<T>>`, no business logic beyond the permission check.

use axum::extract::{Json, State};
use serde::Serialize;
use serde_json::Value;
use streamspace_types::{agent::Agent, audit::AuditEntry, permission::Permission, session::TemplateRef};

use crate::{error::ApiResult, extract::AuthedPrincipal, AppState};

/// [`TemplateRecord`](streamspace_store::TemplateRecord) has no `Serialize`
/// impl of its own, being an internal persistence shape rather than a wire
/// type, so this flattens it into one.
#[derive(Serialize)]
pub struct TemplateListItem {
    #[serde(flatten)]
    pub reference: TemplateRef,
    pub spec: Value,
    pub synced_at: chrono::DateTime<chrono::Utc>,
}

pub async fn list_agents(
    State(state): State<AppState>,
    AuthedPrincipal(principal): AuthedPrincipal,
) -> ApiResult<Json<Vec<Agent>>> {
    principal.require(Permission::AgentManage)?;
    let agents = state.store.agents().list_eligible(principal.org_id).await?;
    Ok(Json(agents))
}

pub async fn list_templates(
    State(state): State<AppState>,
    AuthedPrincipal(principal): AuthedPrincipal,
) -> ApiResult<Json<Vec<TemplateListItem>>> {
    principal.require(Permission::SessionRead)?;
    let templates = state.store.templates().list(principal.org_id).await?;
    let items = templates
        .into_iter()
        .map(|t| TemplateListItem { reference: t.reference, spec: t.spec, synced_at: t.synced_at })
        .collect();
    Ok(Json(items))
}

pub async fn list_audit(
    State(state): State<AppState>,
    AuthedPrincipal(principal): AuthedPrincipal,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    principal.require(Permission::AuditRead)?;
    let entries = state.store.audit().list(principal.org_id, 200).await?;
    Ok(Json(entries))
}
