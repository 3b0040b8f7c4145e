use crate::ids::{OrgId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Operator,
    Admin,
}

/// The organization-scoped role, distinct from [`Role`] (the platform-wide
/// actor kind used by the auth gate). `OrgRole` drives the static
/// role→permission table in `streamspace-auth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgRole {
    OrgAdmin,
    Maintainer,
    User,
    Viewer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthProvider {
    Local,
    Saml,
    Oidc,
}

/// `(org_id, username)` is unique; enforced by a store-level unique index,
/// not re-checked here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub org_id: OrgId,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub org_role: OrgRole,
    pub provider: AuthProvider,
    pub active: bool,
}
