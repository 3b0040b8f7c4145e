use crate::user::OrgRole;
use serde::{Deserialize, Serialize};

/// Roles and permissions are enumerated, not computed (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    SessionCreate,
    SessionRead,
    SessionUpdate,
    SessionDelete,
    SessionShare,
    TemplateManage,
    AgentManage,
    OrgManage,
    AuditRead,
}

/// The static `org_role -> permissions` table. A `const fn`-style table
/// rather than a computed one, matching §4.8's "enumerated, not computed"
/// requirement — there is no inheritance or bitmask arithmetic to get
/// subtly wrong.
pub fn permissions_for(role: OrgRole) -> &'static [Permission] {
    use Permission::*;
    match role {
        OrgRole::OrgAdmin => &[
            SessionCreate,
            SessionRead,
            SessionUpdate,
            SessionDelete,
            SessionShare,
            TemplateManage,
            AgentManage,
            OrgManage,
            AuditRead,
        ],
        OrgRole::Maintainer => &[
            SessionCreate,
            SessionRead,
            SessionUpdate,
            SessionDelete,
            SessionShare,
            TemplateManage,
            AgentManage,
        ],
        OrgRole::User => &[SessionCreate, SessionRead, SessionUpdate, SessionShare],
        OrgRole::Viewer => &[SessionRead],
    }
}

pub fn role_has_permission(role: OrgRole, permission: Permission) -> bool {
    permissions_for(role).contains(&permission)
}
