use crate::ids::OrgId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgStatus {
    Active,
    Suspended,
    Deleted,
}

/// The tenant boundary. Every other entity references exactly one
/// organization; `namespace` is the isolation boundary agents enforce at
/// the platform level (a Kubernetes namespace, a Docker network).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrgId,
    pub slug: String,
    pub display_name: String,
    pub namespace: String,
    pub status: OrgStatus,
}

impl Organization {
    pub fn is_active(&self) -> bool {
        matches!(self.status, OrgStatus::Active)
    }
}
