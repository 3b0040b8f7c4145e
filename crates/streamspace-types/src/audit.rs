use crate::ids::{AuditId, OrgId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// Append-only; retained per org policy (§3). Soft-deleted source rows
/// still retain their `org_id` so audit queries never need a join through
/// a tombstoned parent to stay tenant-scoped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    pub org_id: OrgId,
    pub actor_user_id: Option<UserId>,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: AuditOutcome,
    pub metadata: Value,
}
