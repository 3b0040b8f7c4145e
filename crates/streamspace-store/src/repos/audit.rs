use async_trait::async_trait;
use streamspace_types::{audit::AuditEntry, ids::OrgId, Result};

#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Append-only: there is deliberately no `update`/`delete` method on
    /// this trait.
    async fn append(&self, entry: AuditEntry) -> Result<AuditEntry>;

    async fn list(&self, org_id: OrgId, limit: u32) -> Result<Vec<AuditEntry>>;
}
