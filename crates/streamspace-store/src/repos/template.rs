use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use streamspace_types::{ids::OrgId, session::TemplateRef, Result};

/// Mirrors the catalog's `(name, version)` the core needs to build command
/// payloads, per spec.md §3. The catalog sync service (out of scope) is
/// the sole writer of `synced_at`; this repository only ever reads it back
/// for the core's own use in session creation.
#[derive(Debug, Clone)]
pub struct TemplateRecord {
    pub org_id: OrgId,
    pub reference: TemplateRef,
    pub spec: Value,
    pub synced_at: DateTime<Utc>,
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn get(&self, org_id: OrgId, name: &str, version: &str) -> Result<TemplateRecord>;

    async fn list(&self, org_id: OrgId) -> Result<Vec<TemplateRecord>>;

    /// Upserted by the catalog sync service; exposed here only so tests and
    /// local development can seed templates without standing up that
    /// external collaborator.
    async fn upsert(&self, record: TemplateRecord) -> Result<()>;
}
