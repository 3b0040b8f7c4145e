use crate::AuditRepository;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use streamspace_types::{audit::AuditEntry, ids::OrgId, Result};

pub struct FakeAuditRepo {
    pub audit: Arc<DashMap<streamspace_types::ids::AuditId, AuditEntry>>,
}

#[async_trait]
impl AuditRepository for FakeAuditRepo {
    async fn append(&self, entry: AuditEntry) -> Result<AuditEntry> {
        self.audit.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn list(&self, org_id: OrgId, limit: u32) -> Result<Vec<AuditEntry>> {
        let mut entries: Vec<AuditEntry> = self
            .audit
            .iter()
            .filter(|e| e.org_id == org_id)
            .map(|e| e.clone())
            .collect();
        entries.sort_by_key(|e| std::cmp::Reverse(e.timestamp));
        entries.truncate(limit as usize);
        Ok(entries)
    }
}
