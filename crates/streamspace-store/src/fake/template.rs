use crate::{TemplateRecord, TemplateRepository};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use streamspace_types::{ids::OrgId, Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    pub org_id: OrgId,
    pub name: String,
    pub version: String,
}

pub struct FakeTemplateRepo {
    pub templates: Arc<DashMap<TemplateKey, TemplateRecord>>,
}

#[async_trait]
impl TemplateRepository for FakeTemplateRepo {
    async fn get(&self, org_id: OrgId, name: &str, version: &str) -> Result<TemplateRecord> {
        let key = TemplateKey {
            org_id,
            name: name.to_string(),
            version: version.to_string(),
        };
        self.templates.get(&key).map(|t| t.clone()).ok_or(Error::NotFound)
    }

    async fn list(&self, org_id: OrgId) -> Result<Vec<TemplateRecord>> {
        Ok(self
            .templates
            .iter()
            .filter(|e| e.key().org_id == org_id)
            .map(|e| e.clone())
            .collect())
    }

    async fn upsert(&self, record: TemplateRecord) -> Result<()> {
        let key = TemplateKey {
            org_id: record.org_id,
            name: record.reference.name.clone(),
            version: record.reference.version.clone(),
        };
        self.templates.insert(key, record);
        Ok(())
    }
}
