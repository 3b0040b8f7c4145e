use crate::OrgRepository;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use streamspace_types::{
    ids::OrgId,
    org::{Organization, OrgStatus},
    Error, Result,
};

pub struct FakeOrgRepo {
    pub orgs: Arc<DashMap<OrgId, Organization>>,
}

#[async_trait]
impl OrgRepository for FakeOrgRepo {
    async fn create(&self, org: Organization) -> Result<Organization> {
        if self.orgs.iter().any(|e| e.slug == org.slug) {
            return Err(Error::Conflict(format!("slug {} already taken", org.slug)));
        }
        self.orgs.insert(org.id, org.clone());
        Ok(org)
    }

    async fn get(&self, id: OrgId) -> Result<Organization> {
        self.orgs.get(&id).map(|o| o.clone()).ok_or(Error::NotFound)
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Organization> {
        self.orgs
            .iter()
            .find(|e| e.slug == slug)
            .map(|e| e.clone())
            .ok_or(Error::NotFound)
    }

    async fn set_status(&self, id: OrgId, status: OrgStatus) -> Result<()> {
        let mut entry = self.orgs.get_mut(&id).ok_or(Error::NotFound)?;
        entry.status = status;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Organization>> {
        Ok(self.orgs.iter().map(|e| e.clone()).collect())
    }
}
