use async_trait::async_trait;
use streamspace_types::{
    ids::OrgId,
    org::{Organization, OrgStatus},
    Result,
};

#[async_trait]
pub trait OrgRepository: Send + Sync {
    async fn create(&self, org: Organization) -> Result<Organization>;

    /// Unscoped by design: an organization is the root of the tenancy tree,
    /// so `get` is the one repository read in the whole store that does
    /// not take a separate `org_id` filter parameter — the id *is* the
    /// filter. Every other repository method takes `org_id` explicitly.
    async fn get(&self, id: OrgId) -> Result<Organization>;

    async fn get_by_slug(&self, slug: &str) -> Result<Organization>;

    async fn set_status(&self, id: OrgId, status: OrgStatus) -> Result<()>;

    async fn list(&self) -> Result<Vec<Organization>>;
}
