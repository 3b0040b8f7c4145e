use async_trait::async_trait;
use streamspace_types::{
    ids::{OrgId, UserId},
    user::User,
    Result,
};

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: User) -> Result<User>;

    async fn get(&self, org_id: OrgId, id: UserId) -> Result<User>;

    async fn get_by_username(&self, org_id: OrgId, username: &str) -> Result<User>;

    async fn list(&self, org_id: OrgId) -> Result<Vec<User>>;

    async fn set_active(&self, org_id: OrgId, id: UserId, active: bool) -> Result<()>;
}
