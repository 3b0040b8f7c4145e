use crate::UserRepository;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use streamspace_types::{
    ids::{OrgId, UserId},
    user::User,
    Error, Result,
};

pub struct FakeUserRepo {
    pub users: Arc<DashMap<UserId, User>>,
}

#[async_trait]
impl UserRepository for FakeUserRepo {
    async fn create(&self, user: User) -> Result<User> {
        let dup = self
            .users
            .iter()
            .any(|e| e.org_id == user.org_id && e.username == user.username);
        if dup {
            return Err(Error::Conflict(format!(
                "username {} already exists in org",
                user.username
            )));
        }
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get(&self, org_id: OrgId, id: UserId) -> Result<User> {
        self.users
            .get(&id)
            .filter(|u| u.org_id == org_id)
            .map(|u| u.clone())
            .ok_or(Error::NotFound)
    }

    async fn get_by_username(&self, org_id: OrgId, username: &str) -> Result<User> {
        self.users
            .iter()
            .find(|e| e.org_id == org_id && e.username == username)
            .map(|e| e.clone())
            .ok_or(Error::NotFound)
    }

    async fn list(&self, org_id: OrgId) -> Result<Vec<User>> {
        Ok(self
            .users
            .iter()
            .filter(|e| e.org_id == org_id)
            .map(|e| e.clone())
            .collect())
    }

    async fn set_active(&self, org_id: OrgId, id: UserId, active: bool) -> Result<()> {
        let mut entry = self.users.get_mut(&id).ok_or(Error::NotFound)?;
        if entry.org_id != org_id {
            return Err(Error::NotFound);
        }
        entry.active = active;
        Ok(())
    }
}
