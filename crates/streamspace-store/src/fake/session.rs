use crate::repos::session::SessionFilter;
use crate::SessionRepository;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use streamspace_types::{
    command::Command,
    ids::{AgentId, CommandId, OrgId, SessionId, UserId},
    session::{Condition, ConditionKind, Session, SessionState},
    Error, Result,
};

pub struct FakeSessionRepo {
    pub sessions: Arc<DashMap<SessionId, Session>>,
    pub commands: Arc<DashMap<CommandId, Command>>,
}

#[async_trait]
impl SessionRepository for FakeSessionRepo {
    async fn create_with_initial_command(
        &self,
        session: Session,
        initial_command: Command,
        quota_limit: u32,
    ) -> Result<(Session, Command)> {
        let live_count = self
            .sessions
            .iter()
            .filter(|s| {
                s.org_id == session.org_id
                    && s.user_id == session.user_id
                    && matches!(s.state, SessionState::Running | SessionState::Hibernated)
            })
            .count() as u32;
        if live_count >= quota_limit {
            return Err(Error::QuotaExceeded(format!(
                "user {} already has {} live sessions (limit {})",
                session.user_id, live_count, quota_limit
            )));
        }
        self.sessions.insert(session.id, session.clone());
        self.commands.insert(initial_command.id, initial_command.clone());
        Ok((session, initial_command))
    }

    async fn get(&self, org_id: OrgId, id: SessionId) -> Result<Session> {
        self.sessions
            .get(&id)
            .filter(|s| s.org_id == org_id)
            .map(|s| s.clone())
            .ok_or(Error::NotFound)
    }

    async fn list(&self, org_id: OrgId, filter: SessionFilter) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| s.org_id == org_id)
            .filter(|s| filter.user_id.is_none_or(|u| u == s.user_id))
            .filter(|s| filter.state.is_none_or(|st| st == s.state))
            .map(|s| s.clone())
            .collect())
    }

    async fn cas_state(
        &self,
        org_id: OrgId,
        id: SessionId,
        expected: SessionState,
        next: SessionState,
    ) -> Result<Session> {
        let mut entry = self.sessions.get_mut(&id).ok_or(Error::NotFound)?;
        if entry.org_id != org_id {
            return Err(Error::NotFound);
        }
        if entry.state != expected {
            return Err(Error::Conflict(format!(
                "session {id} expected state {expected:?}, found {:?}",
                entry.state
            )));
        }
        if !expected.can_transition_to(next) {
            return Err(Error::Invalid(format!(
                "transition {expected:?} -> {next:?} is not allowed"
            )));
        }
        entry.state = next;
        entry.last_activity_at = chrono::Utc::now();
        Ok(entry.clone())
    }

    async fn set_desired_state(&self, org_id: OrgId, id: SessionId, desired: SessionState) -> Result<()> {
        let mut entry = self.sessions.get_mut(&id).ok_or(Error::NotFound)?;
        if entry.org_id != org_id {
            return Err(Error::NotFound);
        }
        entry.desired_state = desired;
        Ok(())
    }

    async fn set_agent(&self, org_id: OrgId, id: SessionId, agent_id: AgentId) -> Result<()> {
        let mut entry = self.sessions.get_mut(&id).ok_or(Error::NotFound)?;
        if entry.org_id != org_id {
            return Err(Error::NotFound);
        }
        entry.agent_id = Some(agent_id);
        Ok(())
    }

    async fn set_vnc_ready(
        &self,
        org_id: OrgId,
        id: SessionId,
        ready: bool,
        endpoint: Option<String>,
    ) -> Result<()> {
        let mut entry = self.sessions.get_mut(&id).ok_or(Error::NotFound)?;
        if entry.org_id != org_id {
            return Err(Error::NotFound);
        }
        entry.vnc_ready = ready;
        entry.vnc_endpoint = endpoint;
        Ok(())
    }

    async fn share(&self, org_id: OrgId, id: SessionId, user_id: UserId) -> Result<Session> {
        let mut entry = self.sessions.get_mut(&id).ok_or(Error::NotFound)?;
        if entry.org_id != org_id {
            return Err(Error::NotFound);
        }
        if !entry.shared_user_ids.contains(&user_id) {
            entry.shared_user_ids.push(user_id);
        }
        Ok(entry.clone())
    }

    async fn add_condition(&self, org_id: OrgId, id: SessionId, condition: Condition) -> Result<()> {
        let mut entry = self.sessions.get_mut(&id).ok_or(Error::NotFound)?;
        if entry.org_id != org_id {
            return Err(Error::NotFound);
        }
        entry.conditions.push(condition);
        Ok(())
    }

    async fn clear_condition(&self, org_id: OrgId, id: SessionId, kind: ConditionKind) -> Result<()> {
        let mut entry = self.sessions.get_mut(&id).ok_or(Error::NotFound)?;
        if entry.org_id != org_id {
            return Err(Error::NotFound);
        }
        let now = chrono::Utc::now();
        for c in entry.conditions.iter_mut() {
            if c.kind == kind && c.cleared_at.is_none() {
                c.cleared_at = Some(now);
            }
        }
        Ok(())
    }

    async fn count_live_for_user(&self, org_id: OrgId, user_id: UserId) -> Result<u32> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| {
                s.org_id == org_id
                    && s.user_id == user_id
                    && matches!(s.state, SessionState::Running | SessionState::Hibernated)
            })
            .count() as u32)
    }

    async fn needing_reconciliation(&self, settle: chrono::Duration) -> Result<Vec<Session>> {
        let now = chrono::Utc::now();
        Ok(self
            .sessions
            .iter()
            .filter(|s| s.needs_reconciliation() && now - s.last_activity_at > settle)
            .map(|s| s.clone())
            .collect())
    }

    async fn list_by_agent(&self, agent_id: AgentId) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| s.agent_id == Some(agent_id))
            .map(|s| s.clone())
            .collect())
    }
}
