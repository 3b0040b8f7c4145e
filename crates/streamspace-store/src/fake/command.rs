use crate::CommandRepository;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use streamspace_types::{
    command::{Command, CommandStatus},
    ids::{CommandId, OrgId, SessionId},
    Error, Result,
};

pub struct FakeCommandRepo {
    pub commands: Arc<DashMap<CommandId, Command>>,
}

#[async_trait]
impl CommandRepository for FakeCommandRepo {
    async fn insert(&self, command: Command) -> Result<Command> {
        self.commands.insert(command.id, command.clone());
        Ok(command)
    }

    async fn get(&self, org_id: OrgId, id: CommandId) -> Result<Command> {
        self.commands
            .get(&id)
            .filter(|c| c.org_id == org_id)
            .map(|c| c.clone())
            .ok_or(Error::NotFound)
    }

    async fn in_flight_for_session(&self, session_id: SessionId) -> Result<Option<Command>> {
        Ok(self
            .commands
            .iter()
            .find(|c| c.session_id == session_id && c.status.is_in_flight())
            .map(|c| c.clone()))
    }

    async fn cas_status(
        &self,
        org_id: OrgId,
        id: CommandId,
        expected: CommandStatus,
        next: CommandStatus,
        error: Option<String>,
        result: Option<Value>,
    ) -> Result<Command> {
        let mut entry = self.commands.get_mut(&id).ok_or(Error::NotFound)?;
        if entry.org_id != org_id {
            return Err(Error::NotFound);
        }
        if entry.status != expected {
            return Err(Error::Conflict(format!(
                "command {id} expected status {expected:?}, found {:?}",
                entry.status
            )));
        }
        if !expected.can_transition_to(next) {
            return Err(Error::Invalid(format!(
                "transition {expected:?} -> {next:?} is not allowed"
            )));
        }
        let now = chrono::Utc::now();
        match next {
            CommandStatus::Acknowledged => entry.acknowledged_at = Some(now),
            CommandStatus::Completed | CommandStatus::Failed => {
                if entry.acknowledged_at.is_none() {
                    entry.acknowledged_at = Some(now);
                }
                entry.completed_at = Some(now);
            }
            _ => {}
        }
        entry.status = next;
        entry.error = error;
        entry.result = result;
        Ok(entry.clone())
    }

    async fn overdue(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<Command>> {
        Ok(self
            .commands
            .iter()
            .filter(|c| c.status.is_in_flight() && now - c.issued_at > chrono::Duration::from_std(c.action.deadline()).unwrap())
            .map(|c| c.clone())
            .collect())
    }
}
