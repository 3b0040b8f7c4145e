//! In-memory [`Store`] implementation for tests. Every CAS / uniqueness
//! rule the Postgres adapter enforces with constraints and `UPDATE ...
//! WHERE` clauses is reproduced here with `DashMap::entry` locking, so a
//! property test written against `FakeStore` exercises the same
//! invariants production does.

mod agent;
mod audit;
mod command;
mod org;
mod session;
mod template;
mod tunnel;
mod user;

use crate::{
    AgentRepository, AuditRepository, CommandRepository, OrgRepository, SessionRepository,
    Store, TemplateRepository, TunnelRepository, UserRepository,
};
use dashmap::DashMap;
use std::sync::Arc;
use streamspace_types::{
    agent::Agent,
    audit::AuditEntry,
    command::Command,
    ids::{AgentId, AuditId, CommandId, OrgId, SessionId, TunnelId, UserId},
    org::Organization,
    session::Session,
    tunnel::VncTunnel,
    user::User,
};

use self::template::TemplateKey;

#[derive(Default)]
pub struct FakeStore {
    orgs: Arc<DashMap<OrgId, Organization>>,
    users: Arc<DashMap<UserId, User>>,
    agents: Arc<DashMap<AgentId, Agent>>,
    agent_token_hashes: Arc<DashMap<AgentId, String>>,
    sessions: Arc<DashMap<SessionId, Session>>,
    commands: Arc<DashMap<CommandId, Command>>,
    tunnels: Arc<DashMap<TunnelId, VncTunnel>>,
    audit: Arc<DashMap<AuditId, AuditEntry>>,
    templates: Arc<DashMap<TemplateKey, crate::TemplateRecord>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for FakeStore {
    fn orgs(&self) -> Arc<dyn OrgRepository> {
        Arc::new(org::FakeOrgRepo { orgs: self.orgs.clone() })
    }

    fn users(&self) -> Arc<dyn UserRepository> {
        Arc::new(user::FakeUserRepo { users: self.users.clone() })
    }

    fn agents(&self) -> Arc<dyn AgentRepository> {
        Arc::new(agent::FakeAgentRepo {
            agents: self.agents.clone(),
            token_hashes: self.agent_token_hashes.clone(),
        })
    }

    fn sessions(&self) -> Arc<dyn SessionRepository> {
        Arc::new(session::FakeSessionRepo {
            sessions: self.sessions.clone(),
            commands: self.commands.clone(),
        })
    }

    fn commands(&self) -> Arc<dyn CommandRepository> {
        Arc::new(command::FakeCommandRepo {
            commands: self.commands.clone(),
        })
    }

    fn tunnels(&self) -> Arc<dyn TunnelRepository> {
        Arc::new(tunnel::FakeTunnelRepo {
            tunnels: self.tunnels.clone(),
        })
    }

    fn audit(&self) -> Arc<dyn AuditRepository> {
        Arc::new(audit::FakeAuditRepo { audit: self.audit.clone() })
    }

    fn templates(&self) -> Arc<dyn TemplateRepository> {
        Arc::new(template::FakeTemplateRepo {
            templates: self.templates.clone(),
        })
    }
}
