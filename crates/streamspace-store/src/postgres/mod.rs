//! `PostgreSQL` implementation of every repository trait, using `sqlx`'s
//! runtime-checked `query_as` (no `DATABASE_URL`-at-build-time requirement,
//! unlike the `query!` macro) with `#[derive(sqlx::FromRow)]` row types
//! converted to/from the `streamspace-types` domain types at the
//! repository boundary.

mod agent;
mod audit;
mod command;
mod org;
mod rows;
mod session;
mod template;
mod tunnel;
mod user;

use crate::{
    AgentRepository, AuditRepository, CommandRepository, OrgRepository, SessionRepository, Store,
    TemplateRepository, TunnelRepository, UserRepository,
};
use sqlx::PgPool;
use std::sync::Arc;

/// Production [`Store`]: one connection pool shared by every repository.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPool::connect(url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

impl Store for PostgresStore {
    fn orgs(&self) -> Arc<dyn OrgRepository> {
        Arc::new(org::PgOrgRepo { pool: self.pool.clone() })
    }

    fn users(&self) -> Arc<dyn UserRepository> {
        Arc::new(user::PgUserRepo { pool: self.pool.clone() })
    }

    fn agents(&self) -> Arc<dyn AgentRepository> {
        Arc::new(agent::PgAgentRepo { pool: self.pool.clone() })
    }

    fn sessions(&self) -> Arc<dyn SessionRepository> {
        Arc::new(session::PgSessionRepo { pool: self.pool.clone() })
    }

    fn commands(&self) -> Arc<dyn CommandRepository> {
        Arc::new(command::PgCommandRepo { pool: self.pool.clone() })
    }

    fn tunnels(&self) -> Arc<dyn TunnelRepository> {
        Arc::new(tunnel::PgTunnelRepo { pool: self.pool.clone() })
    }

    fn audit(&self) -> Arc<dyn AuditRepository> {
        Arc::new(audit::PgAuditRepo { pool: self.pool.clone() })
    }

    fn templates(&self) -> Arc<dyn TemplateRepository> {
        Arc::new(template::PgTemplateRepo { pool: self.pool.clone() })
    }
}
