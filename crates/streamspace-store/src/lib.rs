//! Persistence Store (C1): a transactional store exposing repositories for
//! every entity in spec §3. No repository method is usable without an
//! `org_id` except the three documented exceptions (`OrgRepository::get`,
//! which takes the org id as *the* filter, and `AgentRepository::get`,
//! which accepts `Option<OrgId>` because pool-shared agents are legitimate
//! per §3) — every other read filters server-side.
//!
//! Two adapters implement [`Store`]: [`postgres::PostgresStore`] for
//! production and [`fake::FakeStore`] for tests and the reconciler's own
//! unit tests, which need a store without a running database.

pub mod error;
pub mod fake;
pub mod postgres;
pub mod repos;

pub use error::map_sqlx_error;
pub use repos::{
    AgentRepository, AuditRepository, CommandRepository, OrgRepository, SessionFilter,
    SessionRepository, TemplateRecord, TemplateRepository, TunnelRepository, UserRepository,
};

use std::sync::Arc;

/// Bundles one handle to each repository. Components depend on `Arc<dyn
/// Store>` (or on the individual repo traits directly, where a component
/// only needs one) rather than a concrete Postgres type, so
/// `streamspace-coordinator`'s tests run against `fake::FakeStore` with no
/// behavior difference from production.
pub trait Store: Send + Sync {
    fn orgs(&self) -> Arc<dyn OrgRepository>;
    fn users(&self) -> Arc<dyn UserRepository>;
    fn agents(&self) -> Arc<dyn AgentRepository>;
    fn sessions(&self) -> Arc<dyn SessionRepository>;
    fn commands(&self) -> Arc<dyn CommandRepository>;
    fn tunnels(&self) -> Arc<dyn TunnelRepository>;
    fn audit(&self) -> Arc<dyn AuditRepository>;
    fn templates(&self) -> Arc<dyn TemplateRepository>;
}
