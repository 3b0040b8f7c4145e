use async_trait::async_trait;
use streamspace_types::{
    command::Command,
    ids::{AgentId, OrgId, SessionId, UserId},
    session::{Condition, Session, SessionState},
    Result,
};

/// What to filter a session listing by; `(org_id, state)` is the indexed
/// path from §4.1.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub user_id: Option<UserId>,
    pub state: Option<SessionState>,
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// §4.1: quota check, insert session row, enqueue initial command row
    /// — all or nothing. `quota_limit` is the caller-resolved
    /// `max_sessions` for `(org_id, user_id)`; the repository does the
    /// counting and comparison inside the same transaction as the insert
    /// so a racing second `CreateSession` cannot both pass the check.
    async fn create_with_initial_command(
        &self,
        session: Session,
        initial_command: Command,
        quota_limit: u32,
    ) -> Result<(Session, Command)>;

    async fn get(&self, org_id: OrgId, id: SessionId) -> Result<Session>;

    async fn list(&self, org_id: OrgId, filter: SessionFilter) -> Result<Vec<Session>>;

    /// CAS on `state`: fails with `Conflict` if the row's current state is
    /// not `expected`. This is the mechanism behind "concurrent
    /// reconcilers cannot regress state" (§4.1).
    async fn cas_state(
        &self,
        org_id: OrgId,
        id: SessionId,
        expected: SessionState,
        next: SessionState,
    ) -> Result<Session>;

    async fn set_desired_state(&self, org_id: OrgId, id: SessionId, desired: SessionState) -> Result<()>;

    async fn set_agent(&self, org_id: OrgId, id: SessionId, agent_id: AgentId) -> Result<()>;

    async fn set_vnc_ready(&self, org_id: OrgId, id: SessionId, ready: bool, endpoint: Option<String>) -> Result<()>;

    /// Grants `user_id` collaboration access (§4.1's `session.share`).
    /// Idempotent: sharing with an already-shared user is a no-op.
    async fn share(&self, org_id: OrgId, id: SessionId, user_id: UserId) -> Result<Session>;

    async fn add_condition(&self, org_id: OrgId, id: SessionId, condition: Condition) -> Result<()>;

    async fn clear_condition(
        &self,
        org_id: OrgId,
        id: SessionId,
        kind: streamspace_types::session::ConditionKind,
    ) -> Result<()>;

    /// Count of sessions in `running`/`hibernated` for `(org_id, user_id)`,
    /// the quota gate's input at §4.5.
    async fn count_live_for_user(&self, org_id: OrgId, user_id: UserId) -> Result<u32>;

    /// Sessions whose desired state diverges from reported state and whose
    /// last transition is older than `settle`, for the reconciler (§4.5).
    async fn needing_reconciliation(&self, settle: chrono::Duration) -> Result<Vec<Session>>;

    /// Sessions owned by agents that just went `offline`, for the
    /// `AgentUnreachable` condition sweep (§4.3).
    async fn list_by_agent(&self, agent_id: AgentId) -> Result<Vec<Session>>;
}
