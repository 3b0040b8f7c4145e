use async_trait::async_trait;
use serde_json::Value;
use streamspace_types::{
    command::{Command, CommandStatus},
    ids::{CommandId, OrgId, SessionId},
    Result,
};

#[async_trait]
pub trait CommandRepository: Send + Sync {
    /// Inserts with `status = pending`. §4.4 step 1.
    async fn insert(&self, command: Command) -> Result<Command>;

    async fn get(&self, org_id: OrgId, id: CommandId) -> Result<Command>;

    /// The one command with `status ∈ {pending, dispatched, acknowledged}`
    /// for a session, if any — §8's "at most one command in flight per
    /// session" invariant, and the check the dispatcher's session lock
    /// protects.
    async fn in_flight_for_session(&self, session_id: SessionId) -> Result<Option<Command>>;

    /// CAS on `status`, per the table in §4.1. Also stamps
    /// `acknowledged_at`/`completed_at`/`error`/`result` as appropriate so
    /// §8's monotonic-timestamp invariant holds by construction.
    async fn cas_status(
        &self,
        org_id: OrgId,
        id: CommandId,
        expected: CommandStatus,
        next: CommandStatus,
        error: Option<String>,
        result: Option<Value>,
    ) -> Result<Command>;

    /// Commands still in flight whose `issued_at + deadline` has passed,
    /// for the timeout sweeper (§4.4).
    async fn overdue(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<Command>>;
}
