use crate::ids::{AgentId, CommandId, OrgId, ReplicaId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    StartSession,
    StopSession,
    HibernateSession,
    WakeSession,
    OpenVncTunnel,
    CloseVncTunnel,
}

impl CommandAction {
    /// Per-action deadlines, §4.4 and §6.
    pub fn deadline(self) -> Duration {
        match self {
            CommandAction::StartSession => Duration::from_secs(120),
            CommandAction::StopSession => Duration::from_secs(60),
            CommandAction::HibernateSession => Duration::from_secs(30),
            CommandAction::WakeSession => Duration::from_secs(60),
            CommandAction::OpenVncTunnel => Duration::from_secs(15),
            CommandAction::CloseVncTunnel => Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Dispatched,
    Acknowledged,
    Completed,
    Failed,
    TimedOut,
}

impl CommandStatus {
    /// True while this command occupies the "one in-flight command per
    /// session" slot §8 requires.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            CommandStatus::Pending | CommandStatus::Dispatched | CommandStatus::Acknowledged
        )
    }

    pub fn is_terminal(self) -> bool {
        !self.is_in_flight()
    }

    /// The CAS discipline from §4.1: `pending→dispatched`,
    /// `dispatched→acknowledged`, `acknowledged→{completed,failed}`,
    /// `*→timed_out`.
    pub fn can_transition_to(self, next: CommandStatus) -> bool {
        use CommandStatus::*;
        if next == TimedOut {
            return self.is_in_flight();
        }
        matches!(
            (self, next),
            (Pending, Dispatched)
                | (Dispatched, Acknowledged)
                | (Acknowledged, Completed)
                | (Acknowledged, Failed)
                // an agent may complete/fail without a separate ack frame
                // arriving first if ack and complete race on the wire.
                | (Dispatched, Completed)
                | (Dispatched, Failed)
        )
    }
}

/// A durable lifecycle command — the audit trail for §3's Command entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub session_id: SessionId,
    pub org_id: OrgId,
    pub action: CommandAction,
    pub payload: Value,
    pub status: CommandStatus,
    pub issued_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<Value>,
    pub issuing_replica_id: ReplicaId,
    pub target_agent_id: Option<AgentId>,
}

impl Command {
    /// §8: `acknowledged_at >= issued_at` and, when set, `completed_at >=
    /// acknowledged_at`.
    pub fn has_monotonic_timestamps(&self) -> bool {
        if let Some(ack) = self.acknowledged_at {
            if ack < self.issued_at {
                return false;
            }
        }
        if let (Some(ack), Some(done)) = (self.acknowledged_at, self.completed_at) {
            if done < ack {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_can_only_advance_forward() {
        assert!(CommandStatus::Pending.can_transition_to(CommandStatus::Dispatched));
        assert!(!CommandStatus::Pending.can_transition_to(CommandStatus::Completed));
        assert!(!CommandStatus::Completed.can_transition_to(CommandStatus::Pending));
    }

    #[test]
    fn any_in_flight_status_can_time_out() {
        for s in [
            CommandStatus::Pending,
            CommandStatus::Dispatched,
            CommandStatus::Acknowledged,
        ] {
            assert!(s.can_transition_to(CommandStatus::TimedOut));
        }
        assert!(!CommandStatus::Completed.can_transition_to(CommandStatus::TimedOut));
    }

    #[test]
    fn deadline_matches_per_action_table() {
        assert_eq!(CommandAction::StartSession.deadline().as_secs(), 120);
        assert_eq!(CommandAction::HibernateSession.deadline().as_secs(), 30);
        assert_eq!(CommandAction::OpenVncTunnel.deadline().as_secs(), 15);
    }
}
