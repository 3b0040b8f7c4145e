use crate::ids::{AgentId, OrgId, SessionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateRef {
    pub name: String,
    pub version: String,
}

/// The observable session lifecycle, §4.5. `Waking` and `Terminating` are
/// kept as explicit, externally-visible intermediates rather than
/// collapsed at the API edge (see the open question in spec.md §9,
/// resolved in DESIGN.md) — this lets the reconciler answer "is a command
/// in flight for this session" without inspecting command rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Starting,
    Running,
    Hibernated,
    Waking,
    Terminating,
    Terminated,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Terminated | SessionState::Failed)
    }

    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }

    /// The allowed transition table from §4.5's state table. Used both by
    /// the coordinator's CAS writes and by property tests asserting §8's
    /// "session state transitions are a subset of the allowed set"
    /// invariant.
    pub fn allowed_transitions(self) -> &'static [SessionState] {
        use SessionState::*;
        match self {
            Pending => &[Starting, Terminating, Failed],
            Starting => &[Running, Failed, Terminating],
            Running => &[Waking, Terminating, Hibernated],
            Waking => &[Running, Hibernated, Failed, Terminating],
            Hibernated => &[Waking, Terminating],
            Terminating => &[Terminated],
            Terminated => &[],
            Failed => &[Terminating],
        }
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        self.allowed_transitions().contains(&next)
    }
}

/// A condition recorded against a session — the coordinator's running log
/// of noteworthy events that did not necessarily force a state transition
/// (e.g. `AgentUnreachable` from a missed heartbeat). Cleared conditions
/// are retained with `cleared_at` set so the API surface can show history,
/// not just current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub kind: ConditionKind,
    pub message: String,
    pub set_at: DateTime<Utc>,
    pub cleared_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    AgentUnreachable,
    CommandTimedOut,
    QuotaExceeded,
    AgentDraining,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub org_id: OrgId,
    pub user_id: UserId,
    pub template_ref: TemplateRef,
    pub agent_id: Option<AgentId>,
    pub namespace: String,
    pub state: SessionState,
    pub desired_state: SessionState,
    pub platform_metadata: Value,
    pub vnc_ready: bool,
    pub vnc_endpoint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub conditions: Vec<Condition>,
    /// Users granted collaboration access via `session.share` (§4.1),
    /// beyond the owning `user_id`.
    pub shared_user_ids: Vec<UserId>,
}

impl Session {
    /// True when the coordinator's reconciliation loop has work to do for
    /// this session: desired state diverges from reported state and no
    /// command is already in flight (the caller checks the latter via the
    /// dispatcher before calling this).
    pub fn needs_reconciliation(&self) -> bool {
        self.state != self.desired_state && self.state.is_live()
    }

    pub fn active_conditions(&self) -> impl Iterator<Item = &Condition> {
        self.conditions.iter().filter(|c| c.cleared_at.is_none())
    }

    /// Row-level visibility for a non-privileged viewer: the owner, an
    /// explicitly granted collaborator, or anyone the caller marks
    /// `privileged` (an org role whose permission table already allows
    /// managing every session in the org).
    pub fn is_visible_to(&self, user_id: UserId, privileged: bool) -> bool {
        privileged || self.user_id == user_id || self.shared_user_ids.contains(&user_id)
    }
}

/// What the coordinator fans out on `session.events.<org_id>` every time it
/// moves a session, for C9's `sessions` push-stream channel. Carries only
/// what a UI subscriber needs to update a session row, not the full
/// `Session` (conditions and `platform_metadata` stay a GET-only concern).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub org_id: OrgId,
    pub state: SessionState,
    pub desired_state: SessionState,
    pub vnc_ready: bool,
    pub at: DateTime<Utc>,
}

impl SessionEvent {
    pub fn from_session(session: &Session) -> Self {
        SessionEvent {
            session_id: session.id,
            org_id: session.org_id,
            state: session.state,
            desired_state: session.desired_state,
            vnc_ready: session.vnc_ready,
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_outgoing_transitions() {
        assert!(SessionState::Terminated.allowed_transitions().is_empty());
    }

    #[test]
    fn running_cannot_jump_straight_to_terminated() {
        assert!(!SessionState::Running.can_transition_to(SessionState::Terminated));
        assert!(SessionState::Running.can_transition_to(SessionState::Terminating));
    }

    #[test]
    fn pending_cannot_skip_to_running() {
        assert!(!SessionState::Pending.can_transition_to(SessionState::Running));
    }

    proptest::proptest! {
        #[test]
        fn allowed_transitions_never_reach_pending(from in any_state(), to in any_state()) {
            if from.can_transition_to(to) {
                proptest::prop_assert_ne!(to, SessionState::Pending);
            }
        }
    }

    fn any_state() -> impl proptest::strategy::Strategy<Value = SessionState> {
        use proptest::prelude::*;
        prop_oneof![
            Just(SessionState::Pending),
            Just(SessionState::Starting),
            Just(SessionState::Running),
            Just(SessionState::Hibernated),
            Just(SessionState::Waking),
            Just(SessionState::Terminating),
            Just(SessionState::Terminated),
            Just(SessionState::Failed),
        ]
    }
}
