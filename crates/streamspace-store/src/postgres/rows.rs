//! Row <-> domain-type conversions. Kept in one file because the mapping
//! is mechanical (string <-> enum, JSONB <-> serde_json::Value) and
//! scattering it per-repository would just make the enum round-trips
//! harder to audit together.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;
use streamspace_types::{
    agent::{Agent, AgentStatus, Platform},
    audit::{AuditEntry, AuditOutcome},
    command::{Command, CommandAction, CommandStatus},
    ids::{AgentId, AuditId, CommandId, OrgId, ReplicaId, SessionId, TunnelId, UserId},
    org::{Organization, OrgStatus},
    session::{Condition, ConditionKind, Session, SessionState, TemplateRef},
    tunnel::{TunnelState, VncTunnel},
    user::{AuthProvider, OrgRole, Role, User},
    Error, Result,
};
use uuid::Uuid;

pub fn parse_enum<T: std::str::FromStr>(raw: &str, field: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| Error::Internal(format!("unrecognized {field} value: {raw}")))
}

macro_rules! str_enum {
    ($ty:ty { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl std::str::FromStr for $ty {
            type Err = ();
            fn from_str(s: &str) -> std::result::Result<Self, ()> {
                match s {
                    $($text => Ok(<$ty>::$variant),)+
                    _ => Err(()),
                }
            }
        }
        impl $ty {
            pub fn as_db_str(&self) -> &'static str {
                match self {
                    $(<$ty>::$variant => $text,)+
                }
            }
        }
    };
}

str_enum!(OrgStatus { Active => "active", Suspended => "suspended", Deleted => "deleted" });
str_enum!(Role { User => "user", Operator => "operator", Admin => "admin" });
str_enum!(OrgRole {
    OrgAdmin => "org_admin", Maintainer => "maintainer", User => "user", Viewer => "viewer"
});
str_enum!(AuthProvider { Local => "local", Saml => "saml", Oidc => "oidc" });
str_enum!(Platform { Kubernetes => "kubernetes", Docker => "docker" });
str_enum!(AgentStatus { Online => "online", Draining => "draining", Offline => "offline" });
str_enum!(SessionState {
    Pending => "pending", Starting => "starting", Running => "running",
    Hibernated => "hibernated", Waking => "waking", Terminating => "terminating",
    Terminated => "terminated", Failed => "failed"
});
str_enum!(CommandAction {
    StartSession => "start_session", StopSession => "stop_session",
    HibernateSession => "hibernate_session", WakeSession => "wake_session",
    OpenVncTunnel => "open_vnc_tunnel", CloseVncTunnel => "close_vnc_tunnel"
});
str_enum!(CommandStatus {
    Pending => "pending", Dispatched => "dispatched", Acknowledged => "acknowledged",
    Completed => "completed", Failed => "failed", TimedOut => "timed_out"
});
str_enum!(TunnelState { Opening => "opening", Ready => "ready", Closed => "closed", Error => "error" });
str_enum!(AuditOutcome { Success => "success", Failure => "failure" });
str_enum!(ConditionKind {
    AgentUnreachable => "agent_unreachable", CommandTimedOut => "command_timed_out",
    QuotaExceeded => "quota_exceeded", AgentDraining => "agent_draining"
});

#[derive(FromRow)]
pub struct OrgRow {
    pub id: Uuid,
    pub slug: String,
    pub display_name: String,
    pub namespace: String,
    pub status: String,
}

impl OrgRow {
    pub fn into_domain(self) -> Result<Organization> {
        Ok(Organization {
            id: OrgId(self.id),
            slug: self.slug,
            display_name: self.display_name,
            namespace: self.namespace,
            status: parse_enum(&self.status, "org.status")?,
        })
    }
}

#[derive(FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub org_id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
    pub org_role: String,
    pub provider: String,
    pub active: bool,
}

impl UserRow {
    pub fn into_domain(self) -> Result<User> {
        Ok(User {
            id: UserId(self.id),
            org_id: OrgId(self.org_id),
            username: self.username,
            email: self.email,
            role: parse_enum(&self.role, "user.role")?,
            org_role: parse_enum(&self.org_role, "user.org_role")?,
            provider: parse_enum(&self.provider, "user.provider")?,
            active: self.active,
        })
    }
}

#[derive(FromRow)]
pub struct AgentRow {
    pub id: Uuid,
    pub org_id: Option<Uuid>,
    pub platform: String,
    pub labels: Value,
    pub capacity: i32,
    pub status: String,
    pub last_heartbeat: DateTime<Utc>,
    pub connected_replica_id: Option<Uuid>,
}

impl AgentRow {
    pub fn into_domain(self) -> Result<Agent> {
        let labels = serde_json::from_value(self.labels)
            .map_err(|e| Error::Internal(format!("agent.labels decode: {e}")))?;
        Ok(Agent {
            id: AgentId(self.id),
            org_id: self.org_id.map(OrgId),
            platform: parse_enum(&self.platform, "agent.platform")?,
            labels,
            capacity: self.capacity as u32,
            status: parse_enum(&self.status, "agent.status")?,
            last_heartbeat: self.last_heartbeat,
            connected_replica_id: self.connected_replica_id.map(ReplicaId),
        })
    }
}

#[derive(FromRow)]
pub struct SessionRow {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub template_name: String,
    pub template_version: String,
    pub agent_id: Option<Uuid>,
    pub namespace: String,
    pub state: String,
    pub desired_state: String,
    pub platform_metadata: Value,
    pub vnc_ready: bool,
    pub vnc_endpoint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub conditions: Value,
    pub shared_user_ids: Vec<Uuid>,
}

impl SessionRow {
    pub fn into_domain(self) -> Result<Session> {
        let conditions: Vec<Condition> = serde_json::from_value(self.conditions)
            .map_err(|e| Error::Internal(format!("session.conditions decode: {e}")))?;
        Ok(Session {
            id: SessionId(self.id),
            org_id: OrgId(self.org_id),
            user_id: UserId(self.user_id),
            template_ref: TemplateRef {
                name: self.template_name,
                version: self.template_version,
            },
            agent_id: self.agent_id.map(AgentId),
            namespace: self.namespace,
            state: parse_enum(&self.state, "session.state")?,
            desired_state: parse_enum(&self.desired_state, "session.desired_state")?,
            platform_metadata: self.platform_metadata,
            vnc_ready: self.vnc_ready,
            vnc_endpoint: self.vnc_endpoint,
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
            conditions,
            shared_user_ids: self.shared_user_ids.into_iter().map(UserId).collect(),
        })
    }
}

#[derive(FromRow)]
pub struct CommandRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub org_id: Uuid,
    pub action: String,
    pub payload: Value,
    pub status: String,
    pub issued_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<Value>,
    pub issuing_replica_id: Uuid,
    pub target_agent_id: Option<Uuid>,
}

impl CommandRow {
    pub fn into_domain(self) -> Result<Command> {
        Ok(Command {
            id: CommandId(self.id),
            session_id: SessionId(self.session_id),
            org_id: OrgId(self.org_id),
            action: parse_enum(&self.action, "command.action")?,
            payload: self.payload,
            status: parse_enum(&self.status, "command.status")?,
            issued_at: self.issued_at,
            acknowledged_at: self.acknowledged_at,
            completed_at: self.completed_at,
            error: self.error,
            result: self.result,
            issuing_replica_id: ReplicaId(self.issuing_replica_id),
            target_agent_id: self.target_agent_id.map(AgentId),
        })
    }
}

#[derive(FromRow)]
pub struct TunnelRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub org_id: Uuid,
    pub agent_id: Uuid,
    pub client_connection_id: String,
    pub state: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl TunnelRow {
    pub fn into_domain(self) -> Result<VncTunnel> {
        Ok(VncTunnel {
            id: TunnelId(self.id),
            session_id: SessionId(self.session_id),
            org_id: OrgId(self.org_id),
            agent_id: AgentId(self.agent_id),
            client_connection_id: streamspace_types::ids::ConnectionId(self.client_connection_id),
            state: parse_enum(&self.state, "tunnel.state")?,
            opened_at: self.opened_at,
            closed_at: self.closed_at,
        })
    }
}

#[derive(FromRow)]
pub struct AuditRow {
    pub id: Uuid,
    pub org_id: Uuid,
    pub actor_user_id: Option<Uuid>,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: String,
    pub metadata: Value,
}

impl AuditRow {
    pub fn into_domain(self) -> Result<AuditEntry> {
        Ok(AuditEntry {
            id: AuditId(self.id),
            org_id: OrgId(self.org_id),
            actor_user_id: self.actor_user_id.map(UserId),
            action: self.action,
            target_type: self.target_type,
            target_id: self.target_id,
            timestamp: self.timestamp,
            outcome: parse_enum(&self.outcome, "audit.outcome")?,
            metadata: self.metadata,
        })
    }
}

#[derive(FromRow)]
pub struct TemplateRow {
    pub org_id: Uuid,
    pub name: String,
    pub version: String,
    pub spec: Value,
    pub synced_at: DateTime<Utc>,
}

impl TemplateRow {
    pub fn into_domain(self) -> Result<crate::TemplateRecord> {
        Ok(crate::TemplateRecord {
            org_id: OrgId(self.org_id),
            reference: TemplateRef {
                name: self.name,
                version: self.version,
            },
            spec: self.spec,
            synced_at: self.synced_at,
        })
    }
}
