use std::fmt;

/// Typed topic names, §4.2. Kept as an enum rather than raw strings so a
/// caller can never publish to `agent.commands.<agent_id>` with the wrong
/// delimiter or forget the prefix.
#[derive(Debug, Clone)]
pub enum Topic {
    AgentCommands(String),
    SessionEvents(String),
    TunnelIngress(String),
    TunnelEgress(String),
    /// Local registry-cache invalidation, an ambient addition not named in
    /// spec.md's topic list but required by §4.3's "bus-invalidated"
    /// in-memory cache.
    RegistryInvalidate(String),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::AgentCommands(id) => write!(f, "agent.commands.{id}"),
            Topic::SessionEvents(org_id) => write!(f, "session.events.{org_id}"),
            Topic::TunnelIngress(id) => write!(f, "tunnel.ingress.{id}"),
            Topic::TunnelEgress(id) => write!(f, "tunnel.egress.{id}"),
            Topic::RegistryInvalidate(id) => write!(f, "registry.invalidate.{id}"),
        }
    }
}
