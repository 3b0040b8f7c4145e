//! Hierarchical configuration loading, modeled on the same precedence order
//! as `kimberlite-config::ConfigLoader`:
//!
//! 1. Environment variables (`STREAMSPACE_*`, highest precedence)
//! 2. `streamspace.local.toml` (gitignored, local overrides)
//! 3. `streamspace.toml` (git-tracked, project config)
//! 4. Built-in defaults (lowest precedence)
//!
//! Unknown keys are rejected (§6): any TOML or env key that does not map to
//! a field on [`Config`] fails the load rather than being silently ignored.

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandTimeouts {
    pub start_secs: u64,
    pub stop_secs: u64,
    pub hibernate_secs: u64,
    pub wake_secs: u64,
    pub tunnel_open_secs: u64,
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        Self {
            start_secs: 120,
            stop_secs: 60,
            hibernate_secs: 30,
            wake_secs: 60,
            tunnel_open_secs: 15,
        }
    }
}

impl CommandTimeouts {
    pub fn start(&self) -> Duration {
        Duration::from_secs(self.start_secs)
    }
    pub fn stop(&self) -> Duration {
        Duration::from_secs(self.stop_secs)
    }
    pub fn hibernate(&self) -> Duration {
        Duration::from_secs(self.hibernate_secs)
    }
    pub fn wake(&self) -> Duration {
        Duration::from_secs(self.wake_secs)
    }
    pub fn tunnel_open(&self) -> Duration {
        Duration::from_secs(self.tunnel_open_secs)
    }
}

/// The recognized configuration surface from spec §6. Every field here has
/// a corresponding `STREAMSPACE_<FIELD>` environment override; nested
/// structs flatten with `__` (e.g. `STREAMSPACE_COMMAND_TIMEOUTS__START_SECS`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub bind_address: String,
    pub agent_bind_address: String,
    pub store_url: String,
    pub bus_url: String,
    pub jwt_secret: String,
    pub saml_metadata_url: Option<String>,
    pub oidc_issuer: Option<String>,
    pub hb_interval_secs: u64,
    pub hb_stale_secs: u64,
    pub command_timeouts: CommandTimeouts,
    pub drain_secs: u64,
    pub tunnel_idle_secs: u64,
    pub outbound_queue_depth: usize,
    pub vnc_queue_depth: usize,
    /// Sessions per `(org_id, user_id)` the coordinator's quota gate
    /// allows before rejecting `create_session` with `QuotaExceeded`. The
    /// admin CRUD surface for per-user overrides is out of scope (§1); this
    /// is the static default the core enforces in its absence.
    pub default_session_quota: u32,
    /// `T_settle` (§4.5): how long a session's last transition must have
    /// aged before the reconciler is allowed to act on it, so a command
    /// already in flight isn't raced by a premature nudge.
    pub reconcile_settle_secs: i64,
    /// How often the reconciliation loop, the command-timeout sweeper, and
    /// the agent-heartbeat sweeper each run their pass.
    pub reconcile_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            agent_bind_address: "0.0.0.0:8443".to_string(),
            store_url: "postgres://localhost/streamspace".to_string(),
            bus_url: "redis://localhost:6379".to_string(),
            jwt_secret: "change-me".to_string(),
            saml_metadata_url: None,
            oidc_issuer: None,
            hb_interval_secs: 10,
            hb_stale_secs: 30,
            command_timeouts: CommandTimeouts::default(),
            drain_secs: 5,
            tunnel_idle_secs: 300,
            outbound_queue_depth: 1024,
            vnc_queue_depth: 128,
            default_session_quota: 5,
            reconcile_settle_secs: 30,
            reconcile_interval_secs: 15,
        }
    }
}

impl Config {
    pub fn hb_interval(&self) -> Duration {
        Duration::from_secs(self.hb_interval_secs)
    }
    pub fn hb_stale(&self) -> Duration {
        Duration::from_secs(self.hb_stale_secs)
    }
    pub fn drain(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }
    pub fn tunnel_idle(&self) -> Duration {
        Duration::from_secs(self.tunnel_idle_secs)
    }
    pub fn reconcile_settle(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reconcile_settle_secs)
    }
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_section_6() {
        let cfg = Config::default();
        assert_eq!(cfg.hb_interval_secs, 10);
        assert_eq!(cfg.hb_stale_secs, 30);
        assert_eq!(cfg.outbound_queue_depth, 1024);
        assert_eq!(cfg.vnc_queue_depth, 128);
        assert_eq!(cfg.command_timeouts.start_secs, 120);
        assert_eq!(cfg.reconcile_settle_secs, 30);
        assert_eq!(cfg.reconcile_interval_secs, 15);
    }
}
