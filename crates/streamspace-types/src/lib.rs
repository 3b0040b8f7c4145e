//! Core domain types for the StreamSpace control plane: organizations,
//! users, agents, sessions, commands, VNC tunnels, and audit entries, plus
//! the stable [`error::Error`] vocabulary every component returns.
//!
//! This crate has no I/O. Nothing here talks to a database, a socket, or a
//! clock other than through the [`chrono`] values callers pass in — that
//! keeps it usable from the store, the dispatcher, the coordinator, and
//! property tests alike without pulling in `tokio`.

pub mod agent;
pub mod audit;
pub mod command;
pub mod error;
pub mod ids;
pub mod org;
pub mod permission;
pub mod session;
pub mod tunnel;
pub mod user;

pub use error::{Error, Result};
