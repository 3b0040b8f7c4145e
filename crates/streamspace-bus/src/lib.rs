//! Topic-based pub/sub (C2): at-least-once delivery, no per-topic ordering
//! assumed. Consumers are responsible for idempotence (command_id dedup,
//! VNC sequence-number dedup) — this crate only guarantees delivery and
//! the size/TTL limits from §4.2.
//!
//! The [`Bus`] trait is the seam: production wiring uses [`RedisBus`],
//! tests and single-replica deployments use [`LocalBus`]. This is the same
//! "trait + real adapter + in-memory fake" shape the pack's
//! `AgentSessionRepository` / `PostgresAgentSessionRepository` pair uses —
//! generalized here from a repository to a bus.

mod error;
mod local;
mod redis_bus;
mod topic;

pub use error::BusError;
pub use local::LocalBus;
pub use redis_bus::RedisBus;
pub use topic::Topic;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

/// Maximum serialized message size, §4.2.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// A single delivered message plus the topic it arrived on, handed to
/// subscribers as raw bytes so the bus crate never needs to know the
/// message schemas `streamspace-dispatcher` and `streamspace-vnc-proxy`
/// define.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait Bus: Send + Sync + 'static {
    /// Publishes `payload` to `topic`, enforcing §4.2's 1 MiB size cap and
    /// expiring the message after `ttl` if no subscriber has consumed it by
    /// then (broker-side for `RedisBus`, a sweep task for `LocalBus`).
    async fn publish_raw(&self, topic: &str, payload: Vec<u8>, ttl: Duration) -> Result<(), BusError>;

    /// Subscribes to `topic`, returning a receiver of raw deliveries. The
    /// subscription lives until the returned handle is dropped.
    async fn subscribe_raw(&self, topic: &str) -> Result<tokio::sync::mpsc::Receiver<Delivery>, BusError>;
}

/// Typed convenience wrapper over [`Bus::publish_raw`] / `subscribe_raw`.
#[async_trait]
pub trait BusExt: Bus {
    async fn publish<T: Serialize + Send + Sync>(
        &self,
        topic: &Topic,
        message: &T,
        ttl: Duration,
    ) -> Result<(), BusError> {
        let payload = serde_json::to_vec(message).map_err(BusError::Encode)?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(BusError::MessageTooLarge(payload.len()));
        }
        self.publish_raw(&topic.to_string(), payload, ttl).await
    }
}

impl<B: Bus + ?Sized> BusExt for B {}

/// Deserializes a [`Delivery`]'s payload. Free function rather than a
/// trait method because the target type can't be inferred from `&self`.
pub fn decode<T: DeserializeOwned>(delivery: &Delivery) -> Result<T, BusError> {
    serde_json::from_slice(&delivery.payload).map_err(BusError::Decode)
}
