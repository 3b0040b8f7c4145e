use crate::{Bus, BusError, Delivery, MAX_MESSAGE_SIZE};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

type Subscribers = Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Delivery>>>>>;

/// A single-process bus backed by `tokio::sync::mpsc`, for tests and
/// single-replica deployments where the spec's cross-replica routing has
/// nothing to cross. Subscriptions and deliveries behave exactly like
/// [`RedisBus`](crate::RedisBus) except expiry is enforced by a sleep
/// rather than the broker, so tests can exercise §4.2's TTL semantics
/// without a running Redis.
#[derive(Clone)]
pub struct LocalBus {
    subscribers: Subscribers,
}

impl LocalBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn publish_raw(&self, topic: &str, payload: Vec<u8>, ttl: Duration) -> Result<(), BusError> {
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(BusError::MessageTooLarge(payload.len()));
        }
        let delivery = Delivery {
            topic: topic.to_string(),
            payload,
        };
        let subs = {
            let mut guard = self.subscribers.lock().await;
            let entry = guard.entry(topic.to_string()).or_default();
            entry.retain(|tx| !tx.is_closed());
            entry.clone()
        };
        for tx in subs {
            let delivery = delivery.clone();
            let tx = tx.clone();
            // Expiry is advisory here: a receiver that hasn't drained by
            // `ttl` simply never sees the send succeed, matching the
            // broker's "discard expired messages" behavior from §4.2.
            tokio::spawn(async move {
                let _ = tokio::time::timeout(ttl, tx.send(delivery)).await;
            });
        }
        Ok(())
    }

    async fn subscribe_raw(&self, topic: &str) -> Result<mpsc::Receiver<Delivery>, BusError> {
        let (tx, rx) = mpsc::channel(256);
        let mut guard = self.subscribers.lock().await;
        guard.entry(topic.to_string()).or_default().push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let bus = LocalBus::new();
        let mut rx1 = bus.subscribe_raw("t").await.unwrap();
        let mut rx2 = bus.subscribe_raw("t").await.unwrap();
        bus.publish_raw("t", b"hello".to_vec(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(rx1.recv().await.unwrap().payload, b"hello");
        assert_eq!(rx2.recv().await.unwrap().payload, b"hello");
    }

    #[tokio::test]
    async fn rejects_oversized_messages() {
        let bus = LocalBus::new();
        let huge = vec![0u8; MAX_MESSAGE_SIZE + 1];
        let err = bus.publish_raw("t", huge, Duration::from_secs(1)).await;
        assert!(matches!(err, Err(BusError::MessageTooLarge(_))));
    }
}
