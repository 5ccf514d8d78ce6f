//! In-process bus backed by `tokio::sync::broadcast`

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{Channel, EventBus, EventEnvelope, Subscription};
use crate::error::AppResult;

/// Single-process bus. A subscriber that falls more than `capacity` envelopes
/// behind skips the ones it missed.
pub struct MemoryBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl MemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, channel: Channel, payload: String) -> AppResult<()> {
        let envelope = EventEnvelope::new(channel, payload);
        tracing::debug!(
            channel = %channel,
            subscriber_count = self.tx.receiver_count(),
            "Publishing event"
        );
        // No receivers is not an error
        let _ = self.tx.send(envelope);
        Ok(())
    }

    async fn subscribe(&self, channels: &[Channel]) -> AppResult<Subscription> {
        let mut rx = self.tx.subscribe();
        let wanted = channels.to_vec();
        let (out, subscription) = Subscription::channel();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if !wanted.contains(&envelope.channel) {
                            continue;
                        }
                        if out.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Bus subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(subscription)
    }
}
