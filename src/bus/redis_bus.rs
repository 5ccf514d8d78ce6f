//! Redis PUBLISH/SUBSCRIBE backend, for when the scanner and the connection
//! hub run in different processes

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;

use super::{Channel, EventBus, EventEnvelope, Subscription};
use crate::error::AppResult;

pub struct RedisBus {
    client: redis::Client,
    publisher: redis::aio::MultiplexedConnection,
}

impl RedisBus {
    /// Open the client and the shared publishing connection
    pub async fn connect(url: &str) -> AppResult<Self> {
        let client = redis::Client::open(url)?;
        let publisher = client.get_multiplexed_async_connection().await?;
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, channel: Channel, payload: String) -> AppResult<()> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(channel.as_str(), payload).await?;
        tracing::debug!(channel = %channel, receivers, "Published event to Redis");
        Ok(())
    }

    async fn subscribe(&self, channels: &[Channel]) -> AppResult<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        for channel in channels {
            pubsub.subscribe(channel.as_str()).await?;
        }

        let (out, subscription) = Subscription::channel();

        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let channel = match msg.get_channel_name().parse::<Channel>() {
                    Ok(channel) => channel,
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring message on unexpected channel");
                        continue;
                    }
                };
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "Ignoring undecodable Redis payload");
                        continue;
                    }
                };
                if out.send(EventEnvelope::new(channel, payload)).await.is_err() {
                    break;
                }
            }
            tracing::info!("Redis subscription closed");
        });

        Ok(subscription)
    }
}
