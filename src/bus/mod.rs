//! Event bus
//!
//! Named broadcast channels shared by every publisher in the process (or, with
//! Redis, across processes). Delivery is at-most-once: a subscriber that is not
//! listening when an envelope is published never sees it, and nothing is
//! acknowledged. Anything that needs reliable delivery must not be built on
//! this bus.

pub mod memory;
pub mod publisher;
pub mod redis_bus;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::AppResult;

pub use memory::MemoryBus;
pub use publisher::{BroadcastMessage, EventPublisher};
pub use redis_bus::RedisBus;

/// Buffer between a backend and one subscriber
const SUBSCRIPTION_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    RiskEvents,
    Alerts,
    VehicleUpdates,
    DriverUpdates,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::RiskEvents,
        Channel::Alerts,
        Channel::VehicleUpdates,
        Channel::DriverUpdates,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::RiskEvents => "risk_events",
            Channel::Alerts => "alerts",
            Channel::VehicleUpdates => "vehicle_updates",
            Channel::DriverUpdates => "driver_updates",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    // Channel names are case-sensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown channel '{}'", s))
    }
}

/// One published payload, in flight between a publisher and the hub
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub channel: Channel,
    /// Serialized client message, forwarded to connections verbatim
    pub payload: String,
    pub published_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(channel: Channel, payload: String) -> Self {
        Self {
            channel,
            payload,
            published_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Fire-and-forget. Succeeds even when nobody is subscribed.
    async fn publish(&self, channel: Channel, payload: String) -> AppResult<()>;

    /// Start receiving envelopes published on `channels` from now on
    async fn subscribe(&self, channels: &[Channel]) -> AppResult<Subscription>;
}

/// Receiving end of a subscription. Ends when the backend goes away.
pub struct Subscription {
    rx: mpsc::Receiver<EventEnvelope>,
}

impl Subscription {
    fn channel() -> (mpsc::Sender<EventEnvelope>, Self) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        (tx, Self { rx })
    }

    pub async fn next(&mut self) -> Option<EventEnvelope> {
        self.rx.recv().await
    }
}
