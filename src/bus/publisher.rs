//! Client-facing message envelope and the publisher that puts it on the bus

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Channel, EventBus};
use crate::error::AppResult;
use crate::models::{Alert, DriverScore, RiskFinding};

pub const MESSAGE_RISK_EVENT: &str = "risk_event";
pub const MESSAGE_ALERT: &str = "alert";
pub const MESSAGE_DRIVER_SCORE: &str = "driver_score";

/// JSON message delivered to dashboard clients
///
/// ```json
/// { "type": "risk_event", "fleet_id": "3", "vehicle_id": "12", "data": { ... }, "timestamp": "2024-05-01T10:00:00Z" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fleet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<String>,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Builds client messages for pipeline events and publishes them
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    /// `fleet_id` scopes delivery; `None` reaches unscoped connections only
    pub async fn publish_risk_finding(&self, finding: &RiskFinding, fleet_id: Option<i64>) -> AppResult<()> {
        let message = BroadcastMessage {
            kind: MESSAGE_RISK_EVENT.to_string(),
            fleet_id: fleet_id.map(|id| id.to_string()),
            vehicle_id: Some(finding.vehicle_id.to_string()),
            data: serde_json::to_value(finding)?,
            timestamp: Utc::now(),
        };
        self.send(Channel::RiskEvents, &message).await
    }

    pub async fn publish_alert(&self, alert: &Alert) -> AppResult<()> {
        let message = BroadcastMessage {
            kind: MESSAGE_ALERT.to_string(),
            fleet_id: Some(alert.fleet_id.to_string()),
            vehicle_id: alert.vehicle_id.map(|id| id.to_string()),
            data: serde_json::to_value(alert)?,
            timestamp: Utc::now(),
        };
        self.send(Channel::Alerts, &message).await
    }

    pub async fn publish_driver_score(&self, score: &DriverScore, fleet_id: i64) -> AppResult<()> {
        let message = BroadcastMessage {
            kind: MESSAGE_DRIVER_SCORE.to_string(),
            fleet_id: Some(fleet_id.to_string()),
            vehicle_id: None,
            data: serde_json::to_value(score)?,
            timestamp: Utc::now(),
        };
        self.send(Channel::DriverUpdates, &message).await
    }

    async fn send(&self, channel: Channel, message: &BroadcastMessage) -> AppResult<()> {
        let payload = serde_json::to_string(message)?;
        self.bus.publish(channel, payload).await
    }
}
