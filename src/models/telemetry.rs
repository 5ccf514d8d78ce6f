//! Telemetry sample model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One raw measurement from a vehicle, as written by the ingestion service.
///
/// `processed_at` is the only field this service ever writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub id: i64,
    pub vehicle_id: i64,
    /// location, speed, acceleration, harsh_braking, ...
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// mph
    pub speed: Option<f64>,
    /// m/s², negative when braking
    pub acceleration: Option<f64>,
    pub data: serde_json::Value,
    pub processed_at: Option<DateTime<Utc>>,
}

impl TelemetrySample {
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}
