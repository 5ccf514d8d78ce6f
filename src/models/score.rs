//! Driver score model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Values written by one aggregation pass for one driver
#[derive(Debug, Clone, PartialEq)]
pub struct DriverScoreUpdate {
    pub driver_id: i64,
    pub overall_score: f64,
    pub safety_score: f64,
    pub efficiency_score: f64,
    pub total_miles: f64,
    pub total_trips: i32,
    pub risk_events: i32,
    pub last_updated: DateTime<Utc>,
}

/// One row per driver, unique on `driver_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverScore {
    pub id: i64,
    pub driver_id: i64,
    /// 0-100
    pub overall_score: f64,
    pub safety_score: f64,
    pub efficiency_score: f64,
    pub total_miles: f64,
    pub total_trips: i32,
    /// Findings in the scoring window
    pub risk_events: i32,
    pub last_updated: DateTime<Utc>,
}
