//! Alert model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    High,
    Critical,
}

impl AlertPriority {
    /// Severities below high never produce an alert
    pub fn from_severity(severity: Severity) -> Option<Self> {
        match severity {
            Severity::Critical => Some(AlertPriority::Critical),
            Severity::High => Some(AlertPriority::High),
            Severity::Medium | Severity::Low => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertPriority::High => "high",
            AlertPriority::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(AlertPriority::High),
            "critical" => Ok(AlertPriority::Critical),
            other => Err(format!("unexpected alert priority '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Unread,
    Read,
    Dismissed,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Unread => "unread",
            AlertStatus::Read => "read",
            AlertStatus::Dismissed => "dismissed",
        }
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unread" => Ok(AlertStatus::Unread),
            "read" => Ok(AlertStatus::Read),
            "dismissed" => Ok(AlertStatus::Dismissed),
            other => Err(format!("unknown alert status '{}'", other)),
        }
    }
}

/// Alert kind for alerts raised from risk findings
pub const RISK_ALERT_KIND: &str = "risk";

#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub fleet_id: i64,
    pub vehicle_id: Option<i64>,
    pub driver_id: Option<i64>,
    pub risk_event_id: Option<i64>,
    pub kind: String,
    pub priority: AlertPriority,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub fleet_id: i64,
    pub vehicle_id: Option<i64>,
    pub driver_id: Option<i64>,
    pub risk_event_id: Option<i64>,
    #[serde(rename = "type")]
    pub kind: String,
    pub priority: AlertPriority,
    pub title: String,
    pub message: String,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
}
