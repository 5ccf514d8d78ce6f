//! Risk finding model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of risky behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskKind {
    Speeding,
    HarshBraking,
    RapidAcceleration,
}

impl RiskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskKind::Speeding => "speeding",
            RiskKind::HarshBraking => "harsh_braking",
            RiskKind::RapidAcceleration => "rapid_acceleration",
        }
    }

    /// Display name used in alert titles
    pub fn title(&self) -> &'static str {
        match self {
            RiskKind::Speeding => "Speeding",
            RiskKind::HarshBraking => "Harsh Braking",
            RiskKind::RapidAcceleration => "Rapid Acceleration",
        }
    }
}

impl fmt::Display for RiskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "speeding" => Ok(RiskKind::Speeding),
            "harsh_braking" => Ok(RiskKind::HarshBraking),
            "rapid_acceleration" => Ok(RiskKind::RapidAcceleration),
            other => Err(format!("unknown risk kind '{}'", other)),
        }
    }
}

/// Ordinal severity tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Only high and critical findings raise alerts
    pub fn is_alertable(&self) -> bool {
        *self >= Severity::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// Lifecycle status of a finding. Only `Open` is set here; the CRUD layer moves it on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl FindingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingStatus::Open => "open",
            FindingStatus::Acknowledged => "acknowledged",
            FindingStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for FindingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(FindingStatus::Open),
            "acknowledged" => Ok(FindingStatus::Acknowledged),
            "resolved" => Ok(FindingStatus::Resolved),
            other => Err(format!("unknown finding status '{}'", other)),
        }
    }
}

/// Classifier output: a finding without identifiers or attribution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskDraft {
    pub kind: RiskKind,
    pub severity: Severity,
    /// 0-100
    pub risk_score: f64,
    pub timestamp: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub description: String,
    pub details: serde_json::Value,
}

/// A draft attributed to a vehicle (and driver, when known), ready to insert
#[derive(Debug, Clone, PartialEq)]
pub struct NewRiskFinding {
    pub vehicle_id: i64,
    pub driver_id: Option<i64>,
    pub draft: RiskDraft,
}

/// A persisted risk finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFinding {
    pub id: i64,
    pub vehicle_id: i64,
    pub driver_id: Option<i64>,
    #[serde(rename = "event_type")]
    pub kind: RiskKind,
    pub severity: Severity,
    pub risk_score: f64,
    pub timestamp: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub description: String,
    #[serde(rename = "data")]
    pub details: serde_json::Value,
    pub status: FindingStatus,
    pub created_at: DateTime<Utc>,
}
