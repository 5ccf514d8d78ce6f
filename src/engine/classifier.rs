//! Risk Classifier
//!
//! Pure mapping from one telemetry sample to zero or more risk drafts.
//! Input: TelemetrySample, RiskThresholds
//! Output: Vec<RiskDraft>

use serde_json::json;

use crate::models::{RiskDraft, RiskKind, Severity, TelemetrySample};

// ============================================================================
// THRESHOLDS & SCORES
// ============================================================================

/// Speed above `HIGH_SPEED_FACTOR × limit` is high severity
pub const HIGH_SPEED_FACTOR: f64 = 1.3;
/// Speed above `CRITICAL_SPEED_FACTOR × limit` is critical severity
pub const CRITICAL_SPEED_FACTOR: f64 = 1.5;

pub const SPEEDING_MEDIUM_SCORE: f64 = 50.0;
pub const SPEEDING_HIGH_SCORE: f64 = 75.0;
pub const SPEEDING_CRITICAL_SCORE: f64 = 90.0;
pub const RAPID_ACCELERATION_SCORE: f64 = 60.0;
pub const HARSH_BRAKING_SCORE: f64 = 65.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskThresholds {
    /// mph
    pub speed_limit: f64,
    /// m/s², positive
    pub harsh_accel_limit: f64,
    /// m/s², negative
    pub harsh_brake_limit: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            speed_limit: 80.0,
            harsh_accel_limit: 4.0,
            harsh_brake_limit: -6.0,
        }
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Classify one sample. Missing speed or acceleration skips that check.
pub fn classify(sample: &TelemetrySample, thresholds: &RiskThresholds) -> Vec<RiskDraft> {
    let mut drafts = Vec::new();

    if let Some(speed) = sample.speed {
        if speed > thresholds.speed_limit {
            let (severity, score) = speeding_severity(speed, thresholds.speed_limit);
            drafts.push(draft(
                sample,
                RiskKind::Speeding,
                severity,
                score,
                format!("Vehicle exceeded speed limit: {:.1} mph", speed),
                json!({ "speed": speed, "threshold": thresholds.speed_limit }),
            ));
        }
    }

    // One field, so at most one of these can fire
    if let Some(accel) = sample.acceleration {
        if accel > thresholds.harsh_accel_limit {
            drafts.push(draft(
                sample,
                RiskKind::RapidAcceleration,
                Severity::Medium,
                RAPID_ACCELERATION_SCORE,
                format!("Harsh acceleration detected: {:.1} m/s²", accel),
                json!({ "acceleration": accel, "threshold": thresholds.harsh_accel_limit }),
            ));
        } else if accel < thresholds.harsh_brake_limit {
            drafts.push(draft(
                sample,
                RiskKind::HarshBraking,
                Severity::Medium,
                HARSH_BRAKING_SCORE,
                format!("Harsh braking detected: {:.1} m/s²", accel),
                json!({ "acceleration": accel, "threshold": thresholds.harsh_brake_limit }),
            ));
        }
    }

    drafts
}

fn speeding_severity(speed: f64, limit: f64) -> (Severity, f64) {
    if speed > limit * CRITICAL_SPEED_FACTOR {
        (Severity::Critical, SPEEDING_CRITICAL_SCORE)
    } else if speed > limit * HIGH_SPEED_FACTOR {
        (Severity::High, SPEEDING_HIGH_SCORE)
    } else {
        (Severity::Medium, SPEEDING_MEDIUM_SCORE)
    }
}

fn draft(
    sample: &TelemetrySample,
    kind: RiskKind,
    severity: Severity,
    risk_score: f64,
    description: String,
    details: serde_json::Value,
) -> RiskDraft {
    RiskDraft {
        kind,
        severity,
        risk_score,
        timestamp: sample.timestamp,
        latitude: sample.latitude,
        longitude: sample.longitude,
        description,
        details,
    }
}

// ============================================================================
// TESTS
// ============================================================================
