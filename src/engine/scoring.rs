//! Score Aggregator
//!
//! Recomputes every active driver's score from the findings raised in the
//! trailing window, writes it back and pushes it to dashboards on
//! `driver_updates`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::bus::EventPublisher;
use crate::config::ScoringConfig;
use crate::error::AppResult;
use crate::models::{Driver, DriverScore, DriverScoreUpdate};
use crate::scheduler::PeriodicTask;
use crate::store::{FleetDirectory, RiskStore, ScoreStore};

/// Safety points lost per finding in the window
pub const PENALTY_PER_FINDING: f64 = 5.0;

// ============================================================================
// EFFICIENCY
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Efficiency {
    pub score: f64,
    pub total_miles: f64,
    pub total_trips: i32,
}

/// Source of the efficiency half of the overall score
pub trait EfficiencyModel: Send + Sync {
    fn assess(&self, driver: &Driver) -> Efficiency;
}

/// Same efficiency for every driver. Stands in until trip data is available.
#[derive(Debug, Clone)]
pub struct FixedEfficiency {
    pub score: f64,
    pub total_miles: f64,
    pub total_trips: i32,
}

impl Default for FixedEfficiency {
    fn default() -> Self {
        Self {
            score: 85.0,
            total_miles: 1000.0,
            total_trips: 50,
        }
    }
}

impl EfficiencyModel for FixedEfficiency {
    fn assess(&self, _driver: &Driver) -> Efficiency {
        Efficiency {
            score: self.score,
            total_miles: self.total_miles,
            total_trips: self.total_trips,
        }
    }
}

// ============================================================================
// FORMULAS
// ============================================================================

pub fn safety_score(findings: i64) -> f64 {
    (100.0 - PENALTY_PER_FINDING * findings as f64).max(0.0)
}

pub fn overall_score(safety: f64, efficiency: f64) -> f64 {
    (safety + efficiency) / 2.0
}

// ============================================================================
// AGGREGATOR
// ============================================================================

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScoreReport {
    pub drivers: usize,
    pub updated: usize,
    pub failures: usize,
}

pub struct ScoreAggregator {
    fleet: Arc<dyn FleetDirectory>,
    risks: Arc<dyn RiskStore>,
    scores: Arc<dyn ScoreStore>,
    efficiency: Arc<dyn EfficiencyModel>,
    publisher: EventPublisher,
    config: ScoringConfig,
}

impl ScoreAggregator {
    pub fn new(
        fleet: Arc<dyn FleetDirectory>,
        risks: Arc<dyn RiskStore>,
        scores: Arc<dyn ScoreStore>,
        efficiency: Arc<dyn EfficiencyModel>,
        publisher: EventPublisher,
        config: ScoringConfig,
    ) -> Self {
        Self {
            fleet,
            risks,
            scores,
            efficiency,
            publisher,
            config,
        }
    }

    /// Score every active driver. A failure for one driver does not stop the
    /// others; only listing the drivers can fail the run.
    pub async fn run_once(&self) -> AppResult<ScoreReport> {
        let drivers = self.fleet.list_active_drivers().await?;
        let since = window_start(Utc::now(), self.config.window_days);

        let mut report = ScoreReport {
            drivers: drivers.len(),
            ..Default::default()
        };

        for driver in &drivers {
            match self.score_driver(driver, since).await {
                Ok(score) => {
                    report.updated += 1;
                    if let Err(e) = self.publisher.publish_driver_score(&score, driver.fleet_id).await {
                        tracing::warn!(driver_id = driver.id, error = %e, "Failed to publish driver score");
                    }
                }
                Err(e) => {
                    tracing::error!(driver_id = driver.id, error = %e, "Failed to update driver score");
                    report.failures += 1;
                }
            }
        }

        tracing::info!(
            drivers = report.drivers,
            updated = report.updated,
            failures = report.failures,
            "Driver scores updated"
        );

        Ok(report)
    }

    async fn score_driver(&self, driver: &Driver, since: DateTime<Utc>) -> AppResult<DriverScore> {
        let findings = self.risks.count_driver_findings_since(driver.id, since).await?;
        let efficiency = self.efficiency.assess(driver);

        let safety = safety_score(findings);
        let efficiency_score = efficiency.score.clamp(0.0, 100.0);
        let overall = overall_score(safety, efficiency_score);

        let score = self
            .scores
            .upsert_driver_score(DriverScoreUpdate {
                driver_id: driver.id,
                overall_score: overall,
                safety_score: safety,
                efficiency_score,
                total_miles: efficiency.total_miles,
                total_trips: efficiency.total_trips,
                risk_events: i32::try_from(findings).unwrap_or(i32::MAX),
                last_updated: Utc::now(),
            })
            .await?;

        self.fleet.update_driver_risk_score(driver.id, overall).await?;

        tracing::debug!(driver_id = driver.id, findings, overall, "Driver scored");

        Ok(score)
    }
}

/// Findings after this instant count against the driver. Windows reaching
/// past the calendar count everything.
fn window_start(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    chrono::Duration::try_days(days)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[async_trait]
impl PeriodicTask for ScoreAggregator {
    fn name(&self) -> &'static str {
        "score_aggregator"
    }

    async fn tick(&self) {
        if let Err(e) = self.run_once().await {
            tracing::error!(error = %e, "Failed to list active drivers");
        }
    }
}
