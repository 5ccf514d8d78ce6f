//! Persistence seam
//!
//! The relational schema belongs to the fleet CRUD service. The pipeline only
//! needs the handful of conditional queries and single-row updates below.
//! `PgStore` implements every trait against Postgres.

pub mod postgres;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppResult;
use crate::models::{
    Alert, Driver, DriverScore, DriverScoreUpdate, NewAlert, NewRiskFinding, RiskFinding,
    TelemetrySample, Vehicle,
};

pub use postgres::PgStore;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Unprocessed samples with `after < timestamp <= until`, oldest first
    async fn fetch_unprocessed(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<TelemetrySample>>;

    /// Set `processed_at` if still unset. Returns false when already marked.
    async fn mark_processed(&self, sample_id: i64, at: DateTime<Utc>) -> AppResult<bool>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RiskStore: Send + Sync {
    async fn insert_finding(&self, finding: NewRiskFinding) -> AppResult<RiskFinding>;

    async fn count_driver_findings_since(&self, driver_id: i64, since: DateTime<Utc>) -> AppResult<i64>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert_alert(&self, alert: NewAlert) -> AppResult<Alert>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FleetDirectory: Send + Sync {
    async fn find_vehicle(&self, vehicle_id: i64) -> AppResult<Option<Vehicle>>;

    async fn list_active_drivers(&self) -> AppResult<Vec<Driver>>;

    async fn update_driver_risk_score(&self, driver_id: i64, score: f64) -> AppResult<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// Insert or replace the driver's single score row
    async fn upsert_driver_score(&self, update: DriverScoreUpdate) -> AppResult<DriverScore>;
}
