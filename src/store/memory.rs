//! In-memory store used by the pipeline tests

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{AlertStore, FleetDirectory, RiskStore, ScoreStore, TelemetryStore};
use crate::error::AppResult;
use crate::models::{
    Alert, AlertStatus, Driver, DriverScore, DriverScoreUpdate, FindingStatus, NewAlert,
    NewRiskFinding, RiskFinding, TelemetrySample, Vehicle, DRIVER_STATUS_ACTIVE,
};

#[derive(Default)]
struct Tables {
    samples: Vec<TelemetrySample>,
    findings: Vec<RiskFinding>,
    alerts: Vec<Alert>,
    vehicles: HashMap<i64, Vehicle>,
    drivers: Vec<Driver>,
    scores: HashMap<i64, DriverScore>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sample(&self, sample: TelemetrySample) {
        self.tables.lock().samples.push(sample);
    }

    pub fn add_vehicle(&self, vehicle: Vehicle) {
        self.tables.lock().vehicles.insert(vehicle.id, vehicle);
    }

    pub fn add_driver(&self, driver: Driver) {
        self.tables.lock().drivers.push(driver);
    }

    /// Insert an already-persisted finding, e.g. one created by an earlier run
    pub fn add_finding(&self, finding: RiskFinding) {
        self.tables.lock().findings.push(finding);
    }

    pub fn samples(&self) -> Vec<TelemetrySample> {
        self.tables.lock().samples.clone()
    }

    pub fn findings(&self) -> Vec<RiskFinding> {
        self.tables.lock().findings.clone()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.tables.lock().alerts.clone()
    }

    pub fn drivers(&self) -> Vec<Driver> {
        self.tables.lock().drivers.clone()
    }

    pub fn score(&self, driver_id: i64) -> Option<DriverScore> {
        self.tables.lock().scores.get(&driver_id).cloned()
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn fetch_unprocessed(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<TelemetrySample>> {
        let tables = self.tables.lock();
        let mut rows: Vec<TelemetrySample> = tables
            .samples
            .iter()
            .filter(|s| s.processed_at.is_none() && s.timestamp > after && s.timestamp <= until)
            .cloned()
            .collect();
        rows.sort_by_key(|s| (s.timestamp, s.id));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn mark_processed(&self, sample_id: i64, at: DateTime<Utc>) -> AppResult<bool> {
        let mut tables = self.tables.lock();
        match tables
            .samples
            .iter_mut()
            .find(|s| s.id == sample_id && s.processed_at.is_none())
        {
            Some(sample) => {
                sample.processed_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl RiskStore for MemoryStore {
    async fn insert_finding(&self, finding: NewRiskFinding) -> AppResult<RiskFinding> {
        let mut tables = self.tables.lock();
        let draft = finding.draft;
        let row = RiskFinding {
            id: tables.next_id(),
            vehicle_id: finding.vehicle_id,
            driver_id: finding.driver_id,
            kind: draft.kind,
            severity: draft.severity,
            risk_score: draft.risk_score,
            timestamp: draft.timestamp,
            latitude: draft.latitude,
            longitude: draft.longitude,
            description: draft.description,
            details: draft.details,
            status: FindingStatus::Open,
            created_at: Utc::now(),
        };
        tables.findings.push(row.clone());
        Ok(row)
    }

    async fn count_driver_findings_since(&self, driver_id: i64, since: DateTime<Utc>) -> AppResult<i64> {
        let tables = self.tables.lock();
        Ok(tables
            .findings
            .iter()
            .filter(|f| f.driver_id == Some(driver_id) && f.created_at > since)
            .count() as i64)
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn insert_alert(&self, alert: NewAlert) -> AppResult<Alert> {
        let mut tables = self.tables.lock();
        let row = Alert {
            id: tables.next_id(),
            fleet_id: alert.fleet_id,
            vehicle_id: alert.vehicle_id,
            driver_id: alert.driver_id,
            risk_event_id: alert.risk_event_id,
            kind: alert.kind,
            priority: alert.priority,
            title: alert.title,
            message: alert.message,
            status: AlertStatus::Unread,
            created_at: Utc::now(),
        };
        tables.alerts.push(row.clone());
        Ok(row)
    }
}

#[async_trait]
impl FleetDirectory for MemoryStore {
    async fn find_vehicle(&self, vehicle_id: i64) -> AppResult<Option<Vehicle>> {
        Ok(self.tables.lock().vehicles.get(&vehicle_id).cloned())
    }

    async fn list_active_drivers(&self) -> AppResult<Vec<Driver>> {
        Ok(self
            .tables
            .lock()
            .drivers
            .iter()
            .filter(|d| d.status == DRIVER_STATUS_ACTIVE)
            .cloned()
            .collect())
    }

    async fn update_driver_risk_score(&self, driver_id: i64, score: f64) -> AppResult<()> {
        let mut tables = self.tables.lock();
        if let Some(driver) = tables.drivers.iter_mut().find(|d| d.id == driver_id) {
            driver.risk_score = score;
        }
        Ok(())
    }
}

#[async_trait]
impl ScoreStore for MemoryStore {
    async fn upsert_driver_score(&self, update: DriverScoreUpdate) -> AppResult<DriverScore> {
        let mut tables = self.tables.lock();
        let id = match tables.scores.get(&update.driver_id) {
            Some(existing) => existing.id,
            None => tables.next_id(),
        };
        let row = DriverScore {
            id,
            driver_id: update.driver_id,
            overall_score: update.overall_score,
            safety_score: update.safety_score,
            efficiency_score: update.efficiency_score,
            total_miles: update.total_miles,
            total_trips: update.total_trips,
            risk_events: update.risk_events,
            last_updated: update.last_updated,
        };
        tables.scores.insert(update.driver_id, row.clone());
        Ok(row)
    }
}
