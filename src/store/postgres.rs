//! Postgres implementation of the store traits

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};

use super::{AlertStore, FleetDirectory, RiskStore, ScoreStore, TelemetryStore};
use crate::error::{AppError, AppResult};
use crate::models::{
    Alert, Driver, DriverScore, DriverScoreUpdate, FindingStatus, NewAlert, NewRiskFinding,
    RiskFinding, TelemetrySample, Vehicle, AlertStatus, DRIVER_STATUS_ACTIVE,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl TelemetryStore for PgStore {
    async fn fetch_unprocessed(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<TelemetrySample>> {
        let rows = sqlx::query(
            r#"
            SELECT id, vehicle_id, event_type, "timestamp", latitude, longitude,
                   speed, acceleration, data, processed_at
            FROM telemetry_events
            WHERE processed_at IS NULL AND "timestamp" > $1 AND "timestamp" <= $2
            ORDER BY "timestamp" ASC, id ASC
            LIMIT $3
            "#
        )
        .bind(after)
        .bind(until)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(sample_from_row).collect()
    }

    async fn mark_processed(&self, sample_id: i64, at: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE telemetry_events SET processed_at = $2 WHERE id = $1 AND processed_at IS NULL"
        )
        .bind(sample_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl RiskStore for PgStore {
    async fn insert_finding(&self, finding: NewRiskFinding) -> AppResult<RiskFinding> {
        let draft = finding.draft;
        let row = sqlx::query(
            r#"
            INSERT INTO risk_events (vehicle_id, driver_id, event_type, severity, risk_score, "timestamp",
                                     latitude, longitude, description, data, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW(), NOW())
            RETURNING id, vehicle_id, driver_id, event_type, severity, risk_score, "timestamp",
                      latitude, longitude, description, data, status, created_at
            "#
        )
        .bind(finding.vehicle_id)
        .bind(finding.driver_id)
        .bind(draft.kind.as_str())
        .bind(draft.severity.as_str())
        .bind(draft.risk_score)
        .bind(draft.timestamp)
        .bind(draft.latitude)
        .bind(draft.longitude)
        .bind(&draft.description)
        .bind(&draft.details)
        .bind(FindingStatus::Open.as_str())
        .fetch_one(&self.pool)
        .await?;

        finding_from_row(&row)
    }

    async fn count_driver_findings_since(&self, driver_id: i64, since: DateTime<Utc>) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM risk_events WHERE driver_id = $1 AND created_at > $2"
        )
        .bind(driver_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

#[async_trait]
impl AlertStore for PgStore {
    async fn insert_alert(&self, alert: NewAlert) -> AppResult<Alert> {
        let row = sqlx::query(
            r#"
            INSERT INTO alerts (fleet_id, vehicle_id, driver_id, risk_event_id, type, priority,
                                title, message, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
            RETURNING id, fleet_id, vehicle_id, driver_id, risk_event_id, type, priority,
                      title, message, status, created_at
            "#
        )
        .bind(alert.fleet_id)
        .bind(alert.vehicle_id)
        .bind(alert.driver_id)
        .bind(alert.risk_event_id)
        .bind(&alert.kind)
        .bind(alert.priority.as_str())
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(AlertStatus::Unread.as_str())
        .fetch_one(&self.pool)
        .await?;

        alert_from_row(&row)
    }
}

#[async_trait]
impl FleetDirectory for PgStore {
    async fn find_vehicle(&self, vehicle_id: i64) -> AppResult<Option<Vehicle>> {
        let row = sqlx::query("SELECT id, fleet_id, driver_id, status FROM vehicles WHERE id = $1")
            .bind(vehicle_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| {
            Ok::<_, AppError>(Vehicle {
                id: r.try_get("id")?,
                fleet_id: r.try_get("fleet_id")?,
                driver_id: r.try_get("driver_id")?,
                status: r.try_get("status")?,
            })
        })
        .transpose()
    }

    async fn list_active_drivers(&self) -> AppResult<Vec<Driver>> {
        let rows = sqlx::query(
            "SELECT id, fleet_id, status, risk_score FROM drivers WHERE status = $1 ORDER BY id"
        )
        .bind(DRIVER_STATUS_ACTIVE)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok::<_, AppError>(Driver {
                    id: r.try_get("id")?,
                    fleet_id: r.try_get("fleet_id")?,
                    status: r.try_get("status")?,
                    risk_score: r.try_get("risk_score")?,
                })
            })
            .collect()
    }

    async fn update_driver_risk_score(&self, driver_id: i64, score: f64) -> AppResult<()> {
        sqlx::query("UPDATE drivers SET risk_score = $2, updated_at = NOW() WHERE id = $1")
            .bind(driver_id)
            .bind(score)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ScoreStore for PgStore {
    async fn upsert_driver_score(&self, update: DriverScoreUpdate) -> AppResult<DriverScore> {
        let row = sqlx::query(
            r#"
            INSERT INTO driver_scores (driver_id, overall_score, safety_score, efficiency_score,
                                       total_miles, total_trips, risk_events, last_updated, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
            ON CONFLICT (driver_id) DO UPDATE SET
                overall_score = EXCLUDED.overall_score,
                safety_score = EXCLUDED.safety_score,
                efficiency_score = EXCLUDED.efficiency_score,
                total_miles = EXCLUDED.total_miles,
                total_trips = EXCLUDED.total_trips,
                risk_events = EXCLUDED.risk_events,
                last_updated = EXCLUDED.last_updated,
                updated_at = NOW()
            RETURNING id, driver_id, overall_score, safety_score, efficiency_score,
                      total_miles, total_trips, risk_events, last_updated
            "#
        )
        .bind(update.driver_id)
        .bind(update.overall_score)
        .bind(update.safety_score)
        .bind(update.efficiency_score)
        .bind(update.total_miles)
        .bind(update.total_trips)
        .bind(update.risk_events)
        .bind(update.last_updated)
        .fetch_one(&self.pool)
        .await?;

        Ok(DriverScore {
            id: row.try_get("id")?,
            driver_id: row.try_get("driver_id")?,
            overall_score: row.try_get("overall_score")?,
            safety_score: row.try_get("safety_score")?,
            efficiency_score: row.try_get("efficiency_score")?,
            total_miles: row.try_get("total_miles")?,
            total_trips: row.try_get("total_trips")?,
            risk_events: row.try_get("risk_events")?,
            last_updated: row.try_get("last_updated")?,
        })
    }
}

fn sample_from_row(row: &PgRow) -> AppResult<TelemetrySample> {
    Ok(TelemetrySample {
        id: row.try_get("id")?,
        vehicle_id: row.try_get("vehicle_id")?,
        event_type: row.try_get("event_type")?,
        timestamp: row.try_get("timestamp")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        speed: row.try_get("speed")?,
        acceleration: row.try_get("acceleration")?,
        data: row
            .try_get::<Option<serde_json::Value>, _>("data")?
            .unwrap_or(serde_json::Value::Null),
        processed_at: row.try_get("processed_at")?,
    })
}

fn finding_from_row(row: &PgRow) -> AppResult<RiskFinding> {
    Ok(RiskFinding {
        id: row.try_get("id")?,
        vehicle_id: row.try_get("vehicle_id")?,
        driver_id: row.try_get("driver_id")?,
        kind: parse_column(row, "event_type")?,
        severity: parse_column(row, "severity")?,
        risk_score: row.try_get("risk_score")?,
        timestamp: row.try_get("timestamp")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        description: row.try_get("description")?,
        details: row
            .try_get::<Option<serde_json::Value>, _>("data")?
            .unwrap_or(serde_json::Value::Null),
        status: parse_column(row, "status")?,
        created_at: row.try_get("created_at")?,
    })
}

fn alert_from_row(row: &PgRow) -> AppResult<Alert> {
    Ok(Alert {
        id: row.try_get("id")?,
        fleet_id: row.try_get("fleet_id")?,
        vehicle_id: row.try_get("vehicle_id")?,
        driver_id: row.try_get("driver_id")?,
        risk_event_id: row.try_get("risk_event_id")?,
        kind: row.try_get("type")?,
        priority: parse_column(row, "priority")?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        status: parse_column(row, "status")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Read a text column into one of the string-backed model enums
fn parse_column<T>(row: &PgRow, column: &str) -> AppResult<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>()
        .map_err(|e| AppError::Internal(format!("column {}: {}", column, e)))
}
