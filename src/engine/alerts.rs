//! Alert Emitter
//!
//! Turns a persisted high or critical finding into an unread alert for the
//! owning fleet.

use std::sync::Arc;

use crate::error::AppResult;
use crate::models::{Alert, AlertPriority, NewAlert, RiskFinding, Vehicle, RISK_ALERT_KIND};
use crate::store::AlertStore;

pub struct AlertEmitter {
    alerts: Arc<dyn AlertStore>,
}

impl AlertEmitter {
    pub fn new(alerts: Arc<dyn AlertStore>) -> Self {
        Self { alerts }
    }

    /// Returns `Ok(None)` for findings below high severity.
    ///
    /// `vehicle` is the one the caller already resolved for `finding`; its
    /// fleet owns the alert.
    pub async fn emit(&self, finding: &RiskFinding, vehicle: &Vehicle) -> AppResult<Option<Alert>> {
        let Some(priority) = AlertPriority::from_severity(finding.severity) else {
            return Ok(None);
        };

        let alert = self
            .alerts
            .insert_alert(NewAlert {
                fleet_id: vehicle.fleet_id,
                vehicle_id: Some(finding.vehicle_id),
                driver_id: finding.driver_id,
                risk_event_id: Some(finding.id),
                kind: RISK_ALERT_KIND.to_string(),
                priority,
                title: format!("{} Alert", finding.kind.title()),
                message: finding.description.clone(),
            })
            .await?;

        tracing::info!(
            alert_id = alert.id,
            finding_id = finding.id,
            fleet_id = alert.fleet_id,
            priority = %alert.priority,
            "Alert raised"
        );

        Ok(Some(alert))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::{AlertStatus, FindingStatus, RiskKind, Severity};
    use crate::store::MockAlertStore;
    use chrono::Utc;

    fn finding(severity: Severity) -> RiskFinding {
        RiskFinding {
            id: 99,
            vehicle_id: 12,
            driver_id: Some(7),
            kind: RiskKind::Speeding,
            severity,
            risk_score: 75.0,
            timestamp: Utc::now(),
            latitude: None,
            longitude: None,
            description: "Vehicle exceeded speed limit: 110.0 mph".to_string(),
            details: serde_json::Value::Null,
            status: FindingStatus::Open,
            created_at: Utc::now(),
        }
    }

    fn vehicle() -> Vehicle {
        Vehicle { id: 12, fleet_id: 3, driver_id: Some(7), status: "active".to_string() }
    }

    fn stored(alert: NewAlert) -> Alert {
        Alert {
            id: 1,
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
        }
    }

    #[tokio::test]
    async fn test_high_finding_raises_high_alert() {
        let mut alerts = MockAlertStore::new();
        alerts
            .expect_insert_alert()
            .withf(|a: &NewAlert| {
                a.fleet_id == 3
                    && a.vehicle_id == Some(12)
                    && a.driver_id == Some(7)
                    && a.risk_event_id == Some(99)
                    && a.kind == "risk"
                    && a.priority == AlertPriority::High
                    && a.title == "Speeding Alert"
                    && a.message == "Vehicle exceeded speed limit: 110.0 mph"
            })
            .times(1)
            .return_once(|a| Ok(stored(a)));

        let emitter = AlertEmitter::new(Arc::new(alerts));
        let alert = emitter.emit(&finding(Severity::High), &vehicle()).await.unwrap().unwrap();

        assert_eq!(alert.status, AlertStatus::Unread);
        assert_eq!(alert.priority, AlertPriority::High);
    }

    #[tokio::test]
    async fn test_critical_maps_to_critical_priority() {
        let mut alerts = MockAlertStore::new();
        alerts
            .expect_insert_alert()
            .withf(|a: &NewAlert| a.priority == AlertPriority::Critical)
            .return_once(|a| Ok(stored(a)));

        let emitter = AlertEmitter::new(Arc::new(alerts));
        let alert = emitter.emit(&finding(Severity::Critical), &vehicle()).await.unwrap();

        assert!(alert.is_some());
    }

    #[tokio::test]
    async fn test_alert_goes_to_vehicle_fleet() {
        let mut alerts = MockAlertStore::new();
        alerts
            .expect_insert_alert()
            .withf(|a: &NewAlert| a.fleet_id == 8)
            .times(1)
            .return_once(|a| Ok(stored(a)));

        let moved = Vehicle { fleet_id: 8, ..vehicle() };
        let emitter = AlertEmitter::new(Arc::new(alerts));
        let alert = emitter.emit(&finding(Severity::High), &moved).await.unwrap().unwrap();

        assert_eq!(alert.fleet_id, 8);
    }

    #[tokio::test]
    async fn test_low_and_medium_never_alert() {
        let mut alerts = MockAlertStore::new();
        alerts.expect_insert_alert().never();

        let emitter = AlertEmitter::new(Arc::new(alerts));

        assert!(emitter.emit(&finding(Severity::Low), &vehicle()).await.unwrap().is_none());
        assert!(emitter.emit(&finding(Severity::Medium), &vehicle()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_failure_is_returned() {
        let mut alerts = MockAlertStore::new();
        alerts
            .expect_insert_alert()
            .times(1)
            .return_once(|_| Err(AppError::Internal("insert failed".to_string())));

        let emitter = AlertEmitter::new(Arc::new(alerts));
        let result = emitter.emit(&finding(Severity::Critical), &vehicle()).await;

        assert!(matches!(result, Err(AppError::Internal(_))));
    }
}
