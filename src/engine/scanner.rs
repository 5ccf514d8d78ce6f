//! Batch Scanner
//!
//! Each run: fetch unprocessed samples inside the look-back window (oldest
//! first), classify, persist findings, raise alerts for severe ones, publish,
//! then mark the sample processed.
//!
//! Marking happens after persistence. A crash between the two means the sample
//! is classified again on the next run (possible duplicate findings), never
//! that a sample is marked without its findings.
//!
//! Samples that age out of the look-back window while still unprocessed are
//! never scanned. That loss is accepted; widen `LOOKBACK_WINDOW_SECS` if the
//! scanner is expected to be down for longer than the window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::alerts::AlertEmitter;
use super::classifier::{self, RiskThresholds};
use crate::bus::EventPublisher;
use crate::config::ScannerConfig;
use crate::error::AppResult;
use crate::models::{NewRiskFinding, TelemetrySample, Vehicle};
use crate::scheduler::PeriodicTask;
use crate::store::{FleetDirectory, RiskStore, TelemetryStore};

/// Counters for one run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub fetched: usize,
    pub marked: usize,
    pub findings: usize,
    pub alerts: usize,
    pub failures: usize,
}

pub struct BatchScanner {
    telemetry: Arc<dyn TelemetryStore>,
    risks: Arc<dyn RiskStore>,
    fleet: Arc<dyn FleetDirectory>,
    emitter: AlertEmitter,
    publisher: EventPublisher,
    thresholds: RiskThresholds,
    config: ScannerConfig,
}

impl BatchScanner {
    pub fn new(
        telemetry: Arc<dyn TelemetryStore>,
        risks: Arc<dyn RiskStore>,
        fleet: Arc<dyn FleetDirectory>,
        emitter: AlertEmitter,
        publisher: EventPublisher,
        thresholds: RiskThresholds,
        config: ScannerConfig,
    ) -> Self {
        Self {
            telemetry,
            risks,
            fleet,
            emitter,
            publisher,
            thresholds,
            config,
        }
    }

    /// One scan. Only a fetch failure is returned as an error; everything
    /// after that is logged per sample/finding and counted in the report.
    pub async fn run_once(&self) -> AppResult<ScanReport> {
        let now = Utc::now();
        let after = window_start(now, self.config.lookback);

        let samples = self
            .telemetry
            .fetch_unprocessed(after, now, self.config.batch_size)
            .await?;

        let mut report = ScanReport {
            fetched: samples.len(),
            ..Default::default()
        };

        if samples.is_empty() {
            return Ok(report);
        }

        tracing::debug!(count = samples.len(), "Processing telemetry samples");

        // Vehicle lookups are cached for the run
        let mut vehicles: HashMap<i64, Option<Vehicle>> = HashMap::new();

        for sample in &samples {
            self.process_sample(sample, &mut vehicles, &mut report).await;
        }

        tracing::info!(
            samples = report.marked,
            findings = report.findings,
            alerts = report.alerts,
            failures = report.failures,
            "Telemetry scan complete"
        );

        Ok(report)
    }

    async fn process_sample(
        &self,
        sample: &TelemetrySample,
        vehicles: &mut HashMap<i64, Option<Vehicle>>,
        report: &mut ScanReport,
    ) {
        let drafts = classifier::classify(sample, &self.thresholds);

        if !drafts.is_empty() {
            let vehicle = self.resolve_vehicle(sample.vehicle_id, vehicles).await;
            let driver_id = vehicle.as_ref().and_then(|v| v.driver_id);
            let fleet_id = vehicle.as_ref().map(|v| v.fleet_id);

            for draft in drafts {
                let kind = draft.kind;
                let finding = match self
                    .risks
                    .insert_finding(NewRiskFinding {
                        vehicle_id: sample.vehicle_id,
                        driver_id,
                        draft,
                    })
                    .await
                {
                    Ok(finding) => finding,
                    Err(e) => {
                        tracing::error!(
                            sample_id = sample.id,
                            vehicle_id = sample.vehicle_id,
                            kind = %kind,
                            error = %e,
                            "Failed to persist risk finding, dropping it"
                        );
                        report.failures += 1;
                        continue;
                    }
                };
                report.findings += 1;

                if let Err(e) = self.publisher.publish_risk_finding(&finding, fleet_id).await {
                    tracing::warn!(finding_id = finding.id, error = %e, "Failed to publish risk finding");
                }

                if !finding.severity.is_alertable() {
                    continue;
                }

                let Some(vehicle) = vehicle.as_ref() else {
                    tracing::error!(
                        finding_id = finding.id,
                        vehicle_id = finding.vehicle_id,
                        "Vehicle unresolved, finding left without alert"
                    );
                    report.failures += 1;
                    continue;
                };

                match self.emitter.emit(&finding, vehicle).await {
                    Ok(Some(alert)) => {
                        report.alerts += 1;
                        if let Err(e) = self.publisher.publish_alert(&alert).await {
                            tracing::warn!(alert_id = alert.id, error = %e, "Failed to publish alert");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(
                            finding_id = finding.id,
                            vehicle_id = finding.vehicle_id,
                            error = %e,
                            "Failed to create alert"
                        );
                        report.failures += 1;
                    }
                }
            }
        }

        match self.telemetry.mark_processed(sample.id, Utc::now()).await {
            Ok(true) => report.marked += 1,
            Ok(false) => {
                tracing::debug!(sample_id = sample.id, "Sample already marked processed");
            }
            Err(e) => {
                tracing::error!(
                    sample_id = sample.id,
                    error = %e,
                    "Failed to mark sample processed, it will be scanned again"
                );
                report.failures += 1;
            }
        }
    }

    async fn resolve_vehicle(
        &self,
        vehicle_id: i64,
        cache: &mut HashMap<i64, Option<Vehicle>>,
    ) -> Option<Vehicle> {
        if let Some(cached) = cache.get(&vehicle_id) {
            return cached.clone();
        }

        match self.fleet.find_vehicle(vehicle_id).await {
            Ok(vehicle) => {
                if vehicle.is_none() {
                    tracing::warn!(vehicle_id, "Telemetry for unknown vehicle");
                }
                cache.insert(vehicle_id, vehicle.clone());
                vehicle
            }
            Err(e) => {
                // Not cached: the next sample for this vehicle retries
                tracing::warn!(vehicle_id, error = %e, "Vehicle lookup failed, finding left unattributed");
                None
            }
        }
    }
}

/// Start of the look-back window. A window reaching past the representable
/// range scans everything still unprocessed.
fn window_start(now: DateTime<Utc>, lookback: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lookback)
        .ok()
        .and_then(|lookback| now.checked_sub_signed(lookback))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[async_trait]
impl PeriodicTask for BatchScanner {
    fn name(&self) -> &'static str {
        "batch_scanner"
    }

    async fn tick(&self) {
        if let Err(e) = self.run_once().await {
            tracing::error!(error = %e, "Failed to fetch unprocessed telemetry");
        }
    }
}
