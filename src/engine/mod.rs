//! Risk pipeline: classification, batch scanning, alerting and driver scoring

pub mod classifier;
pub mod alerts;
pub mod scanner;
pub mod scoring;

pub use alerts::AlertEmitter;
pub use classifier::RiskThresholds;
pub use scanner::BatchScanner;
pub use scoring::{EfficiencyModel, FixedEfficiency, ScoreAggregator};
