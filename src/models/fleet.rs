//! Vehicle and driver views
//!
//! Only the columns the pipeline reads. The CRUD layer owns the full records.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: i64,
    pub fleet_id: i64,
    /// Driver currently assigned to the vehicle
    pub driver_id: Option<i64>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: i64,
    pub fleet_id: i64,
    /// active, suspended, inactive
    pub status: String,
    /// Denormalised copy of the latest overall score
    pub risk_score: f64,
}

pub const DRIVER_STATUS_ACTIVE: &str = "active";
