//! Data models

pub mod telemetry;
pub mod risk;
pub mod alert;
pub mod fleet;
pub mod score;

pub use telemetry::*;
pub use risk::*;
pub use alert::*;
pub use fleet::*;
pub use score::*;
