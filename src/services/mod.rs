pub mod catalog;
pub mod relay;
pub mod telemetry;
