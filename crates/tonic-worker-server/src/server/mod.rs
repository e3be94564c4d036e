pub mod config;
pub mod interceptors;
pub mod telemetry;
