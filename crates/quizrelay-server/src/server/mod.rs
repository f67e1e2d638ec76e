pub mod config;
pub mod loopback;
pub mod telemetry;
