pub mod agent;
pub mod config;
pub mod risk;
pub mod rollout;
pub mod session;
pub mod telemetry;
