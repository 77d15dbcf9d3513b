// Supporting modules
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Notification domain
pub mod notification;

// Sources of notifications
pub mod api;
pub mod relay;
pub mod transport;

// View state
pub mod center;
