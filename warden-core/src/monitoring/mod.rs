//! Monitoring and observability module
//!
//! Provides the Prometheus metric families updated by the resilience loops
//! and an HTTP server for scraping them.

pub mod metrics;
pub mod server;

pub use metrics::{HealthMetrics, MetricsRegistry, ReconcileMetrics, ReconnectMetrics};
pub use server::{MetricsServer, MetricsServerConfig, StatusProvider};
