//! Configuration profiles for different environments
//!
//! Provides pre-configured profiles for:
//! - Development: fast retries and sweeps, verbose logging, no Prometheus
//! - Production: patient backoff, restart windows, JSON logs

use super::types::*;

/// Configuration profile name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileName {
    /// Development profile (local testing)
    Development,
    /// Production profile (supervising a real fleet)
    Production,
}

impl ProfileName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Some(Self::Development),
            "prod" | "production" => Some(Self::Production),
            _ => None,
        }
    }
}

/// Configuration profile with environment-specific defaults
pub struct ConfigProfile;

impl ConfigProfile {
    /// Create a development configuration
    ///
    /// - Sub-second backoff so failures are visible quickly
    /// - Sweeps every few seconds
    /// - Debug logging, Prometheus disabled
    pub fn development() -> ControllerConfig {
        ControllerConfig {
            backoff: BackoffConfig::aggressive(),
            health: HealthConfig {
                check_interval_ms: 2_000,
                probe_timeout_ms: 1_000,
                max_consecutive_failures: 2,
                max_concurrent_probes: 4,
            },
            reconcile: ReconcileConfig {
                check_interval_ms: 5_000,
                restart_window_hours_utc: Vec::new(),
                restart_window_interval_ms: 2_000,
                reset_exhausted_after_ms: Some(30_000),
            },
            metrics: MetricsConfig {
                log_level: "debug".to_string(),
                json_logs: false,
                enable_prometheus: false,
                metrics_addr: "127.0.0.1:9090".to_string(),
            },
        }
    }

    /// Create a production configuration
    ///
    /// - Default backoff (15s base, 5 min cap, 10 retries)
    /// - Faster reconciliation around the usual evening restart hours
    /// - JSON logs for ingestion
    pub fn production() -> ControllerConfig {
        ControllerConfig {
            backoff: BackoffConfig::default(),
            health: HealthConfig::default(),
            reconcile: ReconcileConfig {
                restart_window_hours_utc: vec![18, 19, 20],
                ..ReconcileConfig::default()
            },
            metrics: MetricsConfig {
                log_level: "info".to_string(),
                json_logs: true,
                enable_prometheus: true,
                metrics_addr: "0.0.0.0:9090".to_string(),
            },
        }
    }

    pub fn from_name(name: ProfileName) -> ControllerConfig {
        match name {
            ProfileName::Development => Self::development(),
            ProfileName::Production => Self::production(),
        }
    }
}
