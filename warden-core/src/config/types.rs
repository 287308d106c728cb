use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Reconnection backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first attempt of an episode (ms)
    pub base_delay_ms: u64,
    /// Multiplier applied per attempt
    pub multiplier: f64,
    /// Upper bound on the computed delay (ms), before jitter
    pub max_delay_ms: u64,
    /// Attempts allowed before an episode is exhausted
    pub max_retries: u32,
    /// Jitter added on top of the delay, as a fraction of it (0.0 to 1.0)
    pub jitter_factor: f64,
    /// Fixed pause after a failed attempt before the next one is scheduled (ms)
    pub retry_pause_ms: u64,
    /// How long a connection must stay healthy before the retry counter
    /// resets (ms). Defaults to the health-check interval.
    pub stability_window_ms: Option<u64>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 15_000,
            multiplier: 2.0,
            max_delay_ms: 300_000,
            max_retries: 10,
            jitter_factor: 0.25,
            retry_pause_ms: 5_000,
            stability_window_ms: None,
        }
    }
}

impl BackoffConfig {
    /// Fast retries (for testing)
    pub fn aggressive() -> Self {
        Self {
            base_delay_ms: 100,
            multiplier: 1.5,
            max_delay_ms: 2_000,
            max_retries: 5,
            jitter_factor: 0.1,
            retry_pause_ms: 50,
            stability_window_ms: Some(1_000),
        }
    }

    /// Slow, patient retries (for production fleets)
    pub fn conservative() -> Self {
        Self {
            base_delay_ms: 30_000,
            multiplier: 2.0,
            max_delay_ms: 600_000,
            max_retries: 20,
            jitter_factor: 0.25,
            retry_pause_ms: 10_000,
            stability_window_ms: None,
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn retry_pause(&self) -> Duration {
        Duration::from_millis(self.retry_pause_ms)
    }
}

/// Health prober configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval between probe sweeps (ms)
    pub check_interval_ms: u64,
    /// Hard bound on a single probe (ms)
    pub probe_timeout_ms: u64,
    /// Failed probes in a row before reconnecting
    pub max_consecutive_failures: u32,
    /// Probes allowed in flight at once within a sweep
    pub max_concurrent_probes: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 30_000,
            probe_timeout_ms: 10_000,
            max_consecutive_failures: 3,
            max_concurrent_probes: 16,
        }
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Reconciliation loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Interval between reconciliation sweeps (ms)
    pub check_interval_ms: u64,
    /// UTC hours during which servers usually restart
    pub restart_window_hours_utc: Vec<u8>,
    /// Sweep interval used inside restart windows (ms)
    pub restart_window_interval_ms: u64,
    /// Exhausted episodes older than this are reset by the loop (ms).
    /// `None` leaves them for manual attention.
    pub reset_exhausted_after_ms: Option<u64>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 60_000,
            restart_window_hours_utc: Vec::new(),
            restart_window_interval_ms: 15_000,
            reset_exhausted_after_ms: Some(30 * 60 * 1000),
        }
    }
}

impl ReconcileConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn restart_window_interval(&self) -> Duration {
        Duration::from_millis(self.restart_window_interval_ms)
    }

    pub fn reset_exhausted_after(&self) -> Option<Duration> {
        self.reset_exhausted_after_ms.map(Duration::from_millis)
    }
}

/// Logging and metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub log_level: String,
    pub json_logs: bool,
    pub enable_prometheus: bool,
    pub metrics_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            enable_prometheus: true,
            metrics_addr: "127.0.0.1:9090".to_string(),
        }
    }
}
