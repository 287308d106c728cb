pub mod profiles;
pub mod types;

pub use profiles::{ConfigProfile, ProfileName};
pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

impl ControllerConfig {
    /// Load configuration from a JSON file. Missing sections fall back to
    /// their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_path = path.as_ref();

        let raw = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

        let cfg = Self::from_json(&raw)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

        Ok(cfg)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(raw: &str) -> Result<Self> {
        let cfg: ControllerConfig =
            serde_json::from_str(raw).context("Failed to deserialize configuration")?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Effective stability window: explicit value or one health interval
    pub fn stability_window(&self) -> Duration {
        self.backoff
            .stability_window_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.health.check_interval())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let b = &self.backoff;
        if b.base_delay_ms == 0 {
            anyhow::bail!("backoff.base_delay_ms must be positive");
        }
        if b.multiplier < 1.0 || !b.multiplier.is_finite() {
            anyhow::bail!(
                "backoff.multiplier must be a finite value >= 1.0, got {}",
                b.multiplier
            );
        }
        if b.max_delay_ms < b.base_delay_ms {
            anyhow::bail!("backoff.max_delay_ms cannot be smaller than backoff.base_delay_ms");
        }
        if b.max_retries == 0 {
            anyhow::bail!("backoff.max_retries must be at least 1");
        }
        if !(0.0..=1.0).contains(&b.jitter_factor) {
            anyhow::bail!(
                "backoff.jitter_factor must be within [0.0, 1.0], got {}",
                b.jitter_factor
            );
        }

        let h = &self.health;
        if h.check_interval_ms == 0 {
            anyhow::bail!("health.check_interval_ms must be positive");
        }
        if h.probe_timeout_ms == 0 {
            anyhow::bail!("health.probe_timeout_ms must be positive");
        }
        if h.probe_timeout_ms > h.check_interval_ms {
            anyhow::bail!("health.probe_timeout_ms cannot exceed health.check_interval_ms");
        }
        if h.max_consecutive_failures == 0 {
            anyhow::bail!("health.max_consecutive_failures must be at least 1");
        }
        if h.max_concurrent_probes == 0 {
            anyhow::bail!("health.max_concurrent_probes must be at least 1");
        }

        let r = &self.reconcile;
        if r.check_interval_ms == 0 || r.restart_window_interval_ms == 0 {
            anyhow::bail!("reconcile intervals must be positive");
        }
        if let Some(hour) = r.restart_window_hours_utc.iter().find(|h| **h > 23) {
            anyhow::bail!("reconcile.restart_window_hours_utc contains invalid hour {}", hour);
        }

        // Validate log level
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.metrics.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log level '{}', must be one of: {:?}",
                self.metrics.log_level,
                valid_log_levels
            );
        }
        if self.metrics.enable_prometheus
            && self.metrics.metrics_addr.parse::<std::net::SocketAddr>().is_err()
        {
            anyhow::bail!("Invalid metrics_addr '{}'", self.metrics.metrics_addr);
        }

        Ok(())
    }
}
