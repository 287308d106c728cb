//! Prometheus metrics for connection supervision
//!
//! Provides metrics for:
//! - Reconnection (requests by reason and outcome, attempts, exhaustion, phases)
//! - Health probing (probe results and latency, detected restarts)
//! - Reconciliation (sweeps, drift, forced reconnects)

use crate::core::ConnectionPhase;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use tracing::info;

/// Central registry for all Prometheus metrics
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    reconnect: Arc<ReconnectMetrics>,
    health: Arc<HealthMetrics>,
    reconcile: Arc<ReconcileMetrics>,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all metric families
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let reconnect = Arc::new(ReconnectMetrics::new(&registry)?);
        let health = Arc::new(HealthMetrics::new(&registry)?);
        let reconcile = Arc::new(ReconcileMetrics::new(&registry)?);

        info!("Prometheus metrics registry initialized");

        Ok(Self {
            registry,
            reconnect,
            health,
            reconcile,
        })
    }

    /// Get the underlying Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn reconnect(&self) -> &ReconnectMetrics {
        &self.reconnect
    }

    pub fn health(&self) -> &HealthMetrics {
        &self.health
    }

    pub fn reconcile(&self) -> &ReconcileMetrics {
        &self.reconcile
    }
}

/// Reconnection state machine metrics
pub struct ReconnectMetrics {
    /// Reconnection requests by reason and outcome (accepted, duplicate, exhausted)
    pub requests_total: IntCounterVec,
    /// Connect attempts by result (success, failure, stale)
    pub attempts_total: IntCounterVec,
    /// Episodes that hit the retry ceiling
    pub episodes_exhausted_total: IntCounter,
    /// Tenants per lifecycle phase
    pub tenants_by_phase: IntGaugeVec,
    /// Tenants whose episode is exhausted and waiting for a reset
    pub tenants_needing_attention: IntGauge,
}

impl ReconnectMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let requests_total = IntCounterVec::new(
            Opts::new(
                "reconnect_requests_total",
                "Total number of reconnection requests",
            )
            .namespace("warden"),
            &["reason", "outcome"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let attempts_total = IntCounterVec::new(
            Opts::new("reconnect_attempts_total", "Total number of connect attempts")
                .namespace("warden"),
            &["result"],
        )?;
        registry.register(Box::new(attempts_total.clone()))?;

        let episodes_exhausted_total = IntCounter::new(
            "warden_reconnect_episodes_exhausted_total",
            "Reconnection episodes that reached the retry ceiling",
        )?;
        registry.register(Box::new(episodes_exhausted_total.clone()))?;

        let tenants_by_phase = IntGaugeVec::new(
            Opts::new("tenants_by_phase", "Number of tenants by lifecycle phase")
                .namespace("warden"),
            &["phase"],
        )?;
        registry.register(Box::new(tenants_by_phase.clone()))?;

        let tenants_needing_attention = IntGauge::new(
            "warden_tenants_needing_attention",
            "Tenants with an exhausted reconnection episode",
        )?;
        registry.register(Box::new(tenants_needing_attention.clone()))?;

        Ok(Self {
            requests_total,
            attempts_total,
            episodes_exhausted_total,
            tenants_by_phase,
            tenants_needing_attention,
        })
    }

    /// Overwrite the phase gauges with a fresh count
    pub fn set_phase_counts(&self, counts: &[(ConnectionPhase, i64)], needing_attention: i64) {
        for (phase, count) in counts {
            self.tenants_by_phase
                .with_label_values(&[phase.as_str()])
                .set(*count);
        }
        self.tenants_needing_attention.set(needing_attention);
    }
}

/// Health prober metrics
pub struct HealthMetrics {
    /// Probe results (success, failure, timeout, restart)
    pub probes_total: IntCounterVec,
    /// Probe round-trip latency in seconds
    pub probe_latency_seconds: Histogram,
    /// Server restarts detected through fingerprint changes
    pub server_restarts_detected_total: IntCounter,
    /// Health sweep duration in seconds
    pub sweep_duration_seconds: Histogram,
}

impl HealthMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let probes_total = IntCounterVec::new(
            Opts::new("health_probes_total", "Total number of health probes")
                .namespace("warden"),
            &["result"],
        )?;
        registry.register(Box::new(probes_total.clone()))?;

        let probe_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "warden_health_probe_latency_seconds",
                "Health probe round-trip latency in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;
        registry.register(Box::new(probe_latency_seconds.clone()))?;

        let server_restarts_detected_total = IntCounter::new(
            "warden_health_server_restarts_detected_total",
            "Server restarts or wipes detected through fingerprint changes",
        )?;
        registry.register(Box::new(server_restarts_detected_total.clone()))?;

        let sweep_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "warden_health_sweep_duration_seconds",
                "Duration of one health sweep over all tenants",
            )
            .buckets(vec![0.01, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(sweep_duration_seconds.clone()))?;

        Ok(Self {
            probes_total,
            probe_latency_seconds,
            server_restarts_detected_total,
            sweep_duration_seconds,
        })
    }
}

/// Reconciliation loop metrics
pub struct ReconcileMetrics {
    /// Reconciliation sweeps performed
    pub sweeps_total: IntCounter,
    /// Drift detected by kind (disconnected, wrong_endpoint)
    pub drift_detected_total: IntCounterVec,
    /// Forced reconnects by result (accepted, rejected)
    pub forced_reconnects_total: IntCounterVec,
    /// Reconciliation sweep duration by sweep mode (steady, restart_window)
    pub sweep_duration_seconds: HistogramVec,
}

impl ReconcileMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let sweeps_total = IntCounter::new(
            "warden_reconcile_sweeps_total",
            "Total number of reconciliation sweeps",
        )?;
        registry.register(Box::new(sweeps_total.clone()))?;

        let drift_detected_total = IntCounterVec::new(
            Opts::new(
                "reconcile_drift_detected_total",
                "Desired/observed state divergences detected",
            )
            .namespace("warden"),
            &["kind"],
        )?;
        registry.register(Box::new(drift_detected_total.clone()))?;

        let forced_reconnects_total = IntCounterVec::new(
            Opts::new("reconcile_forced_reconnects_total", "Manual forced reconnects")
                .namespace("warden"),
            &["result"],
        )?;
        registry.register(Box::new(forced_reconnects_total.clone()))?;

        let sweep_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "warden_reconcile_sweep_duration_seconds",
                "Duration of one reconciliation sweep",
            )
            .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0]),
            &["mode"],
        )?;
        registry.register(Box::new(sweep_duration_seconds.clone()))?;

        Ok(Self {
            sweeps_total,
            drift_detected_total,
            forced_reconnects_total,
            sweep_duration_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creation() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics
            .reconnect()
            .requests_total
            .with_label_values(&["health_check_failure", "accepted"])
            .inc();
        metrics.health().server_restarts_detected_total.inc();

        let families = metrics.registry().gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "warden_reconnect_requests_total"));
        assert!(families
            .iter()
            .any(|f| f.get_name() == "warden_health_server_restarts_detected_total"));
    }

    #[test]
    fn test_phase_gauges() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics.reconnect().set_phase_counts(
            &[
                (ConnectionPhase::Idle, 1),
                (ConnectionPhase::Reconnecting, 2),
                (ConnectionPhase::Connected, 7),
            ],
            1,
        );

        let gauge = metrics
            .reconnect()
            .tenants_by_phase
            .with_label_values(&["connected"]);
        assert_eq!(gauge.get(), 7);
        assert_eq!(metrics.reconnect().tenants_needing_attention.get(), 1);
    }

    #[test]
    fn test_independent_registries() {
        // Each controller owns its registry; no global collisions
        let a = MetricsRegistry::new().unwrap();
        let b = MetricsRegistry::new().unwrap();
        a.reconcile().sweeps_total.inc();
        assert_eq!(a.reconcile().sweeps_total.get(), 1);
        assert_eq!(b.reconcile().sweeps_total.get(), 0);
    }
}
