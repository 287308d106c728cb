//! Desired-vs-observed reconciliation
//!
//! Every sweep compares each registered tenant's desired endpoint with what
//! the registry actually holds and asks the `ReconnectionManager` for a
//! `reconciliation_drift` episode when they diverge. This catches whatever
//! the transport callbacks and the health prober missed (a dropped error
//! event, a tenant whose first connect never happened, a server move).
//!
//! Game servers tend to restart at the same hours every day. Inside the
//! configured UTC restart hours the sweep interval shrinks so tenants come
//! back quickly after the scheduled restart.

use super::reconnect::{ReconnectDecision, ReconnectionManager};
use crate::config::ReconcileConfig;
use crate::controller::registry::TenantRegistry;
use crate::core::{ControllerError, Endpoint, ReconnectReason, TenantId};
use crate::monitoring::MetricsRegistry;
use crate::transport::DesiredStateSource;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Kind of divergence found for a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftKind {
    /// Desired endpoint present but no operational connection
    Disconnected,
    /// Operational, but against a different server than desired
    WrongEndpoint,
}

impl DriftKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::WrongEndpoint => "wrong_endpoint",
        }
    }
}

/// Summary of one reconciliation sweep
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub checked: usize,
    pub drift: Vec<(TenantId, DriftKind)>,
    /// Drift requests the reconnection manager accepted
    pub accepted: usize,
    /// Exhausted episodes reset after their cool-down
    pub exhausted_reset: usize,
}

/// UTC hour of day for a wall-clock instant
pub fn utc_hour(now: SystemTime) -> u8 {
    let secs = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    ((secs / 3600) % 24) as u8
}

pub struct AutoReconnectManager {
    config: ReconcileConfig,
    registry: Arc<TenantRegistry>,
    reconnect: Arc<ReconnectionManager>,
    desired: Arc<dyn DesiredStateSource>,
    metrics: Arc<MetricsRegistry>,
}

impl AutoReconnectManager {
    pub fn new(
        config: ReconcileConfig,
        registry: Arc<TenantRegistry>,
        reconnect: Arc<ReconnectionManager>,
        desired: Arc<dyn DesiredStateSource>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            config,
            registry,
            reconnect,
            desired,
            metrics,
        }
    }

    pub fn in_restart_window(&self, hour: u8) -> bool {
        self.config.restart_window_hours_utc.contains(&hour)
    }

    /// Sweep interval for the given wall-clock time
    pub fn interval_at(&self, now: SystemTime) -> Duration {
        if self.in_restart_window(utc_hour(now)) {
            self.config.restart_window_interval()
        } else {
            self.config.check_interval()
        }
    }

    /// Reconciliation loop. The interval is re-evaluated after every sweep.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            interval_ms = self.config.check_interval_ms,
            restart_hours = ?self.config.restart_window_hours_utc,
            "Reconciliation loop started"
        );

        loop {
            let interval = self.interval_at(SystemTime::now());
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                report = self.sweep() => {
                    if !report.drift.is_empty() {
                        info!(
                            checked = report.checked,
                            drift = report.drift.len(),
                            accepted = report.accepted,
                            "Reconciliation sweep found drift"
                        );
                    }
                }
            }
        }

        info!("Reconciliation loop stopped");
    }

    /// Check every registered tenant once
    pub async fn sweep(&self) -> SweepReport {
        let started = Instant::now();
        let mode = if self.in_restart_window(utc_hour(SystemTime::now())) {
            "restart_window"
        } else {
            "steady"
        };

        let mut report = SweepReport::default();
        for tenant in self.registry.tenant_ids() {
            report.checked += 1;
            self.check_tenant(&tenant, &mut report).await;
        }

        let metrics = self.metrics.reconcile();
        metrics.sweeps_total.inc();
        metrics
            .sweep_duration_seconds
            .with_label_values(&[mode])
            .observe(started.elapsed().as_secs_f64());
        self.reconnect.refresh_phase_metrics();

        report
    }

    async fn check_tenant(&self, tenant: &TenantId, report: &mut SweepReport) {
        let desired = match self.desired.desired_endpoint(tenant).await {
            Some(endpoint) => endpoint,
            None => return,
        };

        if self.reconnect.is_reconnecting(tenant) {
            return;
        }

        let drift = match self.registry.connection(tenant) {
            Some(connection) if connection.transport.is_operational() => {
                if connection.endpoint.same_server(&desired) {
                    return;
                }
                DriftKind::WrongEndpoint
            }
            _ => DriftKind::Disconnected,
        };

        self.metrics
            .reconcile()
            .drift_detected_total
            .with_label_values(&[drift.as_str()])
            .inc();
        report.drift.push((tenant.clone(), drift));

        if let (Some(age), Some(cool_down)) = (
            self.reconnect.exhausted_for(tenant),
            self.config.reset_exhausted_after(),
        ) {
            if age >= cool_down {
                info!(
                    tenant = %tenant,
                    exhausted_secs = age.as_secs(),
                    "Resetting exhausted reconnection episode"
                );
                if self.reconnect.reset_episode(tenant).is_ok() {
                    report.exhausted_reset += 1;
                }
            }
        }

        debug!(tenant = %tenant, drift = drift.as_str(), endpoint = %desired, "Drift detected");
        match self
            .reconnect
            .request_reconnection(tenant, ReconnectReason::ReconciliationDrift, desired)
        {
            Ok(decision) if decision.is_accepted() => report.accepted += 1,
            Ok(_) => {}
            Err(err) => debug!(tenant = %tenant, error = %err, "Drift reconnection dropped"),
        }
    }

    /// Endpoint to use for a tenant: desired first, then the last known one
    pub async fn resolve_endpoint(&self, tenant: &TenantId) -> Option<Endpoint> {
        match self.desired.desired_endpoint(tenant).await {
            Some(endpoint) => Some(endpoint),
            None => self
                .registry
                .last_endpoint(tenant)
                .or_else(|| self.reconnect.episode_endpoint(tenant)),
        }
    }

    /// Operator-triggered reconnect: resets the episode and starts anew
    pub async fn force_reconnect(
        &self,
        tenant: &TenantId,
    ) -> Result<ReconnectDecision, ControllerError> {
        if !self.registry.contains(tenant) {
            return Err(ControllerError::UnknownTenant(tenant.clone()));
        }
        let endpoint = self
            .resolve_endpoint(tenant)
            .await
            .ok_or_else(|| ControllerError::MissingEndpoint(tenant.clone()))?;

        let decision = self.reconnect.force_reconnection(tenant, endpoint)?;
        let result = if decision.is_accepted() {
            "accepted"
        } else {
            warn!(tenant = %tenant, ?decision, "Forced reconnect rejected");
            "rejected"
        };
        self.metrics
            .reconcile()
            .forced_reconnects_total
            .with_label_values(&[result])
            .inc();

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffConfig;
    use crate::core::ConnectionPhase;
    use crate::testing::{test_endpoint, MockTransport, MockTransportFactory, StaticDesiredState};

    struct Fixture {
        manager: AutoReconnectManager,
        reconnect: Arc<ReconnectionManager>,
        registry: Arc<TenantRegistry>,
        desired: Arc<StaticDesiredState>,
        factory: Arc<MockTransportFactory>,
        metrics: Arc<MetricsRegistry>,
        tenant: TenantId,
    }

    fn fixture(backoff: BackoffConfig) -> Fixture {
        let registry = Arc::new(TenantRegistry::new());
        let metrics = Arc::new(MetricsRegistry::new().unwrap());
        let factory = MockTransportFactory::new();
        let desired = StaticDesiredState::new();
        let reconnect = Arc::new(ReconnectionManager::new(
            backoff,
            Duration::from_secs(30),
            registry.clone(),
            factory.clone(),
            metrics.clone(),
            CancellationToken::new(),
        ));
        let manager = AutoReconnectManager::new(
            ReconcileConfig {
                restart_window_hours_utc: vec![18, 19],
                reset_exhausted_after_ms: Some(60_000),
                ..ReconcileConfig::default()
            },
            registry.clone(),
            reconnect.clone(),
            desired.clone(),
            metrics.clone(),
        );

        let tenant = TenantId::new("guild-1");
        registry.register(tenant.clone());
        desired.set(tenant.clone(), test_endpoint("rust.example"));

        Fixture {
            manager,
            reconnect,
            registry,
            desired,
            factory,
            metrics,
            tenant,
        }
    }

    fn slow_backoff() -> BackoffConfig {
        BackoffConfig {
            jitter_factor: 0.0,
            ..BackoffConfig::default()
        }
    }

    #[test]
    fn test_utc_hour() {
        assert_eq!(utc_hour(UNIX_EPOCH), 0);
        assert_eq!(utc_hour(UNIX_EPOCH + Duration::from_secs(18 * 3600 + 59)), 18);
        assert_eq!(utc_hour(UNIX_EPOCH + Duration::from_secs(3 * 86_400 + 23 * 3600)), 23);
    }

    #[tokio::test]
    async fn test_restart_window_shortens_interval() {
        let f = fixture(slow_backoff());
        let in_window = UNIX_EPOCH + Duration::from_secs(19 * 3600);
        let outside = UNIX_EPOCH + Duration::from_secs(7 * 3600);

        assert_eq!(f.manager.interval_at(in_window), Duration::from_secs(15));
        assert_eq!(f.manager.interval_at(outside), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_double_sweep_requests_once() {
        let f = fixture(slow_backoff());

        let first = f.manager.sweep().await;
        assert_eq!(first.drift, vec![(f.tenant.clone(), DriftKind::Disconnected)]);
        assert_eq!(first.accepted, 1);

        let second = f.manager.sweep().await;
        assert!(second.drift.is_empty());
        assert_eq!(second.accepted, 0);

        let requests = &f.metrics.reconnect().requests_total;
        assert_eq!(
            requests
                .with_label_values(&["reconciliation_drift", "accepted"])
                .get(),
            1
        );
        assert_eq!(f.metrics.reconcile().sweeps_total.get(), 2);
    }

    #[tokio::test]
    async fn test_tenant_without_desired_endpoint_is_left_alone() {
        let f = fixture(slow_backoff());
        f.desired.clear(&f.tenant);

        let report = f.manager.sweep().await;
        assert_eq!(report.checked, 1);
        assert!(report.drift.is_empty());
        assert_eq!(f.reconnect.phase(&f.tenant), ConnectionPhase::Idle);
    }

    #[tokio::test]
    async fn test_healthy_tenant_has_no_drift() {
        let f = fixture(slow_backoff());
        let _ = f.registry.install(
            &f.tenant,
            MockTransport::operational(),
            test_endpoint("rust.example"),
        );

        assert!(f.manager.sweep().await.drift.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_endpoint_is_drift() {
        let f = fixture(slow_backoff());
        let _ = f.registry.install(
            &f.tenant,
            MockTransport::operational(),
            test_endpoint("old.example"),
        );

        let report = f.manager.sweep().await;
        assert_eq!(report.drift, vec![(f.tenant.clone(), DriftKind::WrongEndpoint)]);
        assert!(f.reconnect.is_reconnecting(&f.tenant));
        assert_eq!(
            f.reconnect.episode_endpoint(&f.tenant).unwrap().host,
            "rust.example"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_episode_reset_after_cool_down() {
        let f = fixture(BackoffConfig {
            base_delay_ms: 1_000,
            max_delay_ms: 1_000,
            max_retries: 1,
            jitter_factor: 0.0,
            ..BackoffConfig::default()
        });
        f.factory.fail_next(1);

        f.manager.sweep().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(f.reconnect.status(&f.tenant).unwrap().needs_attention);

        // Inside the cool-down the request is rejected as exhausted
        let report = f.manager.sweep().await;
        assert_eq!(report.accepted, 0);
        assert_eq!(report.exhausted_reset, 0);

        tokio::time::sleep(Duration::from_secs(61)).await;
        let report = f.manager.sweep().await;
        assert_eq!(report.exhausted_reset, 1);
        assert_eq!(report.accepted, 1);
        assert!(f.reconnect.is_reconnecting(&f.tenant));
    }

    #[tokio::test]
    async fn test_force_reconnect_errors() {
        let f = fixture(slow_backoff());

        let unknown = f.manager.force_reconnect(&TenantId::new("ghost")).await;
        assert!(matches!(unknown, Err(ControllerError::UnknownTenant(_))));

        f.desired.clear(&f.tenant);
        let missing = f.manager.force_reconnect(&f.tenant).await;
        assert!(matches!(missing, Err(ControllerError::MissingEndpoint(_))));
    }

    #[tokio::test]
    async fn test_force_reconnect_replaces_waiting_episode() {
        let f = fixture(slow_backoff());
        f.manager.sweep().await;
        assert_eq!(
            f.reconnect.status(&f.tenant).unwrap().reason,
            Some(ReconnectReason::ReconciliationDrift)
        );

        let decision = f.manager.force_reconnect(&f.tenant).await.unwrap();
        assert!(decision.is_accepted());
        let status = f.reconnect.status(&f.tenant).unwrap();
        assert_eq!(status.reason, Some(ReconnectReason::ManualReconnect));
        assert_eq!(status.retry_count, 1);
        assert_eq!(
            f.metrics
                .reconcile()
                .forced_reconnects_total
                .with_label_values(&["accepted"])
                .get(),
            1
        );
    }
}
