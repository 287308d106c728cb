//! Active health probing
//!
//! Transports do not always report a dead peer: a server can stop answering
//! without closing the socket, or restart (or wipe) and come back with a new
//! identity behind the same address. `ConnectionHealthMonitor` probes every
//! connected tenant on a fixed interval with a bounded `Info` round-trip and
//! escalates to the `ReconnectionManager`:
//!
//! - `max_consecutive_failures` failed probes in a row → `health_check_failure`
//! - server fingerprint changed → `server_restart_detected` (no backoff)

use super::reconnect::ReconnectionManager;
use crate::config::HealthConfig;
use crate::controller::registry::TenantRegistry;
use crate::core::{
    ConnectionPhase, Endpoint, ReconnectReason, RequestKind, Response, ServerFingerprint,
    ServerInfo, TenantId, TransportError,
};
use crate::monitoring::MetricsRegistry;
use crate::transport::Transport;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Probe history of one tenant
#[derive(Debug, Clone, Default)]
pub struct HealthRecord {
    pub last_check_at: Option<SystemTime>,
    pub last_success_at: Option<SystemTime>,
    pub consecutive_failures: u32,
    pub server_fingerprint: Option<ServerFingerprint>,
    /// Endpoint the fingerprint was taken from
    fingerprint_endpoint: Option<Endpoint>,
}

/// Snapshot of prober configuration and per-tenant counters
#[derive(Debug, Clone, Serialize)]
pub struct HealthStats {
    pub check_interval: Duration,
    pub max_consecutive_failures: u32,
    pub last_checks: BTreeMap<TenantId, SystemTime>,
    pub consecutive_failures: BTreeMap<TenantId, u32>,
}

/// Result of probing one tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Not probed: no operational connection, or an episode is running
    Skipped,
    Healthy,
    Failed { consecutive_failures: u32 },
    /// Threshold reached; a `health_check_failure` reconnection was requested
    Escalated,
    RestartDetected {
        previous: ServerFingerprint,
        current: ServerFingerprint,
    },
}

/// Why a probe did not produce server info
#[derive(Debug)]
enum ProbeFailure {
    Timeout,
    Transport(TransportError),
    UnexpectedResponse,
}

impl ProbeFailure {
    fn label(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Transport(_) => "failure",
            Self::UnexpectedResponse => "unexpected",
        }
    }
}

impl std::fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "probe timed out"),
            Self::Transport(err) => write!(f, "{}", err),
            Self::UnexpectedResponse => write!(f, "response was not server info"),
        }
    }
}

pub struct ConnectionHealthMonitor {
    config: HealthConfig,
    registry: Arc<TenantRegistry>,
    reconnect: Arc<ReconnectionManager>,
    metrics: Arc<MetricsRegistry>,
    records: DashMap<TenantId, HealthRecord>,
}

impl ConnectionHealthMonitor {
    pub fn new(
        config: HealthConfig,
        registry: Arc<TenantRegistry>,
        reconnect: Arc<ReconnectionManager>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            config,
            registry,
            reconnect,
            metrics,
            records: DashMap::new(),
        }
    }

    /// Probe loop. Runs until `shutdown` is cancelled; the first sweep
    /// happens one interval after start.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(
            interval_ms = self.config.check_interval_ms,
            threshold = self.config.max_consecutive_failures,
            "Health monitor started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.check_all() => {}
                    }
                }
            }
        }

        info!("Health monitor stopped");
    }

    /// Probe all eligible tenants with bounded parallelism
    pub async fn check_all(self: &Arc<Self>) -> Vec<(TenantId, ProbeOutcome)> {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_probes));
        let mut probes = JoinSet::new();

        for tenant in self.registry.tenant_ids() {
            let monitor = self.clone();
            let semaphore = semaphore.clone();
            probes.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                let outcome = monitor.probe_tenant(&tenant).await;
                Some((tenant, outcome))
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(Some(result)) => outcomes.push(result),
                Ok(None) => {}
                Err(err) => warn!(error = %err, "Health probe task failed"),
            }
        }
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));

        self.metrics
            .health()
            .sweep_duration_seconds
            .observe(started.elapsed().as_secs_f64());
        debug!(
            probed = outcomes
                .iter()
                .filter(|(_, o)| *o != ProbeOutcome::Skipped)
                .count(),
            "Health sweep complete"
        );
        outcomes
    }

    /// Probe a single tenant and act on the result
    pub async fn probe_tenant(&self, tenant: &TenantId) -> ProbeOutcome {
        if self.reconnect.phase(tenant) == ConnectionPhase::Reconnecting {
            return ProbeOutcome::Skipped;
        }
        let connection = match self.registry.connection(tenant) {
            Some(connection) if connection.transport.is_operational() => connection,
            _ => return ProbeOutcome::Skipped,
        };

        let started = Instant::now();
        match self.probe(connection.transport.as_ref()).await {
            Ok(info) => {
                self.metrics
                    .health()
                    .probe_latency_seconds
                    .observe(started.elapsed().as_secs_f64());
                self.on_probe_success(tenant, connection.transport, connection.endpoint, info)
                    .await
            }
            Err(failure) => self.on_probe_failure(tenant, connection.endpoint, failure),
        }
    }

    async fn probe(&self, transport: &dyn Transport) -> Result<ServerInfo, ProbeFailure> {
        let timeout = self.config.probe_timeout();
        match tokio::time::timeout(timeout, transport.request(RequestKind::Info, timeout)).await {
            Err(_) => Err(ProbeFailure::Timeout),
            Ok(Err(err)) => Err(ProbeFailure::Transport(err)),
            Ok(Ok(Response::Info(info))) => Ok(info),
            Ok(Ok(_)) => Err(ProbeFailure::UnexpectedResponse),
        }
    }

    fn on_probe_failure(
        &self,
        tenant: &TenantId,
        endpoint: Endpoint,
        failure: ProbeFailure,
    ) -> ProbeOutcome {
        self.metrics
            .health()
            .probes_total
            .with_label_values(&[failure.label()])
            .inc();
        self.reconnect.note_failure(tenant);

        let (failures, escalate) = {
            let mut record = self.records.entry(tenant.clone()).or_default();
            record.last_check_at = Some(SystemTime::now());
            record.consecutive_failures += 1;
            let failures = record.consecutive_failures;
            let escalate = failures >= self.config.max_consecutive_failures;
            if escalate {
                record.consecutive_failures = 0;
            }
            (failures, escalate)
        };

        if !escalate {
            warn!(
                tenant = %tenant,
                error = %failure,
                consecutive_failures = failures,
                threshold = self.config.max_consecutive_failures,
                "Health probe failed"
            );
            return ProbeOutcome::Failed {
                consecutive_failures: failures,
            };
        }

        warn!(
            tenant = %tenant,
            error = %failure,
            consecutive_failures = failures,
            "Health check threshold reached, requesting reconnection"
        );
        if let Err(err) =
            self.reconnect
                .request_reconnection(tenant, ReconnectReason::HealthCheckFailure, endpoint)
        {
            debug!(tenant = %tenant, error = %err, "Health escalation dropped");
        }
        ProbeOutcome::Escalated
    }

    async fn on_probe_success(
        &self,
        tenant: &TenantId,
        transport: Arc<dyn Transport>,
        endpoint: Endpoint,
        info: ServerInfo,
    ) -> ProbeOutcome {
        let current = info.fingerprint();
        let now = SystemTime::now();

        let previous = {
            let mut record = self.records.entry(tenant.clone()).or_default();
            record.last_check_at = Some(now);
            record.last_success_at = Some(now);
            record.consecutive_failures = 0;

            // A fingerprint from another server says nothing about this one
            let same_server = record
                .fingerprint_endpoint
                .as_ref()
                .map_or(false, |ep| ep.same_server(&endpoint));
            let previous = if same_server {
                record.server_fingerprint.clone()
            } else {
                None
            };

            record.server_fingerprint = Some(current.clone());
            record.fingerprint_endpoint = Some(endpoint.clone());
            previous
        };

        if let Some(previous) = previous.filter(|p| p.identity_differs(&current)) {
            self.metrics
                .health()
                .probes_total
                .with_label_values(&["restart"])
                .inc();
            self.metrics.health().server_restarts_detected_total.inc();
            warn!(
                tenant = %tenant,
                server = %current.name,
                old_seed = previous.seed,
                new_seed = current.seed,
                old_wipe = previous.wipe_time,
                new_wipe = current.wipe_time,
                "Server restart or wipe detected"
            );

            transport.disconnect().await;
            if let Err(err) = self.reconnect.request_reconnection(
                tenant,
                ReconnectReason::ServerRestartDetected,
                endpoint,
            ) {
                debug!(tenant = %tenant, error = %err, "Restart escalation dropped");
            }
            return ProbeOutcome::RestartDetected { previous, current };
        }

        self.metrics
            .health()
            .probes_total
            .with_label_values(&["success"])
            .inc();

        if self.reconnect.phase(tenant) != ConnectionPhase::Connected {
            if let Err(err) = self.reconnect.mark_success(tenant) {
                debug!(tenant = %tenant, error = %err, "mark_success after probe failed");
            }
        }
        ProbeOutcome::Healthy
    }

    /// Drop a tenant's probe history
    pub fn forget(&self, tenant: &TenantId) {
        self.records.remove(tenant);
    }

    pub fn record(&self, tenant: &TenantId) -> Option<HealthRecord> {
        self.records.get(tenant).map(|r| r.clone())
    }

    pub fn health_stats(&self) -> HealthStats {
        let mut last_checks = BTreeMap::new();
        let mut consecutive_failures = BTreeMap::new();
        for entry in self.records.iter() {
            if let Some(at) = entry.last_check_at {
                last_checks.insert(entry.key().clone(), at);
            }
            consecutive_failures.insert(entry.key().clone(), entry.consecutive_failures);
        }

        HealthStats {
            check_interval: self.config.check_interval(),
            max_consecutive_failures: self.config.max_consecutive_failures,
            last_checks,
            consecutive_failures,
        }
    }
}
