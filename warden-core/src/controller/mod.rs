//! Controller facade
//!
//! `ResilienceController` is the composition root. It owns the tenant
//! registry, wires the reconnection manager, the health monitor and the
//! reconciliation loop to it, and exposes the operations the front-end
//! calls (register, connect, status, force reconnect, shutdown).
//!
//! ```text
//!   on_transport_error ─┐
//!   health monitor ─────┼─► ReconnectionManager ─► TransportFactory::connect
//!   reconciliation ─────┤          │
//!   force_reconnect ────┘          ▼
//!                            TenantRegistry
//! ```

pub mod registry;

pub use registry::{TenantConnection, TenantRegistry};

use crate::config::ControllerConfig;
use crate::core::{ConnectionPhase, ControllerError, Endpoint, ReconnectReason, TenantId, TransportError};
use crate::monitoring::MetricsRegistry;
use crate::resilience::{
    AutoReconnectManager, ConnectionHealthMonitor, HealthStats, ReconnectDecision,
    ReconnectionManager, ReconnectionStats, SweepReport, TenantStatus,
};
use crate::transport::{DesiredStateSource, TransportFactory};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct ResilienceController {
    config: ControllerConfig,
    registry: Arc<TenantRegistry>,
    desired: Arc<dyn DesiredStateSource>,
    reconnect: Arc<ReconnectionManager>,
    health: Arc<ConnectionHealthMonitor>,
    reconcile: Arc<AutoReconnectManager>,
    metrics: Arc<MetricsRegistry>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ResilienceController {
    /// Validate `config` and wire all components. Loops start on `start`.
    pub fn new(
        config: ControllerConfig,
        factory: Arc<dyn TransportFactory>,
        desired: Arc<dyn DesiredStateSource>,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self, ControllerError> {
        config
            .validate()
            .map_err(|e| ControllerError::InvalidConfig(e.to_string()))?;

        let shutdown = CancellationToken::new();
        let registry = Arc::new(TenantRegistry::new());

        let reconnect = Arc::new(ReconnectionManager::new(
            config.backoff.clone(),
            config.stability_window(),
            registry.clone(),
            factory,
            metrics.clone(),
            shutdown.clone(),
        ));
        let health = Arc::new(ConnectionHealthMonitor::new(
            config.health.clone(),
            registry.clone(),
            reconnect.clone(),
            metrics.clone(),
        ));
        let reconcile = Arc::new(AutoReconnectManager::new(
            config.reconcile.clone(),
            registry.clone(),
            reconnect.clone(),
            desired.clone(),
            metrics.clone(),
        ));

        Ok(Self {
            config,
            registry,
            desired,
            reconnect,
            health,
            reconcile,
            metrics,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the health and reconciliation loops. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() || self.shutdown.is_cancelled() {
            return;
        }

        tasks.push(tokio::spawn(
            self.health.clone().run(self.shutdown.child_token()),
        ));
        tasks.push(tokio::spawn(
            self.reconcile.clone().run(self.shutdown.child_token()),
        ));

        info!(
            tenants = self.registry.len(),
            health_interval_ms = self.config.health.check_interval_ms,
            reconcile_interval_ms = self.config.reconcile.check_interval_ms,
            "Resilience controller started"
        );
    }

    /// Stop every loop and pending episode, then close all transports
    pub async fn shutdown(&self) {
        info!("Shutting down resilience controller");
        self.shutdown.cancel();
        self.reconnect.cancel_all();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "Controller loop ended abnormally");
            }
        }

        for tenant in self.registry.tenant_ids() {
            if let Some(connection) = self.registry.take_connection(&tenant) {
                connection.transport.disconnect().await;
            }
        }
        info!("Resilience controller stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Start supervising a tenant. Returns false if it was already registered.
    pub fn register_tenant(&self, tenant: TenantId) -> bool {
        let added = self.registry.register(tenant.clone());
        if added {
            info!(tenant = %tenant, "Tenant registered");
        }
        added
    }

    /// First connect for a tenant, against its desired endpoint, with no
    /// initial delay
    pub async fn connect_tenant(
        &self,
        tenant: &TenantId,
    ) -> Result<ReconnectDecision, ControllerError> {
        self.ensure_registered(tenant)?;
        let endpoint = self
            .desired
            .desired_endpoint(tenant)
            .await
            .ok_or_else(|| ControllerError::MissingEndpoint(tenant.clone()))?;

        self.reconnect
            .request_reconnection(tenant, ReconnectReason::InitialConnect, endpoint)
    }

    /// Close the tenant's connection and clear its episode. The tenant stays
    /// registered; reconciliation reconnects it while a desired endpoint is
    /// configured.
    pub async fn disconnect_tenant(&self, tenant: &TenantId) -> Result<(), ControllerError> {
        self.reconnect.reset_episode(tenant)?;
        self.health.forget(tenant);
        if let Some(connection) = self.registry.take_connection(tenant) {
            connection.transport.disconnect().await;
        }
        info!(tenant = %tenant, "Tenant disconnected");
        Ok(())
    }

    /// Stop supervising a tenant and drop all of its state
    pub async fn remove_tenant(&self, tenant: &TenantId) -> bool {
        let known = self.registry.contains(tenant);
        // Unregister first so in-flight episode tasks become no-ops
        let connection = self.registry.unregister(tenant);

        self.reconnect.teardown(tenant).await;
        self.health.forget(tenant);
        if let Some(connection) = connection {
            connection.transport.disconnect().await;
        }

        if known {
            info!(tenant = %tenant, "Tenant removed");
        }
        known
    }

    /// The transport of `tenant` reported an error or closed
    pub async fn on_transport_error(
        &self,
        tenant: &TenantId,
        error: &TransportError,
    ) -> Result<ReconnectDecision, ControllerError> {
        self.ensure_registered(tenant)?;
        warn!(tenant = %tenant, error = %error, kind = error.kind(), "Transport error reported");
        self.reconnect.note_failure(tenant);

        let endpoint = self.endpoint_for(tenant).await?;
        self.reconnect
            .request_reconnection(tenant, ReconnectReason::TransportError, endpoint)
    }

    /// The transport of `tenant` finished its handshake
    pub fn on_transport_ready(&self, tenant: &TenantId) -> Result<(), ControllerError> {
        debug!(tenant = %tenant, "Transport ready reported");
        self.reconnect.mark_success(tenant)
    }

    /// Operator reconnect; see `AutoReconnectManager::force_reconnect`
    pub async fn force_reconnect(
        &self,
        tenant: &TenantId,
    ) -> Result<ReconnectDecision, ControllerError> {
        self.reconcile.force_reconnect(tenant).await
    }

    /// Clear an exhausted (or any) episode so new requests are accepted
    pub fn reset_episode(&self, tenant: &TenantId) -> Result<(), ControllerError> {
        self.reconnect.reset_episode(tenant)
    }

    pub fn status(&self, tenant: &TenantId) -> Result<TenantStatus, ControllerError> {
        self.ensure_registered(tenant)?;
        Ok(self
            .reconnect
            .status(tenant)
            .unwrap_or_else(|| self.idle_status(tenant)))
    }

    /// Status of every registered tenant, sorted by id
    pub fn statuses(&self) -> Vec<TenantStatus> {
        self.registry
            .tenant_ids()
            .into_iter()
            .map(|tenant| {
                self.reconnect
                    .status(&tenant)
                    .unwrap_or_else(|| self.idle_status(&tenant))
            })
            .collect()
    }

    pub fn health_stats(&self) -> HealthStats {
        self.health.health_stats()
    }

    /// Run one probe sweep now, outside the loop schedule
    pub async fn run_health_sweep(&self) {
        self.health.check_all().await;
    }

    /// Run one reconciliation sweep now, outside the loop schedule
    pub async fn run_reconcile_sweep(&self) -> SweepReport {
        self.reconcile.sweep().await
    }

    /// JSON document for the `/status` endpoint
    pub fn status_json(&self) -> serde_json::Value {
        self.reconnect.refresh_phase_metrics();
        serde_json::json!({
            "tenants": self.statuses(),
            "operational": self.registry.operational_count(),
            "health": self.health_stats(),
        })
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn registry(&self) -> &Arc<TenantRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    fn ensure_registered(&self, tenant: &TenantId) -> Result<(), ControllerError> {
        if self.registry.contains(tenant) {
            Ok(())
        } else {
            Err(ControllerError::UnknownTenant(tenant.clone()))
        }
    }

    /// Endpoint to reconnect to: current connection, then desired state,
    /// then the last one ever used
    async fn endpoint_for(&self, tenant: &TenantId) -> Result<Endpoint, ControllerError> {
        if let Some(connection) = self.registry.connection(tenant) {
            return Ok(connection.endpoint);
        }
        self.reconcile
            .resolve_endpoint(tenant)
            .await
            .ok_or_else(|| ControllerError::MissingEndpoint(tenant.clone()))
    }

    fn idle_status(&self, tenant: &TenantId) -> TenantStatus {
        TenantStatus {
            tenant: tenant.clone(),
            phase: ConnectionPhase::Idle,
            retry_count: 0,
            max_retries: self.config.backoff.max_retries,
            current_delay: Duration::ZERO,
            last_attempt_at: None,
            reason: None,
            needs_attention: false,
            stats: ReconnectionStats::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_endpoint, MockTransportFactory, StaticDesiredState};

    fn controller() -> (ResilienceController, Arc<StaticDesiredState>, Arc<MockTransportFactory>) {
        let factory = MockTransportFactory::new();
        let desired = StaticDesiredState::new();
        let controller = ResilienceController::new(
            ControllerConfig::default(),
            factory.clone(),
            desired.clone(),
            Arc::new(MetricsRegistry::new().unwrap()),
        )
        .unwrap();
        (controller, desired, factory)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ControllerConfig::default();
        config.backoff.max_retries = 0;

        let result = ResilienceController::new(
            config,
            MockTransportFactory::new(),
            StaticDesiredState::new(),
            Arc::new(MetricsRegistry::new().unwrap()),
        );
        assert!(matches!(result, Err(ControllerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_connect_tenant_requires_endpoint() {
        let (controller, desired, factory) = controller();
        let tenant = TenantId::new("guild-1");

        assert!(matches!(
            controller.connect_tenant(&tenant).await,
            Err(ControllerError::UnknownTenant(_))
        ));

        controller.register_tenant(tenant.clone());
        assert!(matches!(
            controller.connect_tenant(&tenant).await,
            Err(ControllerError::MissingEndpoint(_))
        ));

        desired.set(tenant.clone(), test_endpoint("rust.example"));
        let decision = controller.connect_tenant(&tenant).await.unwrap();
        assert_eq!(
            decision,
            ReconnectDecision::Accepted {
                attempt: 1,
                delay: Duration::ZERO
            }
        );

        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(factory.connect_count(), 1);
        assert_eq!(controller.status(&tenant).unwrap().phase, ConnectionPhase::Connected);
    }

    #[tokio::test]
    async fn test_status_of_fresh_tenant_is_idle() {
        let (controller, _desired, _factory) = controller();
        let tenant = TenantId::new("guild-1");
        controller.register_tenant(tenant.clone());

        let status = controller.status(&tenant).unwrap();
        assert_eq!(status.phase, ConnectionPhase::Idle);
        assert_eq!(status.max_retries, 10);
        assert!(!status.needs_attention);
        assert_eq!(controller.statuses().len(), 1);
        assert!(controller.status(&TenantId::new("ghost")).is_err());
    }

    #[tokio::test]
    async fn test_transport_error_without_endpoint() {
        let (controller, _desired, _factory) = controller();
        let tenant = TenantId::new("guild-1");
        controller.register_tenant(tenant.clone());

        let result = controller
            .on_transport_error(&tenant, &TransportError::Closed("eof".to_string()))
            .await;
        assert!(matches!(result, Err(ControllerError::MissingEndpoint(_))));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let (controller, _desired, _factory) = controller();
        controller.start();
        controller.start();
        assert_eq!(controller.tasks.lock().len(), 2);

        controller.shutdown().await;
        assert!(controller.is_shut_down());
        assert!(controller.tasks.lock().is_empty());

        // No restart after shutdown
        controller.start();
        assert!(controller.tasks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_status_json() {
        let (controller, _desired, _factory) = controller();
        controller.register_tenant(TenantId::new("guild-1"));

        let json = controller.status_json();
        assert_eq!(json["tenants"][0]["tenant"], "guild-1");
        assert_eq!(json["tenants"][0]["phase"], "idle");
        assert_eq!(json["operational"], 0);
    }
}
