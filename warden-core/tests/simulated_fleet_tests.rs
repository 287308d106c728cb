//! Full controller runs against the simulated transport
//!
//! Uses the development profile (fast backoff and sweeps) on a paused clock.

use std::sync::Arc;
use std::time::Duration;
use warden_core::config::ConfigProfile;
use warden_core::monitoring::MetricsRegistry;
use warden_core::testing::{test_endpoint, SimulatedTransportFactory, SimulationConfig, StaticDesiredState};
use warden_core::{ConnectionPhase, ReconnectReason, ResilienceController, TenantId};

fn fleet(simulation: SimulationConfig, tenants: &[&str]) -> (Arc<ResilienceController>, Vec<TenantId>) {
    let desired = StaticDesiredState::new();
    let controller = Arc::new(
        ResilienceController::new(
            ConfigProfile::development(),
            SimulatedTransportFactory::new(simulation),
            desired.clone(),
            Arc::new(MetricsRegistry::new().unwrap()),
        )
        .unwrap(),
    );

    let ids: Vec<TenantId> = tenants.iter().map(|t| TenantId::new(*t)).collect();
    for (i, id) in ids.iter().enumerate() {
        controller.register_tenant(id.clone());
        let host = if i % 2 == 0 { "eu.sim" } else { "us.sim" };
        desired.set(id.clone(), test_endpoint(host));
    }
    (controller, ids)
}

fn quiet() -> SimulationConfig {
    SimulationConfig {
        connect_failure_rate: 0.0,
        probe_failure_rate: 0.0,
        probe_hang_rate: 0.0,
        wipe_rate: 0.0,
        connect_latency_ms: 250,
    }
}

#[tokio::test(start_paused = true)]
async fn test_quiet_fleet_stays_connected() {
    let (controller, tenants) = fleet(quiet(), &["alpha", "bravo", "charlie"]);
    for tenant in &tenants {
        controller.connect_tenant(tenant).await.unwrap();
    }
    controller.start();

    tokio::time::sleep(Duration::from_secs(30)).await;

    for status in controller.statuses() {
        assert_eq!(status.phase, ConnectionPhase::Connected, "{}", status.tenant);
        assert_eq!(status.stats.episodes, 1);
        // Stability window elapsed
        assert_eq!(status.retry_count, 0);
    }
    assert_eq!(controller.registry().operational_count(), 3);

    let stats = controller.health_stats();
    assert_eq!(stats.last_checks.len(), 3);
    assert!(stats.consecutive_failures.values().all(|f| *f == 0));

    controller.shutdown().await;
    assert_eq!(controller.registry().operational_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reconciliation_connects_tenants_never_started() {
    let (controller, _tenants) = fleet(quiet(), &["alpha", "bravo"]);
    controller.start();

    // Development reconcile interval is 5s, first attempt waits the base delay
    tokio::time::sleep(Duration::from_secs(8)).await;

    assert_eq!(controller.registry().operational_count(), 2);
    assert!(controller
        .statuses()
        .iter()
        .all(|s| s.reason == Some(ReconnectReason::ReconciliationDrift)));

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_fleet_exhausts() {
    let refusing = SimulationConfig {
        connect_failure_rate: 1.0,
        ..quiet()
    };
    let (controller, tenants) = fleet(refusing, &["alpha", "bravo"]);
    for tenant in &tenants {
        controller.connect_tenant(tenant).await.unwrap();
    }
    controller.start();

    tokio::time::sleep(Duration::from_secs(20)).await;

    for status in controller.statuses() {
        assert!(status.needs_attention, "{}", status.tenant);
        assert_eq!(status.retry_count, status.max_retries);
        assert_eq!(status.stats.failures, status.max_retries as u64);
    }
    let exhausted = controller
        .metrics()
        .reconnect()
        .episodes_exhausted_total
        .get();
    assert_eq!(exhausted, 2);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_wiping_server_is_detected() {
    let wiping = SimulationConfig {
        wipe_rate: 1.0,
        ..quiet()
    };
    let (controller, tenants) = fleet(wiping, &["alpha"]);
    controller.connect_tenant(&tenants[0]).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    // First probe only records the baseline fingerprint
    controller.run_health_sweep().await;
    assert_eq!(controller.metrics().health().server_restarts_detected_total.get(), 0);

    controller.run_health_sweep().await;
    assert_eq!(controller.metrics().health().server_restarts_detected_total.get(), 1);

    let status = controller.status(&tenants[0]).unwrap();
    assert_eq!(status.reason, Some(ReconnectReason::ServerRestartDetected));
    assert_eq!(status.current_delay, Duration::ZERO);
}
