//! Resilience controller against a simulated fleet
//!
//! This binary combines:
//! - ResilienceController (backoff, health probing, reconciliation)
//! - SimulatedTransportFactory (random refusals, hung probes, server wipes)
//! - Optional Prometheus endpoint with a JSON `/status` page
//!
//! Tenants come from the run file (`--config`) or a built-in demo fleet.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use warden_bins::common::{
    init_logging, load_run_config, print_statuses, print_summary, CommonArgs,
};
use warden_core::monitoring::{MetricsRegistry, MetricsServer, MetricsServerConfig, StatusProvider};
use warden_core::testing::{SimulatedTransportFactory, StaticDesiredState};
use warden_core::ResilienceController;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = CommonArgs::parse();
    let run = load_run_config(&args)?;

    // Initialize logging
    init_logging(&run.controller)?;

    info!("=== Warden: Simulated Fleet ===");
    info!(
        "Tenants: {}, connect failure rate: {:.0}%, wipe rate: {:.0}%",
        run.tenants.len(),
        run.simulation.connect_failure_rate * 100.0,
        run.simulation.wipe_rate * 100.0
    );

    let desired = StaticDesiredState::new();
    for tenant in &run.tenants {
        desired.set(tenant.id.clone(), tenant.endpoint.clone());
    }

    let factory = SimulatedTransportFactory::new(run.simulation.clone());
    let metrics = Arc::new(MetricsRegistry::new()?);
    let controller = Arc::new(ResilienceController::new(
        run.controller.clone(),
        factory,
        desired,
        metrics.clone(),
    )?);

    // Setup Ctrl+C handler
    let shutdown = CancellationToken::new();
    let shutdown_ctrlc = shutdown.clone();
    ctrlc::set_handler(move || {
        warn!("Received Ctrl+C, initiating graceful shutdown...");
        shutdown_ctrlc.cancel();
    })?;

    if run.controller.metrics.enable_prometheus {
        let status_source = controller.clone();
        let provider: StatusProvider = Arc::new(move || status_source.status_json());
        let server = MetricsServer::new(
            MetricsServerConfig::from_addr(&run.controller.metrics.metrics_addr)?,
            metrics.clone(),
        )
        .with_status(provider);

        let server_shutdown = shutdown.child_token();
        tokio::spawn(async move {
            if let Err(e) = server.serve(server_shutdown).await {
                error!("Metrics server failed: {:#}", e);
            }
        });
    }

    for tenant in &run.tenants {
        controller.register_tenant(tenant.id.clone());
        match controller.connect_tenant(&tenant.id).await {
            Ok(decision) => info!(tenant = %tenant.id, ?decision, "Initial connect requested"),
            Err(e) => warn!(tenant = %tenant.id, error = %e, "Initial connect rejected"),
        }
    }

    controller.start();

    let deadline = args
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut report = tokio::time::interval(Duration::from_secs(args.report_secs.max(1)));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = run_until(deadline) => {
                info!("Run duration reached");
                break;
            }
            _ = report.tick() => {
                let statuses = controller.statuses();
                info!(
                    operational = controller.registry().operational_count(),
                    tenants = statuses.len(),
                    "Fleet status"
                );
                print_statuses(&statuses);
            }
        }
    }

    shutdown.cancel();
    controller.shutdown().await;
    print_summary(&controller.statuses());

    Ok(())
}

async fn run_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
