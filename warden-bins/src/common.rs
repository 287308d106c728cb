//! Common utilities for all binaries
//!
//! Shared initialization, CLI parsing, and setup code.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use warden_core::config::{ConfigProfile, ControllerConfig, ProfileName};
use warden_core::core::{Credentials, Endpoint, TenantId};
use warden_core::testing::SimulationConfig;
use warden_core::TenantStatus;

/// Common CLI arguments for all binaries
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CommonArgs {
    /// JSON run file (controller config, tenants, simulation rates)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Built-in profile used when no run file is given (development, production)
    #[arg(short, long, default_value = "development")]
    pub profile: String,

    /// Log level, overrides the run file
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long)]
    pub json_logs: bool,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    pub duration_secs: Option<u64>,

    /// Seconds between status reports
    #[arg(long, default_value = "10")]
    pub report_secs: u64,
}

/// One supervised tenant and the server it should be connected to
#[derive(Debug, Clone, Deserialize)]
pub struct FleetTenant {
    pub id: TenantId,
    pub endpoint: Endpoint,
}

/// Everything a run needs: controller config plus the fleet
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    #[serde(flatten)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub tenants: Vec<FleetTenant>,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl RunConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let run: RunConfig = serde_json::from_str(raw).context("Failed to deserialize run file")?;
        run.controller.validate()?;
        Ok(run)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read run file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid run file {}", path.display()))
    }

    /// Profile defaults with a small demo fleet
    pub fn from_profile(profile: ProfileName) -> Self {
        Self {
            controller: ConfigProfile::from_name(profile),
            tenants: demo_fleet(),
            simulation: SimulationConfig::default(),
        }
    }
}

/// Three tenants spread over two servers
pub fn demo_fleet() -> Vec<FleetTenant> {
    let server = |host: &str, port: u16, player_id: u64| {
        Endpoint::new(
            host,
            port,
            Credentials {
                player_id,
                player_token: -1_337,
            },
        )
    };

    vec![
        FleetTenant {
            id: TenantId::new("guild-alpha"),
            endpoint: server("eu.rust.example", 28082, 76561198000000001),
        },
        FleetTenant {
            id: TenantId::new("guild-bravo"),
            endpoint: server("eu.rust.example", 28082, 76561198000000002),
        },
        FleetTenant {
            id: TenantId::new("guild-charlie"),
            endpoint: server("us.rust.example", 28083, 76561198000000003),
        },
    ]
}

/// Resolve the run configuration from CLI arguments
pub fn load_run_config(args: &CommonArgs) -> Result<RunConfig> {
    let mut run = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => {
            let profile = ProfileName::parse(&args.profile)
                .with_context(|| format!("Unknown profile '{}'", args.profile))?;
            RunConfig::from_profile(profile)
        }
    };

    if let Some(level) = &args.log_level {
        run.controller.metrics.log_level = level.clone();
    }
    if args.json_logs {
        run.controller.metrics.json_logs = true;
    }
    run.controller.validate()?;

    Ok(run)
}

/// Initialize tracing/logging
pub fn init_logging(config: &ControllerConfig) -> Result<()> {
    warden_core::utils::init_from_config(&config.metrics)
}

/// Log one line per tenant
pub fn print_statuses(statuses: &[TenantStatus]) {
    for status in statuses {
        if status.needs_attention {
            warn!(
                tenant = %status.tenant,
                retry_count = status.retry_count,
                "Tenant needs attention (reconnection exhausted)"
            );
            continue;
        }
        info!(
            tenant = %status.tenant,
            phase = %status.phase,
            retry_count = status.retry_count,
            reason = ?status.reason,
            "Tenant status"
        );
    }
}

/// Print final statistics
pub fn print_summary(statuses: &[TenantStatus]) {
    info!("=== Final Statistics ===");
    for status in statuses {
        info!(
            "{}: phase={} episodes={} attempts={} successes={} failures={}",
            status.tenant,
            status.phase,
            status.stats.episodes,
            status.stats.attempts,
            status.stats.successes,
            status.stats.failures
        );
    }

    let attempts: u64 = statuses.iter().map(|s| s.stats.attempts).sum();
    let successes: u64 = statuses.iter().map(|s| s.stats.successes).sum();
    if attempts > 0 {
        let success_rate = (successes as f64 / attempts as f64) * 100.0;
        info!("Connect success rate: {:.2}%", success_rate);
    }
}
