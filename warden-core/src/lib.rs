//! Warden Core - Connection Resilience Controller
//!
//! Warden supervises many long-lived connections to game servers, one per
//! tenant, and keeps them up without operator intervention.
//!
//! ## Architecture
//! - **One authority per tenant**: only the `ReconnectionManager` creates
//!   transports; every trigger goes through its guarded entry point
//! - **Active probing**: failures the transport never reports (hangs,
//!   silent restarts, wipes) are caught by the health monitor
//! - **Reconciliation**: desired vs. observed state is compared on a timer
//!   and drift is healed
//! - **No globals**: the `TenantRegistry` is passed explicitly to each loop
//!
//! ## Core Modules
//! - `core`: identifiers, endpoints, server fingerprints, phases, errors
//! - `transport`: traits for the external connection layer
//! - `resilience`: backoff, reconnection, health probing, reconciliation
//! - `controller`: tenant registry and the `ResilienceController` facade
//! - `config`: JSON configuration and profiles
//! - `monitoring`: Prometheus metrics and HTTP export
//! - `testing`: mock and simulated transports

pub mod config;
pub mod controller;
pub mod core;
pub mod monitoring;
pub mod resilience;
pub mod testing;
pub mod transport;
pub mod utils;

pub use config::ControllerConfig;
pub use controller::{ResilienceController, TenantRegistry};
pub use core::{
    ConnectionPhase, ControllerError, Endpoint, ReconnectReason, ServerFingerprint, ServerInfo,
    TenantId, TransportError,
};
pub use resilience::{HealthStats, ReconnectDecision, TenantStatus};
pub use transport::{DesiredStateSource, Transport, TransportFactory};

// Re-export error types
pub use anyhow::{Error, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{ConfigProfile, ControllerConfig, ProfileName};
    pub use crate::controller::ResilienceController;
    pub use crate::core::{
        ConnectionPhase, ControllerError, Credentials, Endpoint, ReconnectReason, RequestKind,
        Response, ServerInfo, TenantId, TransportError,
    };
    pub use crate::monitoring::{MetricsRegistry, MetricsServer, MetricsServerConfig};
    pub use crate::resilience::{HealthStats, ReconnectDecision, TenantStatus};
    pub use crate::transport::{DesiredStateSource, Transport, TransportFactory};

    pub use crate::{Error, Result};
}
