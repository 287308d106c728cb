//! Connection resilience
//!
//! - `backoff`: delay computation and retry ceiling
//! - `reconnect`: per-tenant reconnection state machine (single authority
//!   for creating transports)
//! - `health`: active probing, failure threshold, restart detection
//! - `reconcile`: desired-vs-observed sweeps and forced reconnects

pub mod backoff;
pub mod health;
pub mod reconcile;
pub mod reconnect;

pub use backoff::ExponentialBackoff;
pub use health::{ConnectionHealthMonitor, HealthRecord, HealthStats, ProbeOutcome};
pub use reconcile::{AutoReconnectManager, DriftKind, SweepReport};
pub use reconnect::{
    ReconnectDecision, ReconnectionManager, ReconnectionStats, TenantConnectionState, TenantStatus,
};
