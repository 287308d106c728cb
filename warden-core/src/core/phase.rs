//! Tenant lifecycle phase and reconnection reasons
//!
//! # State Diagram
//!
//! ```text
//!          IDLE ◄──────────── reset_episode() / exhaustion
//!           │                        ▲
//!   request_reconnection()           │
//!           ▼                        │
//!     RECONNECTING ──attempt failed──┤ (retry_count < max: retry internally)
//!           │                        │
//!     mark_success()                 │
//!           ▼                        │
//!       CONNECTED ───request_reconnection()───► RECONNECTING
//! ```
//!
//! `Connected` accepts new reconnection requests exactly like `Idle`.
//! `Reconnecting` is only re-entered through internal retries, never through
//! a second external request.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Authoritative lifecycle phase of one tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    /// No episode running, no known live connection
    Idle,
    /// An episode owns the tenant: a retry timer or an attempt is live
    Reconnecting,
    /// Last episode ended with an operational connection
    Connected,
}

impl ConnectionPhase {
    /// Whether an external request may start a new episode
    pub fn accepts_requests(&self) -> bool {
        !matches!(self, ConnectionPhase::Reconnecting)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Reconnecting => "reconnecting",
            Self::Connected => "connected",
        }
    }

    pub const ALL: [ConnectionPhase; 3] = [
        ConnectionPhase::Idle,
        ConnectionPhase::Reconnecting,
        ConnectionPhase::Connected,
    ];
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cause of a reconnection episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectReason {
    /// Transport layer reported an error or a close
    TransportError,
    /// Health probes failed `max_consecutive_failures` times in a row
    HealthCheckFailure,
    /// Server fingerprint changed: the remote restarted or wiped
    ServerRestartDetected,
    /// Desired state says connected, observed state disagrees
    ReconciliationDrift,
    /// Operator asked for it
    ManualReconnect,
    /// First connection after registration
    InitialConnect,
}

impl ReconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransportError => "transport_error",
            Self::HealthCheckFailure => "health_check_failure",
            Self::ServerRestartDetected => "server_restart_detected",
            Self::ReconciliationDrift => "reconciliation_drift",
            Self::ManualReconnect => "manual_reconnect",
            Self::InitialConnect => "initial_connect",
        }
    }

    /// Reasons whose first attempt runs without backoff delay.
    ///
    /// A detected restart is actionable at once; transport-level errors may
    /// be transient and go through backoff.
    pub fn skips_backoff(&self) -> bool {
        matches!(self, Self::ServerRestartDetected | Self::InitialConnect)
    }

    pub const ALL: [ReconnectReason; 6] = [
        ReconnectReason::TransportError,
        ReconnectReason::HealthCheckFailure,
        ReconnectReason::ServerRestartDetected,
        ReconnectReason::ReconciliationDrift,
        ReconnectReason::ManualReconnect,
        ReconnectReason::InitialConnect,
    ];
}

impl fmt::Display for ReconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_reconnecting_rejects_requests() {
        assert!(ConnectionPhase::Idle.accepts_requests());
        assert!(ConnectionPhase::Connected.accepts_requests());
        assert!(!ConnectionPhase::Reconnecting.accepts_requests());
    }

    #[test]
    fn test_reason_names() {
        assert_eq!(
            ReconnectReason::ServerRestartDetected.to_string(),
            "server_restart_detected"
        );
        assert_eq!(
            ReconnectReason::HealthCheckFailure.as_str(),
            "health_check_failure"
        );
    }

    #[test]
    fn test_backoff_bypass() {
        assert!(ReconnectReason::ServerRestartDetected.skips_backoff());
        assert!(ReconnectReason::InitialConnect.skips_backoff());
        assert!(!ReconnectReason::ManualReconnect.skips_backoff());
        assert!(!ReconnectReason::TransportError.skips_backoff());
        assert!(!ReconnectReason::HealthCheckFailure.skips_backoff());
        assert!(!ReconnectReason::ReconciliationDrift.skips_backoff());
    }

    #[test]
    fn test_phase_serializes_snake_case() {
        let json = serde_json::to_string(&ConnectionPhase::Reconnecting).unwrap();
        assert_eq!(json, "\"reconnecting\"");
    }
}
