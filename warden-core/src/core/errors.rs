//! Error types for transport and controller operations
//!
//! Transport errors are transient by nature and are converted into retry
//! steps by the reconnection manager. Controller errors are programming or
//! configuration mistakes and are returned synchronously, never retried.

use super::types::TenantId;
use std::time::Duration;
use thiserror::Error;

/// Failures reported by a transport connection or its factory
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Request or connect did not complete in time
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Remote refused the connection (or DNS failed)
    #[error("connection refused: {0}")]
    Refused(String),

    /// Connection was closed or reset underneath us
    #[error("connection closed: {0}")]
    Closed(String),

    /// Remote answered with something we did not ask for
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Refused(_) => "refused",
            Self::Closed(_) => "closed",
            Self::Protocol(_) => "protocol",
        }
    }
}

/// Errors returned synchronously by the controller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    /// Operation referenced a tenant that was never registered (or was removed)
    #[error("tenant {0} is not registered")]
    UnknownTenant(TenantId),

    /// Tenant has no desired endpoint and none was ever connected
    #[error("tenant {0} has no endpoint to connect to")]
    MissingEndpoint(TenantId),

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
