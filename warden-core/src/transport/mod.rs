//! Seams to the external collaborators
//!
//! The controller never speaks the game-server protocol itself. It drives
//! connections through these traits:
//! - `Transport`: one live connection (operational flag, disconnect, round-trip)
//! - `TransportFactory`: builds a new connection for a tenant
//! - `DesiredStateSource`: the tenant configuration store (read-only)

use crate::core::{Endpoint, RequestKind, Response, TenantId, TransportError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A long-lived connection to one game server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connection completed its handshake and has not been closed
    fn is_operational(&self) -> bool;

    /// Close the connection. Idempotent.
    async fn disconnect(&self);

    /// Issue one round-trip request.
    ///
    /// `timeout` is advisory for the transport; callers that need a hard
    /// bound race the future against their own timer.
    async fn request(&self, kind: RequestKind, timeout: Duration)
        -> Result<Response, TransportError>;
}

/// Builds transport connections
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Connect `tenant` to `endpoint` using the endpoint's credentials.
    ///
    /// Implementations own their connect timeout.
    async fn connect(
        &self,
        tenant: &TenantId,
        endpoint: &Endpoint,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Read-only view of per-tenant configuration
#[async_trait]
pub trait DesiredStateSource: Send + Sync {
    /// Server the tenant should be connected to, if any
    async fn desired_endpoint(&self, tenant: &TenantId) -> Option<Endpoint>;
}
