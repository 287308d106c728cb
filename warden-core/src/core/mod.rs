//! Core types for connection supervision
//!
//! - `types`: tenant, endpoint and server identity values
//! - `errors`: transport and controller error taxonomy
//! - `phase`: per-tenant lifecycle phase and episode reasons

pub mod errors;
pub mod phase;
pub mod types;

// Re-export commonly used types
pub use errors::{ControllerError, TransportError};
pub use phase::{ConnectionPhase, ReconnectReason};
pub use types::{
    Credentials, Endpoint, RequestKind, Response, ServerFingerprint, ServerInfo, TenantId,
};
