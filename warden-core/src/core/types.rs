//! Core identifiers and value types shared by every supervision loop
//!
//! - `TenantId`: one supervised community/server pairing
//! - `Endpoint`: where a tenant should be connected (host, port, credentials)
//! - `ServerInfo` / `ServerFingerprint`: identity of the remote server
//! - `RequestKind` / `Response`: the round-trip primitive used for probing

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a supervised tenant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque credentials handed to the transport on connect
///
/// The token is never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub player_id: u64,
    pub player_token: i64,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("player_id", &self.player_id)
            .field("player_token", &"<redacted>")
            .finish()
    }
}

/// A game-server endpoint a tenant can be connected to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            port,
            credentials,
        }
    }

    /// Same server, ignoring credentials
    pub fn same_server(&self, other: &Endpoint) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Server information returned by an `Info` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub seed: u32,
    pub map_size: u32,
    /// Unix seconds of the last wipe
    pub wipe_time: u64,
    #[serde(default)]
    pub players: u32,
    #[serde(default)]
    pub max_players: u32,
}

impl ServerInfo {
    pub fn fingerprint(&self) -> ServerFingerprint {
        ServerFingerprint {
            name: self.name.clone(),
            seed: self.seed,
            map_size: self.map_size,
            wipe_time: self.wipe_time,
        }
    }
}

/// Identity of a remote server, used to detect restarts and wipes that
/// the transport layer cannot see
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFingerprint {
    pub name: String,
    pub seed: u32,
    pub map_size: u32,
    pub wipe_time: u64,
}

impl ServerFingerprint {
    /// True if `other` describes a different world.
    ///
    /// The server name is not part of the identity: operators rename
    /// servers without restarting them.
    pub fn identity_differs(&self, other: &ServerFingerprint) -> bool {
        self.seed != other.seed
            || self.map_size != other.map_size
            || self.wipe_time != other.wipe_time
    }
}

/// Kind of round-trip request issued over a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Info,
    Time,
    TeamInfo,
    MapMarkers,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Time => "time",
            Self::TeamInfo => "team_info",
            Self::MapMarkers => "map_markers",
        }
    }
}

/// Response to a round-trip request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Response {
    Info(ServerInfo),
    Payload(serde_json::Value),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(seed: u32, size: u32, wipe: u64) -> ServerInfo {
        ServerInfo {
            name: "Rustopia".to_string(),
            seed,
            map_size: size,
            wipe_time: wipe,
            players: 10,
            max_players: 200,
        }
    }

    #[test]
    fn test_fingerprint_same_world() {
        let a = info(1, 4000, 100).fingerprint();
        let b = info(1, 4000, 100).fingerprint();
        assert!(!a.identity_differs(&b));
    }

    #[test]
    fn test_fingerprint_rename_is_not_a_restart() {
        let a = info(1, 4000, 100).fingerprint();
        let mut b = a.clone();
        b.name = "Rustopia EU".to_string();
        assert!(!a.identity_differs(&b));
    }

    #[test]
    fn test_fingerprint_detects_each_identity_field() {
        let base = info(1, 4000, 100).fingerprint();
        assert!(base.identity_differs(&info(2, 4000, 100).fingerprint()));
        assert!(base.identity_differs(&info(1, 4500, 100).fingerprint()));
        assert!(base.identity_differs(&info(1, 4000, 101).fingerprint()));
    }

    #[test]
    fn test_credentials_debug_redacts_token() {
        let creds = Credentials {
            player_id: 7656,
            player_token: -123456,
        };
        let printed = format!("{:?}", creds);
        assert!(printed.contains("7656"));
        assert!(!printed.contains("123456"));
    }

    #[test]
    fn test_endpoint_same_server_ignores_credentials() {
        let a = Endpoint::new("10.0.0.1", 28082, Credentials { player_id: 1, player_token: 1 });
        let b = Endpoint::new("10.0.0.1", 28082, Credentials { player_id: 2, player_token: 2 });
        let c = Endpoint::new("10.0.0.2", 28082, Credentials { player_id: 1, player_token: 1 });
        assert!(a.same_server(&b));
        assert!(!a.same_server(&c));
        assert_eq!(a.to_string(), "10.0.0.1:28082");
    }
}
