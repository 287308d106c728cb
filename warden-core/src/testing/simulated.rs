//! Simulated game-server transport
//!
//! Randomly injects connect refusals, probe failures, hung probes and server
//! wipes so the controller can be exercised end to end without a real
//! server. Worlds are shared per endpoint: once a server "wipes", every
//! later connection to it sees the new identity.

use crate::core::{Endpoint, RequestKind, Response, ServerInfo, TenantId, TransportError};
use crate::transport::{Transport, TransportFactory};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Failure injection rates (0.0 to 1.0)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Probability a connect is refused
    pub connect_failure_rate: f64,
    /// Probability a probe fails with a transport error
    pub probe_failure_rate: f64,
    /// Probability a probe never answers
    pub probe_hang_rate: f64,
    /// Probability a probe observes a freshly wiped server
    pub wipe_rate: f64,
    /// Simulated handshake latency
    pub connect_latency_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            connect_failure_rate: 0.2,
            probe_failure_rate: 0.05,
            probe_hang_rate: 0.02,
            wipe_rate: 0.01,
            connect_latency_ms: 250,
        }
    }
}

type World = Arc<Mutex<ServerInfo>>;

/// Factory producing simulated connections
pub struct SimulatedTransportFactory {
    config: SimulationConfig,
    worlds: Mutex<HashMap<String, World>>,
}

impl SimulatedTransportFactory {
    pub fn new(config: SimulationConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            worlds: Mutex::new(HashMap::new()),
        })
    }

    fn world_for(&self, endpoint: &Endpoint) -> World {
        let key = endpoint.to_string();
        self.worlds
            .lock()
            .entry(key.clone())
            .or_insert_with(|| {
                let mut rng = rand::thread_rng();
                Arc::new(Mutex::new(ServerInfo {
                    name: format!("Simulated {}", key),
                    seed: rng.gen(),
                    map_size: 3500 + 250 * rng.gen_range(0..6u32),
                    wipe_time: 1_700_000_000,
                    players: 0,
                    max_players: 200,
                }))
            })
            .clone()
    }
}

#[async_trait]
impl TransportFactory for SimulatedTransportFactory {
    async fn connect(
        &self,
        tenant: &TenantId,
        endpoint: &Endpoint,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        tokio::time::sleep(Duration::from_millis(self.config.connect_latency_ms)).await;

        let refused = rand::thread_rng().gen_bool(self.config.connect_failure_rate.clamp(0.0, 1.0));
        if refused {
            debug!(tenant = %tenant, endpoint = %endpoint, "Simulated connect refused");
            return Err(TransportError::Refused(format!("{} refused", endpoint)));
        }

        Ok(Arc::new(SimulatedTransport {
            config: self.config.clone(),
            world: self.world_for(endpoint),
            operational: AtomicBool::new(true),
        }))
    }
}

enum ProbeFate {
    Answer,
    Fail,
    Hang,
    Wipe,
}

struct SimulatedTransport {
    config: SimulationConfig,
    world: World,
    operational: AtomicBool,
}

impl SimulatedTransport {
    fn roll(&self) -> ProbeFate {
        let mut rng = rand::thread_rng();
        let roll: f64 = rng.gen();
        let fail = self.config.probe_failure_rate;
        let hang = fail + self.config.probe_hang_rate;
        let wipe = hang + self.config.wipe_rate;
        if roll < fail {
            ProbeFate::Fail
        } else if roll < hang {
            ProbeFate::Hang
        } else if roll < wipe {
            ProbeFate::Wipe
        } else {
            ProbeFate::Answer
        }
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    fn is_operational(&self) -> bool {
        self.operational.load(Ordering::Acquire)
    }

    async fn disconnect(&self) {
        self.operational.store(false, Ordering::Release);
    }

    async fn request(
        &self,
        kind: RequestKind,
        _timeout: Duration,
    ) -> Result<Response, TransportError> {
        if !self.is_operational() {
            return Err(TransportError::Closed("simulated connection closed".to_string()));
        }

        match self.roll() {
            ProbeFate::Fail => {
                return Err(TransportError::Closed("simulated reset".to_string()));
            }
            ProbeFate::Hang => {
                std::future::pending::<()>().await;
            }
            ProbeFate::Wipe => {
                let mut world = self.world.lock();
                world.seed = world.seed.wrapping_add(1);
                world.wipe_time += 7 * 24 * 3600;
                info!(server = %world.name, seed = world.seed, "Simulated server wipe");
            }
            ProbeFate::Answer => {}
        }

        match kind {
            RequestKind::Info => Ok(Response::Info(self.world.lock().clone())),
            other => Ok(Response::Payload(serde_json::json!({ "kind": other.as_str() }))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_endpoint;

    fn quiet() -> SimulationConfig {
        SimulationConfig {
            connect_failure_rate: 0.0,
            probe_failure_rate: 0.0,
            probe_hang_rate: 0.0,
            wipe_rate: 0.0,
            connect_latency_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_quiet_simulation_always_answers() {
        let factory = SimulatedTransportFactory::new(quiet());
        let transport = factory
            .connect(&TenantId::new("a"), &test_endpoint("sim"))
            .await
            .unwrap();
        assert!(transport.is_operational());

        let response = transport
            .request(RequestKind::Info, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(matches!(response, Response::Info(_)));
    }

    #[tokio::test]
    async fn test_world_shared_per_endpoint() {
        let factory = SimulatedTransportFactory::new(SimulationConfig {
            wipe_rate: 1.0,
            ..quiet()
        });
        let endpoint = test_endpoint("sim");
        let first = factory.connect(&TenantId::new("a"), &endpoint).await.unwrap();
        let second = factory.connect(&TenantId::new("b"), &endpoint).await.unwrap();

        let Ok(Response::Info(before)) = first.request(RequestKind::Info, Duration::from_secs(1)).await else {
            panic!("expected info");
        };
        let Ok(Response::Info(after)) = second.request(RequestKind::Info, Duration::from_secs(1)).await else {
            panic!("expected info");
        };
        assert_eq!(after.seed, before.seed.wrapping_add(1));
    }

    #[tokio::test]
    async fn test_refusing_simulation() {
        let factory = SimulatedTransportFactory::new(SimulationConfig {
            connect_failure_rate: 1.0,
            ..quiet()
        });
        let result = factory.connect(&TenantId::new("a"), &test_endpoint("sim")).await;
        assert!(matches!(result, Err(TransportError::Refused(_))));
    }
}
