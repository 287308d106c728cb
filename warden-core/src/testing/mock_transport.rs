//! Programmable mock transport for testing
//!
//! `MockTransport` answers probes from a script (respond, fail, hang) and
//! `MockTransportFactory` scripts connect outcomes while tracking how many
//! connects are in flight per tenant.

use crate::core::{Endpoint, RequestKind, Response, ServerInfo, TenantId, TransportError};
use crate::transport::{DesiredStateSource, Transport, TransportFactory};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a mock transport does with the next request
#[derive(Debug, Clone)]
pub enum ProbeBehavior {
    /// Answer with server info
    Respond(ServerInfo),
    /// Answer with a non-info payload
    Payload(serde_json::Value),
    /// Fail immediately
    Fail(TransportError),
    /// Never answer
    Hang,
}

/// Mock implementation of a live connection
pub struct MockTransport {
    operational: AtomicBool,
    disconnects: AtomicU64,
    requests: AtomicU64,
    script: Mutex<VecDeque<ProbeBehavior>>,
    default_behavior: Mutex<ProbeBehavior>,
}

impl MockTransport {
    /// Operational transport answering probes with `info`
    pub fn with_info(info: ServerInfo) -> Arc<Self> {
        Arc::new(Self {
            operational: AtomicBool::new(true),
            disconnects: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            script: Mutex::new(VecDeque::new()),
            default_behavior: Mutex::new(ProbeBehavior::Respond(info)),
        })
    }

    /// Operational transport answering probes with the default test server
    pub fn operational() -> Arc<Self> {
        Self::with_info(test_server_info(1))
    }

    pub fn set_operational(&self, operational: bool) {
        self.operational.store(operational, Ordering::Release);
    }

    /// Queue a behavior for the next request (FIFO, before the default)
    pub fn push_behavior(&self, behavior: ProbeBehavior) {
        self.script.lock().push_back(behavior);
    }

    /// Behavior used once the script is drained
    pub fn set_default_behavior(&self, behavior: ProbeBehavior) {
        *self.default_behavior.lock() = behavior;
    }

    pub fn disconnect_count(&self) -> u64 {
        self.disconnects.load(Ordering::Acquire)
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Acquire)
    }

    fn next_behavior(&self) -> ProbeBehavior {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_behavior.lock().clone())
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn is_operational(&self) -> bool {
        self.operational.load(Ordering::Acquire)
    }

    async fn disconnect(&self) {
        self.operational.store(false, Ordering::Release);
        self.disconnects.fetch_add(1, Ordering::AcqRel);
    }

    async fn request(
        &self,
        _kind: RequestKind,
        _timeout: Duration,
    ) -> Result<Response, TransportError> {
        self.requests.fetch_add(1, Ordering::AcqRel);

        if !self.is_operational() {
            return Err(TransportError::Closed("mock transport closed".to_string()));
        }

        match self.next_behavior() {
            ProbeBehavior::Respond(info) => Ok(Response::Info(info)),
            ProbeBehavior::Payload(value) => Ok(Response::Payload(value)),
            ProbeBehavior::Fail(err) => Err(err),
            ProbeBehavior::Hang => {
                std::future::pending::<()>().await;
                Err(TransportError::Closed("unreachable".to_string()))
            }
        }
    }
}

/// Scripted result of one connect call
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    /// Return an operational transport
    Succeed,
    /// Return a transport that never became operational
    NotOperational,
    /// Fail with the given error
    Fail(TransportError),
}

/// Mock transport factory
pub struct MockTransportFactory {
    connects: AtomicU64,
    outcomes: Mutex<VecDeque<ConnectOutcome>>,
    server_info: Mutex<ServerInfo>,
    connect_delay: Mutex<Option<Duration>>,
    created: Mutex<Vec<(TenantId, Arc<MockTransport>)>>,
    in_flight: Mutex<HashMap<TenantId, usize>>,
    max_in_flight: AtomicU64,
}

impl MockTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connects: AtomicU64::new(0),
            outcomes: Mutex::new(VecDeque::new()),
            server_info: Mutex::new(test_server_info(1)),
            connect_delay: Mutex::new(None),
            created: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashMap::new()),
            max_in_flight: AtomicU64::new(0),
        })
    }

    /// Queue the outcome of the next connect (FIFO, default is `Succeed`)
    pub fn push_outcome(&self, outcome: ConnectOutcome) {
        self.outcomes.lock().push_back(outcome);
    }

    /// Queue `n` failing connects
    pub fn fail_next(&self, n: usize) {
        for _ in 0..n {
            self.push_outcome(ConnectOutcome::Fail(TransportError::Refused(
                "mock refused".to_string(),
            )));
        }
    }

    /// Server info answered by transports created from now on
    pub fn set_server_info(&self, info: ServerInfo) {
        *self.server_info.lock() = info;
    }

    /// Make every connect take `delay`
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = Some(delay);
    }

    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Acquire)
    }

    /// Highest number of concurrent connects ever seen for one tenant
    pub fn max_in_flight_per_tenant(&self) -> u64 {
        self.max_in_flight.load(Ordering::Acquire)
    }

    /// Transports created for `tenant`, oldest first
    pub fn created_for(&self, tenant: &TenantId) -> Vec<Arc<MockTransport>> {
        self.created
            .lock()
            .iter()
            .filter(|(t, _)| t == tenant)
            .map(|(_, transport)| transport.clone())
            .collect()
    }

    /// Most recent transport created for `tenant`
    pub fn last_for(&self, tenant: &TenantId) -> Option<Arc<MockTransport>> {
        self.created_for(tenant).pop()
    }
}

struct InFlightGuard<'a> {
    factory: &'a MockTransportFactory,
    tenant: TenantId,
}

impl<'a> InFlightGuard<'a> {
    fn enter(factory: &'a MockTransportFactory, tenant: &TenantId) -> Self {
        let mut in_flight = factory.in_flight.lock();
        let count = in_flight.entry(tenant.clone()).or_insert(0);
        *count += 1;
        factory
            .max_in_flight
            .fetch_max(*count as u64, Ordering::AcqRel);
        Self {
            factory,
            tenant: tenant.clone(),
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(count) = self.factory.in_flight.lock().get_mut(&self.tenant) {
            *count = count.saturating_sub(1);
        }
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn connect(
        &self,
        tenant: &TenantId,
        _endpoint: &Endpoint,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let _guard = InFlightGuard::enter(self, tenant);
        self.connects.fetch_add(1, Ordering::AcqRel);

        let delay = *self.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .outcomes
            .lock()
            .pop_front()
            .unwrap_or(ConnectOutcome::Succeed);

        let transport = match outcome {
            ConnectOutcome::Fail(err) => return Err(err),
            ConnectOutcome::Succeed => MockTransport::with_info(self.server_info.lock().clone()),
            ConnectOutcome::NotOperational => {
                let transport = MockTransport::with_info(self.server_info.lock().clone());
                transport.set_operational(false);
                transport
            }
        };

        self.created.lock().push((tenant.clone(), transport.clone()));
        Ok(transport)
    }
}

/// In-memory desired state
#[derive(Default)]
pub struct StaticDesiredState {
    endpoints: RwLock<HashMap<TenantId, Endpoint>>,
}

impl StaticDesiredState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, tenant: TenantId, endpoint: Endpoint) {
        self.endpoints.write().insert(tenant, endpoint);
    }

    pub fn clear(&self, tenant: &TenantId) {
        self.endpoints.write().remove(tenant);
    }
}

#[async_trait]
impl DesiredStateSource for StaticDesiredState {
    async fn desired_endpoint(&self, tenant: &TenantId) -> Option<Endpoint> {
        self.endpoints.read().get(tenant).cloned()
    }
}

/// Endpoint on `host` with fixed test credentials
pub fn test_endpoint(host: &str) -> Endpoint {
    Endpoint::new(
        host,
        28082,
        crate::core::Credentials {
            player_id: 76561198000000000,
            player_token: 123456789,
        },
    )
}

/// Server info for a world generated from `seed`
pub fn test_server_info(seed: u32) -> ServerInfo {
    ServerInfo {
        name: "Test Server".to_string(),
        seed,
        map_size: 4000,
        wipe_time: 1_700_000_000,
        players: 0,
        max_players: 100,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_script_then_default() {
        let transport = MockTransport::operational();
        transport.push_behavior(ProbeBehavior::Fail(TransportError::Timeout(
            Duration::from_secs(1),
        )));

        let first = transport.request(RequestKind::Info, Duration::from_secs(1)).await;
        assert!(first.is_err());

        let second = transport.request(RequestKind::Info, Duration::from_secs(1)).await;
        assert!(matches!(second, Ok(Response::Info(_))));
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_transport_disconnect() {
        let transport = MockTransport::operational();
        transport.disconnect().await;
        assert!(!transport.is_operational());
        assert_eq!(transport.disconnect_count(), 1);

        let result = transport.request(RequestKind::Info, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(TransportError::Closed(_))));
    }

    #[tokio::test]
    async fn test_factory_outcomes() {
        let factory = MockTransportFactory::new();
        let tenant = TenantId::new("a");
        factory.fail_next(1);
        factory.push_outcome(ConnectOutcome::NotOperational);

        assert!(factory.connect(&tenant, &test_endpoint("h")).await.is_err());
        let t = factory.connect(&tenant, &test_endpoint("h")).await.unwrap();
        assert!(!t.is_operational());
        let t = factory.connect(&tenant, &test_endpoint("h")).await.unwrap();
        assert!(t.is_operational());

        assert_eq!(factory.connect_count(), 3);
        assert_eq!(factory.created_for(&tenant).len(), 2);
        assert_eq!(factory.max_in_flight_per_tenant(), 1);
    }
}
