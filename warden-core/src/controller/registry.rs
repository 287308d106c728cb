//! Tenant registry
//!
//! Arena of registered tenants keyed by `TenantId`. Holds the live transport
//! of each tenant between a successful connect and the next teardown or
//! replacement, plus the last endpoint the tenant was connected to.
//!
//! All methods are synchronous; no map guard is ever held across an await.

use crate::core::{Endpoint, TenantId};
use crate::transport::Transport;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::SystemTime;

/// Live connection of one tenant
#[derive(Clone)]
pub struct TenantConnection {
    pub transport: Arc<dyn Transport>,
    pub endpoint: Endpoint,
    pub connected_at: SystemTime,
}

impl std::fmt::Debug for TenantConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantConnection")
            .field("endpoint", &self.endpoint)
            .field("operational", &self.transport.is_operational())
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

#[derive(Default)]
struct TenantEntry {
    connection: Option<TenantConnection>,
    last_endpoint: Option<Endpoint>,
}

/// Registry of supervised tenants
#[derive(Default)]
pub struct TenantRegistry {
    tenants: DashMap<TenantId, TenantEntry>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tenant. Returns false if it was already registered.
    pub fn register(&self, tenant: TenantId) -> bool {
        let mut inserted = false;
        self.tenants.entry(tenant).or_insert_with(|| {
            inserted = true;
            TenantEntry::default()
        });
        inserted
    }

    /// Remove a tenant, handing back its live connection (if any) so the
    /// caller can close it outside the map.
    pub fn unregister(&self, tenant: &TenantId) -> Option<TenantConnection> {
        self.tenants
            .remove(tenant)
            .and_then(|(_, entry)| entry.connection)
    }

    pub fn contains(&self, tenant: &TenantId) -> bool {
        self.tenants.contains_key(tenant)
    }

    /// Snapshot of registered tenant ids, sorted for deterministic sweeps
    pub fn tenant_ids(&self) -> Vec<TenantId> {
        let mut ids: Vec<TenantId> = self.tenants.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    /// Current connection of a tenant
    pub fn connection(&self, tenant: &TenantId) -> Option<TenantConnection> {
        self.tenants
            .get(tenant)
            .and_then(|entry| entry.connection.clone())
    }

    /// Tenant has a connection and it reports operational
    pub fn is_operational(&self, tenant: &TenantId) -> bool {
        self.connection(tenant)
            .map_or(false, |c| c.transport.is_operational())
    }

    /// Endpoint of the current or most recent connection
    pub fn last_endpoint(&self, tenant: &TenantId) -> Option<Endpoint> {
        self.tenants
            .get(tenant)
            .and_then(|entry| entry.last_endpoint.clone())
    }

    /// Install a freshly connected transport.
    ///
    /// Returns the replaced connection on success. If the tenant is no
    /// longer registered the new transport is handed back in `Err` and
    /// must be closed by the caller.
    pub fn install(
        &self,
        tenant: &TenantId,
        transport: Arc<dyn Transport>,
        endpoint: Endpoint,
    ) -> Result<Option<TenantConnection>, Arc<dyn Transport>> {
        match self.tenants.get_mut(tenant) {
            Some(mut entry) => {
                entry.last_endpoint = Some(endpoint.clone());
                let previous = entry.connection.replace(TenantConnection {
                    transport,
                    endpoint,
                    connected_at: SystemTime::now(),
                });
                Ok(previous)
            }
            None => Err(transport),
        }
    }

    /// Detach the current connection, keeping the tenant registered
    pub fn take_connection(&self, tenant: &TenantId) -> Option<TenantConnection> {
        self.tenants
            .get_mut(tenant)
            .and_then(|mut entry| entry.connection.take())
    }

    /// Number of tenants whose connection reports operational
    pub fn operational_count(&self) -> usize {
        self.tenants
            .iter()
            .filter(|entry| {
                entry
                    .connection
                    .as_ref()
                    .map_or(false, |c| c.transport.is_operational())
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_endpoint, MockTransport};

    #[test]
    fn test_register_is_idempotent() {
        let registry = TenantRegistry::new();
        assert!(registry.register(TenantId::new("a")));
        assert!(!registry.register(TenantId::new("a")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_install_and_replace() {
        let registry = TenantRegistry::new();
        let tenant = TenantId::new("a");
        registry.register(tenant.clone());

        let first = MockTransport::operational();
        let previous = registry
            .install(&tenant, first.clone(), test_endpoint("one"))
            .ok()
            .flatten();
        assert!(previous.is_none());
        assert!(registry.is_operational(&tenant));

        let second = MockTransport::operational();
        let previous = registry
            .install(&tenant, second, test_endpoint("two"))
            .ok()
            .flatten();
        assert!(previous.is_some());
        assert_eq!(registry.last_endpoint(&tenant).unwrap().host, "two");
    }

    #[test]
    fn test_install_on_unknown_tenant_hands_transport_back() {
        let registry = TenantRegistry::new();
        let result = registry.install(
            &TenantId::new("ghost"),
            MockTransport::operational(),
            test_endpoint("one"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_take_connection_keeps_last_endpoint() {
        let registry = TenantRegistry::new();
        let tenant = TenantId::new("a");
        registry.register(tenant.clone());
        let _ = registry.install(&tenant, MockTransport::operational(), test_endpoint("one"));

        assert!(registry.take_connection(&tenant).is_some());
        assert!(!registry.is_operational(&tenant));
        assert_eq!(registry.last_endpoint(&tenant).unwrap().host, "one");
    }

    #[test]
    fn test_operational_count_and_unregister() {
        let registry = TenantRegistry::new();
        for id in ["a", "b", "c"] {
            registry.register(TenantId::new(id));
        }
        let down = MockTransport::operational();
        let _ = registry.install(&TenantId::new("a"), MockTransport::operational(), test_endpoint("x"));
        let _ = registry.install(&TenantId::new("b"), down.clone(), test_endpoint("x"));
        down.set_operational(false);

        assert_eq!(registry.operational_count(), 1);
        assert!(registry.unregister(&TenantId::new("a")).is_some());
        assert_eq!(registry.tenant_ids(), vec![TenantId::new("b"), TenantId::new("c")]);
    }
}
