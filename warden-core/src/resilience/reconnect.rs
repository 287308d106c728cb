//! Per-tenant reconnection state machine
//!
//! `ReconnectionManager` is the only component allowed to create a new
//! transport for a tenant. Every trigger (transport error callback, health
//! prober, reconciliation loop, operator) goes through
//! `request_reconnection`, which checks the guard and transitions the phase
//! inside one per-tenant critical section. Simultaneous triggers therefore
//! collapse into a single accepted episode.
//!
//! An accepted episode is one tokio task: it waits the backoff delay, tears
//! down the old transport, connects, and on failure waits again until it
//! either succeeds or exhausts `max_retries`. Each episode carries a
//! generation number and a cancellation token; a task whose generation is
//! no longer current is a no-op.

use super::backoff::ExponentialBackoff;
use crate::config::BackoffConfig;
use crate::controller::registry::TenantRegistry;
use crate::core::{
    ConnectionPhase, ControllerError, Endpoint, ReconnectReason, TenantId, TransportError,
};
use crate::monitoring::MetricsRegistry;
use crate::transport::{Transport, TransportFactory};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifetime counters for one tenant
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconnectionStats {
    /// Episodes accepted
    pub episodes: u64,
    /// Connect attempts started
    pub attempts: u64,
    /// Attempts that produced an operational connection
    pub successes: u64,
    /// Attempts that failed
    pub failures: u64,
}

/// Retry state of one tenant
#[derive(Debug)]
pub struct TenantConnectionState {
    phase: ConnectionPhase,
    retry_count: u32,
    current_delay: Duration,
    last_attempt_at: Option<SystemTime>,
    reason: Option<ReconnectReason>,
    endpoint: Option<Endpoint>,
    /// Bumped whenever an episode starts or is discarded
    generation: u64,
    /// Token of the live episode task (timer or attempt)
    pending: Option<CancellationToken>,
    attempt_in_flight: bool,
    /// Token of the running stability-window timer
    stability: Option<CancellationToken>,
    last_failure_at: Option<Instant>,
    exhausted_at: Option<Instant>,
    stats: ReconnectionStats,
}

impl TenantConnectionState {
    fn new() -> Self {
        Self {
            phase: ConnectionPhase::Idle,
            retry_count: 0,
            current_delay: Duration::ZERO,
            last_attempt_at: None,
            reason: None,
            endpoint: None,
            generation: 0,
            pending: None,
            attempt_in_flight: false,
            stability: None,
            last_failure_at: None,
            exhausted_at: None,
            stats: ReconnectionStats::default(),
        }
    }

    /// Cancel the live episode task and the stability timer
    fn cancel_tasks(&mut self) {
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
        if let Some(token) = self.stability.take() {
            token.cancel();
        }
        self.attempt_in_flight = false;
    }
}

type StateSlot = Arc<Mutex<TenantConnectionState>>;

/// Point-in-time view of a tenant's retry state
#[derive(Debug, Clone, Serialize)]
pub struct TenantStatus {
    pub tenant: TenantId,
    pub phase: ConnectionPhase,
    pub retry_count: u32,
    pub max_retries: u32,
    pub current_delay: Duration,
    pub last_attempt_at: Option<SystemTime>,
    pub reason: Option<ReconnectReason>,
    /// Episode exhausted; waiting for a reset or forced reconnect
    pub needs_attention: bool,
    pub stats: ReconnectionStats,
}

/// Result of a reconnection request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// New episode started; first attempt after `delay`
    Accepted { attempt: u32, delay: Duration },
    /// An episode is already running for this tenant
    AlreadyReconnecting,
    /// Retry ceiling reached; needs a reset
    Exhausted { retry_count: u32 },
}

impl ReconnectDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ReconnectDecision::Accepted { .. })
    }

    fn outcome_label(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::AlreadyReconnecting => "duplicate",
            Self::Exhausted { .. } => "exhausted",
        }
    }
}

enum AttemptOutcome {
    Connected,
    Retry(Duration),
    Finished,
}

/// Backoff state machine for all tenants
pub struct ReconnectionManager {
    backoff: ExponentialBackoff,
    stability_window: Duration,
    registry: Arc<TenantRegistry>,
    factory: Arc<dyn TransportFactory>,
    metrics: Arc<MetricsRegistry>,
    states: DashMap<TenantId, StateSlot>,
    shutdown: CancellationToken,
}

impl ReconnectionManager {
    pub fn new(
        config: BackoffConfig,
        stability_window: Duration,
        registry: Arc<TenantRegistry>,
        factory: Arc<dyn TransportFactory>,
        metrics: Arc<MetricsRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        info!(
            base_delay_ms = config.base_delay_ms,
            max_delay_ms = config.max_delay_ms,
            max_retries = config.max_retries,
            "Creating reconnection manager"
        );
        Self {
            backoff: ExponentialBackoff::with_config(config),
            stability_window,
            registry,
            factory,
            metrics,
            states: DashMap::new(),
            shutdown,
        }
    }

    fn slot(&self, tenant: &TenantId) -> StateSlot {
        self.states
            .entry(tenant.clone())
            .or_insert_with(|| Arc::new(Mutex::new(TenantConnectionState::new())))
            .clone()
    }

    fn existing_slot(&self, tenant: &TenantId) -> Option<StateSlot> {
        self.states.get(tenant).map(|slot| slot.clone())
    }

    fn record_decision(&self, reason: ReconnectReason, decision: &ReconnectDecision) {
        self.metrics
            .reconnect()
            .requests_total
            .with_label_values(&[reason.as_str(), decision.outcome_label()])
            .inc();
    }

    /// Ask for a new reconnection episode.
    ///
    /// Rejected as a no-op while an episode is running or once the retry
    /// ceiling is reached. A detected server restart starts from a fresh
    /// retry count. Must be called from within a tokio runtime.
    pub fn request_reconnection(
        self: &Arc<Self>,
        tenant: &TenantId,
        reason: ReconnectReason,
        endpoint: Endpoint,
    ) -> Result<ReconnectDecision, ControllerError> {
        let slot = self.slot(tenant);
        let decision = {
            let mut state = slot.lock();

            if !self.registry.contains(tenant) {
                state.cancel_tasks();
                state.generation += 1;
                state.phase = ConnectionPhase::Idle;
                None
            } else if !state.phase.accepts_requests() {
                debug!(
                    tenant = %tenant,
                    reason = %reason,
                    current = ?state.reason,
                    "Reconnection already in progress, ignoring request"
                );
                Some(ReconnectDecision::AlreadyReconnecting)
            } else {
                if reason == ReconnectReason::ServerRestartDetected {
                    state.retry_count = 0;
                }

                if self.backoff.can_retry(state.retry_count) {
                    Some(self.begin_episode(tenant, &slot, &mut state, reason, endpoint))
                } else {
                    Some(self.reject_exhausted(tenant, reason, &mut state))
                }
            }
        };

        match decision {
            Some(decision) => {
                self.record_decision(reason, &decision);
                Ok(decision)
            }
            None => {
                self.discard_slot(tenant, &slot);
                warn!(tenant = %tenant, reason = %reason, "Reconnection requested for unknown tenant");
                Err(ControllerError::UnknownTenant(tenant.clone()))
            }
        }
    }

    /// Refuse a request at the retry ceiling and make the exhaustion a
    /// standing status. The ceiling can also be hit from `Connected` when the
    /// last allowed attempt succeeded and the connection died inside its
    /// stability window.
    /// Caller holds the tenant lock.
    fn reject_exhausted(
        &self,
        tenant: &TenantId,
        reason: ReconnectReason,
        state: &mut TenantConnectionState,
    ) -> ReconnectDecision {
        if state.exhausted_at.is_none() {
            state.exhausted_at = Some(Instant::now());
            self.metrics.reconnect().episodes_exhausted_total.inc();
        }
        // The stability window must not clear the count of a dead tenant
        state.cancel_tasks();
        state.phase = ConnectionPhase::Idle;

        warn!(
            tenant = %tenant,
            reason = %reason,
            retry_count = state.retry_count,
            "Reconnection episode exhausted, needs manual attention"
        );
        ReconnectDecision::Exhausted {
            retry_count: state.retry_count,
        }
    }

    /// Forget a slot created for a tenant that is no longer registered.
    /// Caller must not hold the tenant lock.
    fn discard_slot(&self, tenant: &TenantId, slot: &StateSlot) {
        self.states
            .remove_if(tenant, |_, current| Arc::ptr_eq(current, slot));
    }

    /// Start a fresh episode even if one is running, as long as the running
    /// one is only waiting on its timer and the tenant is not operational.
    pub fn force_reconnection(
        self: &Arc<Self>,
        tenant: &TenantId,
        endpoint: Endpoint,
    ) -> Result<ReconnectDecision, ControllerError> {
        let reason = ReconnectReason::ManualReconnect;
        let slot = self.slot(tenant);
        let decision = {
            let mut state = slot.lock();

            let running = state.phase == ConnectionPhase::Reconnecting;
            if !self.registry.contains(tenant) {
                state.cancel_tasks();
                state.generation += 1;
                state.phase = ConnectionPhase::Idle;
                None
            } else if running && (state.attempt_in_flight || self.registry.is_operational(tenant)) {
                info!(
                    tenant = %tenant,
                    in_flight = state.attempt_in_flight,
                    "Forced reconnect skipped, attempt in flight or connection operational"
                );
                Some(ReconnectDecision::AlreadyReconnecting)
            } else {
                state.cancel_tasks();
                state.retry_count = 0;
                state.exhausted_at = None;
                state.phase = ConnectionPhase::Idle;
                Some(self.begin_episode(tenant, &slot, &mut state, reason, endpoint))
            }
        };

        match decision {
            Some(decision) => {
                self.record_decision(reason, &decision);
                Ok(decision)
            }
            None => {
                self.discard_slot(tenant, &slot);
                Err(ControllerError::UnknownTenant(tenant.clone()))
            }
        }
    }

    /// Transition into `Reconnecting` and spawn the episode task.
    /// Caller holds the tenant lock and has checked the guards.
    fn begin_episode(
        self: &Arc<Self>,
        tenant: &TenantId,
        slot: &StateSlot,
        state: &mut TenantConnectionState,
        reason: ReconnectReason,
        endpoint: Endpoint,
    ) -> ReconnectDecision {
        state.cancel_tasks();
        state.generation += 1;
        state.phase = ConnectionPhase::Reconnecting;
        state.retry_count += 1;
        state.reason = Some(reason);
        state.endpoint = Some(endpoint.clone());
        state.exhausted_at = None;
        state.stats.episodes += 1;

        let delay = self.backoff.delay_for(state.retry_count, reason);
        state.current_delay = delay;

        let token = self.shutdown.child_token();
        state.pending = Some(token.clone());

        info!(
            tenant = %tenant,
            reason = %reason,
            endpoint = %endpoint,
            attempt = state.retry_count,
            max_retries = self.backoff.config().max_retries,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnection"
        );

        tokio::spawn(self.clone().run_episode(
            tenant.clone(),
            slot.clone(),
            state.generation,
            endpoint,
            delay,
            token,
        ));

        ReconnectDecision::Accepted {
            attempt: state.retry_count,
            delay,
        }
    }

    async fn run_episode(
        self: Arc<Self>,
        tenant: TenantId,
        slot: StateSlot,
        generation: u64,
        endpoint: Endpoint,
        mut delay: Duration,
        token: CancellationToken,
    ) {
        loop {
            if !delay.is_zero() {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(tenant = %tenant, "Pending reconnection cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            if !self.begin_attempt(&tenant, &slot, generation, &token) {
                return;
            }

            let result = tokio::select! {
                _ = token.cancelled() => {
                    debug!(tenant = %tenant, "Reconnection attempt abandoned");
                    return;
                }
                result = self.attempt(&tenant, &endpoint) => result,
            };

            match self.finish_attempt(&tenant, &slot, generation, result).await {
                AttemptOutcome::Retry(next) => delay = next,
                AttemptOutcome::Connected | AttemptOutcome::Finished => return,
            }
        }
    }

    /// Mark the attempt as in flight. Returns false if this task is stale.
    fn begin_attempt(
        &self,
        tenant: &TenantId,
        slot: &StateSlot,
        generation: u64,
        token: &CancellationToken,
    ) -> bool {
        let mut state = slot.lock();
        if token.is_cancelled() || state.generation != generation {
            return false;
        }
        if !self.registry.contains(tenant) {
            debug!(tenant = %tenant, "Tenant removed before attempt, dropping episode");
            state.cancel_tasks();
            state.phase = ConnectionPhase::Idle;
            return false;
        }

        state.attempt_in_flight = true;
        state.last_attempt_at = Some(SystemTime::now());
        state.stats.attempts += 1;
        true
    }

    /// Tear down the old transport and build a new one
    async fn attempt(
        &self,
        tenant: &TenantId,
        endpoint: &Endpoint,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        if let Some(old) = self.registry.take_connection(tenant) {
            debug!(tenant = %tenant, endpoint = %old.endpoint, "Tearing down previous connection");
            old.transport.disconnect().await;
        }

        let transport = self.factory.connect(tenant, endpoint).await?;
        if !transport.is_operational() {
            transport.disconnect().await;
            return Err(TransportError::Protocol(
                "connection not operational after connect".to_string(),
            ));
        }

        Ok(transport)
    }

    async fn finish_attempt(
        self: &Arc<Self>,
        tenant: &TenantId,
        slot: &StateSlot,
        generation: u64,
        result: Result<Arc<dyn Transport>, TransportError>,
    ) -> AttemptOutcome {
        let attempts = &self.metrics.reconnect().attempts_total;

        match result {
            Ok(transport) => {
                let discard = {
                    let mut state = slot.lock();
                    if state.generation != generation {
                        Some(transport.clone())
                    } else {
                        let endpoint = state.endpoint.clone();
                        match endpoint.map(|ep| self.registry.install(tenant, transport.clone(), ep)) {
                            Some(Ok(previous)) => {
                                self.enter_connected(tenant, slot, &mut state);
                                info!(
                                    tenant = %tenant,
                                    attempt = state.retry_count,
                                    "Reconnected"
                                );
                                previous.map(|p| p.transport)
                            }
                            Some(Err(orphan)) => {
                                state.cancel_tasks();
                                state.phase = ConnectionPhase::Idle;
                                Some(orphan)
                            }
                            None => Some(transport.clone()),
                        }
                    }
                };

                match discard {
                    Some(stale) if !Arc::ptr_eq(&stale, &transport) => {
                        // Replaced a connection installed behind our back
                        attempts.with_label_values(&["success"]).inc();
                        stale.disconnect().await;
                        AttemptOutcome::Connected
                    }
                    Some(stale) => {
                        attempts.with_label_values(&["stale"]).inc();
                        debug!(tenant = %tenant, "Discarding connection from stale attempt");
                        stale.disconnect().await;
                        AttemptOutcome::Finished
                    }
                    None => {
                        attempts.with_label_values(&["success"]).inc();
                        AttemptOutcome::Connected
                    }
                }
            }
            Err(err) => {
                attempts.with_label_values(&["failure"]).inc();
                let mut state = slot.lock();
                if state.generation != generation {
                    return AttemptOutcome::Finished;
                }

                state.attempt_in_flight = false;
                state.stats.failures += 1;
                state.last_failure_at = Some(Instant::now());

                if !self.backoff.can_retry(state.retry_count) {
                    state.pending = None;
                    state.phase = ConnectionPhase::Idle;
                    state.exhausted_at = Some(Instant::now());
                    self.metrics.reconnect().episodes_exhausted_total.inc();
                    error!(
                        tenant = %tenant,
                        error = %err,
                        retry_count = state.retry_count,
                        reason = ?state.reason,
                        "Max reconnection attempts reached, needs manual attention"
                    );
                    return AttemptOutcome::Finished;
                }

                state.retry_count += 1;
                let delay = self.backoff.with_jitter(self.backoff.compute_delay(state.retry_count));
                state.current_delay = delay;
                let wait = self.backoff.config().retry_pause() + delay;

                warn!(
                    tenant = %tenant,
                    error = %err,
                    next_attempt = state.retry_count,
                    wait_ms = wait.as_millis() as u64,
                    "Reconnection attempt failed, retrying"
                );
                AttemptOutcome::Retry(wait)
            }
        }
    }

    /// Phase → Connected and arm the stability window.
    /// Caller holds the tenant lock.
    fn enter_connected(
        self: &Arc<Self>,
        tenant: &TenantId,
        slot: &StateSlot,
        state: &mut TenantConnectionState,
    ) {
        state.cancel_tasks();
        state.phase = ConnectionPhase::Connected;
        state.exhausted_at = None;
        state.stats.successes += 1;
        let connected_at = Instant::now();

        let token = self.shutdown.child_token();
        state.stability = Some(token.clone());
        tokio::spawn(self.clone().run_stability_window(
            tenant.clone(),
            slot.clone(),
            state.generation,
            connected_at,
            token,
        ));
    }

    /// Reset the retry counter once the connection stayed failure-free for a
    /// whole window. A failure inside the window re-arms it from the failure.
    async fn run_stability_window(
        self: Arc<Self>,
        tenant: TenantId,
        slot: StateSlot,
        generation: u64,
        connected_at: Instant,
        token: CancellationToken,
    ) {
        let mut window_start = connected_at;
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep_until(window_start + self.stability_window) => {}
            }

            let mut state = slot.lock();
            if token.is_cancelled()
                || state.generation != generation
                || state.phase != ConnectionPhase::Connected
            {
                return;
            }

            match state.last_failure_at {
                Some(failure) if failure > window_start => {
                    debug!(tenant = %tenant, "Failure inside stability window, re-arming");
                    window_start = failure;
                }
                _ if !self.registry.is_operational(&tenant) => {
                    debug!(tenant = %tenant, "Connection lost inside stability window, keeping retry count");
                    state.stability = None;
                    return;
                }
                _ => {
                    if state.retry_count > 0 {
                        debug!(
                            tenant = %tenant,
                            retry_count = state.retry_count,
                            "Connection stable, resetting retry count"
                        );
                    }
                    state.retry_count = 0;
                    state.current_delay = Duration::ZERO;
                    state.stability = None;
                    return;
                }
            }
        }
    }

    /// The tenant's transport signalled operational readiness.
    ///
    /// Ignored while an attempt is in flight (the attempt decides) or when
    /// the registry holds no operational connection.
    pub fn mark_success(self: &Arc<Self>, tenant: &TenantId) -> Result<(), ControllerError> {
        if !self.registry.contains(tenant) {
            return Err(ControllerError::UnknownTenant(tenant.clone()));
        }
        if !self.registry.is_operational(tenant) {
            debug!(tenant = %tenant, "mark_success without operational connection, ignoring");
            return Ok(());
        }

        let slot = self.slot(tenant);
        let mut state = slot.lock();
        match state.phase {
            ConnectionPhase::Connected => {}
            ConnectionPhase::Reconnecting if state.attempt_in_flight => {
                debug!(tenant = %tenant, "mark_success during attempt, deferring to attempt");
            }
            ConnectionPhase::Reconnecting | ConnectionPhase::Idle => {
                info!(tenant = %tenant, "Connection operational");
                state.generation += 1;
                self.enter_connected(tenant, &slot, &mut state);
            }
        }
        Ok(())
    }

    /// Record a failure observation that did not (yet) start an episode.
    /// Holds off the stability-window reset.
    pub fn note_failure(&self, tenant: &TenantId) {
        if let Some(slot) = self.existing_slot(tenant) {
            slot.lock().last_failure_at = Some(Instant::now());
        }
    }

    /// Clear retry count and phase so a fresh episode can start
    pub fn reset_episode(&self, tenant: &TenantId) -> Result<(), ControllerError> {
        if !self.registry.contains(tenant) {
            return Err(ControllerError::UnknownTenant(tenant.clone()));
        }

        if let Some(slot) = self.existing_slot(tenant) {
            let mut state = slot.lock();
            state.cancel_tasks();
            state.generation += 1;
            state.phase = ConnectionPhase::Idle;
            state.retry_count = 0;
            state.current_delay = Duration::ZERO;
            state.reason = None;
            state.exhausted_at = None;
            info!(tenant = %tenant, "Reconnection episode reset");
        }
        Ok(())
    }

    /// Cancel everything for a tenant, forget its state and close its
    /// transport. Stale timers firing afterwards are no-ops.
    pub async fn teardown(&self, tenant: &TenantId) {
        if let Some((_, slot)) = self.states.remove(tenant) {
            let mut state = slot.lock();
            state.cancel_tasks();
            state.generation += 1;
            state.phase = ConnectionPhase::Idle;
        }

        if let Some(connection) = self.registry.take_connection(tenant) {
            connection.transport.disconnect().await;
        }
        debug!(tenant = %tenant, "Reconnection state torn down");
    }

    /// Cancel every tenant's tasks (controller shutdown)
    pub fn cancel_all(&self) {
        for entry in self.states.iter() {
            entry.value().lock().cancel_tasks();
        }
    }

    pub fn phase(&self, tenant: &TenantId) -> ConnectionPhase {
        self.existing_slot(tenant)
            .map_or(ConnectionPhase::Idle, |slot| slot.lock().phase)
    }

    pub fn is_reconnecting(&self, tenant: &TenantId) -> bool {
        self.phase(tenant) == ConnectionPhase::Reconnecting
    }

    /// True while an episode task is live for the tenant
    pub fn has_pending_episode(&self, tenant: &TenantId) -> bool {
        self.existing_slot(tenant)
            .map_or(false, |slot| slot.lock().pending.is_some())
    }

    /// How long the tenant's episode has been exhausted, if it is
    pub fn exhausted_for(&self, tenant: &TenantId) -> Option<Duration> {
        self.existing_slot(tenant)
            .and_then(|slot| slot.lock().exhausted_at.map(|at| at.elapsed()))
    }

    /// Endpoint of the current or last episode
    pub fn episode_endpoint(&self, tenant: &TenantId) -> Option<Endpoint> {
        self.existing_slot(tenant)
            .and_then(|slot| slot.lock().endpoint.clone())
    }

    pub fn status(&self, tenant: &TenantId) -> Option<TenantStatus> {
        let slot = self.existing_slot(tenant)?;
        let state = slot.lock();
        Some(TenantStatus {
            tenant: tenant.clone(),
            phase: state.phase,
            retry_count: state.retry_count,
            max_retries: self.backoff.config().max_retries,
            current_delay: state.current_delay,
            last_attempt_at: state.last_attempt_at,
            reason: state.reason,
            needs_attention: state.exhausted_at.is_some(),
            stats: state.stats.clone(),
        })
    }

    pub fn statuses(&self) -> Vec<TenantStatus> {
        let mut tenants: Vec<TenantId> = self.states.iter().map(|e| e.key().clone()).collect();
        tenants.sort();
        tenants.iter().filter_map(|t| self.status(t)).collect()
    }

    /// Push per-phase tenant counts to the gauges
    pub fn refresh_phase_metrics(&self) {
        let mut idle = 0;
        let mut reconnecting = 0;
        let mut connected = 0;
        let mut needing_attention = 0;

        for tenant in self.registry.tenant_ids() {
            match self.existing_slot(&tenant) {
                Some(slot) => {
                    let state = slot.lock();
                    match state.phase {
                        ConnectionPhase::Idle => idle += 1,
                        ConnectionPhase::Reconnecting => reconnecting += 1,
                        ConnectionPhase::Connected => connected += 1,
                    }
                    if state.exhausted_at.is_some() {
                        needing_attention += 1;
                    }
                }
                None => idle += 1,
            }
        }

        self.metrics.reconnect().set_phase_counts(
            &[
                (ConnectionPhase::Idle, idle),
                (ConnectionPhase::Reconnecting, reconnecting),
                (ConnectionPhase::Connected, connected),
            ],
            needing_attention,
        );
    }
}
