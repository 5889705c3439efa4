//! Provider switch coordinator
//!
//! Owns which provider is authoritative for the session:
//! - explicit switches with optional session preservation
//! - automatic fallback along the configured chain
//! - health bookkeeping fed by reported errors and successes
//! - provider-level reconnection after a lost connection
//!
//! At most one switch runs at a time. A request arriving while another is in
//! flight fails with [`Error::SwitchInProgress`] instead of queueing. A switch
//! runs on its own task, so dropping the caller's future does not abandon it
//! halfway.

use crate::events::{ProviderEvent, SwitchOutcome, SwitchReason};
use crate::fallback::FallbackChain;
use crate::health::{HealthStatus, HealthTransition, ProviderHealthStatus, ProviderHealthTracker};
use crate::registry::ProviderRegistry;
use crate::session::{SessionStateCapture, SessionStateSource};
use crate::traits::{ProviderFactory, ProviderHandle};
use crate::types::{Capability, ProviderId, ProviderIdentity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use switchboard_core::{
    Error, EventBus, EventReceiver, ProvidersConfig, ReconnectEvent, ReconnectHandler,
    ReconnectionScheduler, Result,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
struct ActiveProvider {
    id: ProviderId,
    handle: Arc<dyn ProviderHandle>,
}

pub struct ProviderSwitchCoordinator {
    registry: RwLock<ProviderRegistry>,
    health: RwLock<ProviderHealthTracker>,
    fallback_chain: RwLock<FallbackChain>,
    current: RwLock<Option<ActiveProvider>>,
    last_outcome: RwLock<Option<SwitchOutcome>>,

    /// Held by the switch task for the whole switch; `try_lock` failure means busy
    switch_lock: Arc<Mutex<()>>,
    switching: AtomicBool,

    session: Option<SessionStateCapture>,
    auto_fallback: bool,
    reconnect: ReconnectionScheduler<ProviderId>,
    events: EventBus<ProviderEvent>,
    me: Weak<Self>,
}

impl ProviderSwitchCoordinator {
    /// Create a coordinator with no session preservation
    pub fn new(config: &ProvidersConfig) -> Result<Arc<Self>> {
        Self::build(config, None)
    }

    /// Create a coordinator that carries session state across switches
    pub fn with_session(
        config: &ProvidersConfig,
        session: Arc<dyn SessionStateSource>,
    ) -> Result<Arc<Self>> {
        Self::build(config, Some(SessionStateCapture::new(session)))
    }

    fn build(config: &ProvidersConfig, session: Option<SessionStateCapture>) -> Result<Arc<Self>> {
        config.reconnect.validate()?;
        let chain = FallbackChain::try_from(config.fallback_chain.clone())?;

        info!(
            fallback_chain = ?config.fallback_chain,
            auto_fallback = config.auto_fallback,
            session_preservation = session.is_some(),
            "Provider switch coordinator initialized"
        );

        Ok(Arc::new_cyclic(|me| Self {
            registry: RwLock::new(ProviderRegistry::new()),
            health: RwLock::new(ProviderHealthTracker::new(config.health)),
            fallback_chain: RwLock::new(chain),
            current: RwLock::new(None),
            last_outcome: RwLock::new(None),
            switch_lock: Arc::new(Mutex::new(())),
            switching: AtomicBool::new(false),
            session,
            auto_fallback: config.auto_fallback,
            reconnect: ReconnectionScheduler::new(config.reconnect.clone()),
            events: EventBus::new(),
            me: me.clone(),
        }))
    }

    // ========== Registration ==========

    /// Register (or replace) the factory for `provider`
    pub fn register(&self, provider: ProviderId, factory: Arc<dyn ProviderFactory>) -> ProviderIdentity {
        let identity = self.registry.write().register(provider.clone(), factory);
        self.health.write().track(&provider);

        info!(
            provider = %provider,
            priority = identity.priority(),
            capabilities = ?identity.capabilities(),
            "Provider registered"
        );
        self.events.emit(ProviderEvent::Registered {
            provider,
            priority: identity.priority(),
        });
        identity
    }

    /// Remove a provider and its health record.
    ///
    /// Unregistering the current provider leaves it current; switching away
    /// is up to the caller.
    pub fn unregister(&self, provider: &ProviderId) -> bool {
        let removed = self.registry.write().unregister(provider);
        if !removed {
            return false;
        }
        self.health.write().forget(provider);

        if self.current_provider().as_ref() == Some(provider) {
            warn!(provider = %provider, "Unregistered the active provider");
        } else {
            info!(provider = %provider, "Provider unregistered");
        }
        self.events.emit(ProviderEvent::Unregistered {
            provider: provider.clone(),
        });
        true
    }

    pub fn set_fallback_chain(&self, chain: FallbackChain) {
        info!(chain = ?chain.to_vec(), "Fallback chain updated");
        *self.fallback_chain.write() = chain;
    }

    // ========== Switching ==========

    /// Make `to` the current provider.
    ///
    /// Switching to the current provider succeeds without constructing
    /// anything. On failure the previous provider stays current.
    pub async fn switch_provider(
        &self,
        to: &ProviderId,
        preserve_session: bool,
        reason: SwitchReason,
    ) -> Result<SwitchOutcome> {
        let started_at = Utc::now();
        let from = self.current_provider();

        if from.as_ref() == Some(to) {
            debug!(provider = %to, "Already on requested provider");
            return Ok(SwitchOutcome::succeeded(from, to.clone(), reason, false, started_at));
        }

        let factory = self.registry.read().factory(to);
        let Some(factory) = factory else {
            let err = Error::ProviderUnavailable(to.to_string());
            warn!(provider = %to, reason = %reason, "Switch target is not registered");
            self.finish(SwitchOutcome::failed(from, to.clone(), reason, &err, started_at));
            return Err(err);
        };

        let Ok(guard) = Arc::clone(&self.switch_lock).try_lock_owned() else {
            warn!(provider = %to, "Rejected switch: another switch is in progress");
            return Err(Error::SwitchInProgress);
        };

        // The switch that just released the lock may have landed on `to`
        let from = self.current_provider();
        if from.as_ref() == Some(to) {
            return Ok(SwitchOutcome::succeeded(from, to.clone(), reason, false, started_at));
        }

        let Some(this) = self.me.upgrade() else {
            return Err(Error::Transport("provider coordinator is shutting down".to_string()));
        };
        self.switching.store(true, Ordering::SeqCst);
        let to = to.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            this.run_switch(to, factory, preserve_session, from, reason, started_at)
                .await
        });

        task.await
            .map_err(|e| Error::Transport(format!("provider switch task failed: {e}")))?
    }

    async fn run_switch(
        &self,
        to: ProviderId,
        factory: Arc<dyn ProviderFactory>,
        preserve_session: bool,
        from: Option<ProviderId>,
        reason: SwitchReason,
        started_at: DateTime<Utc>,
    ) -> Result<SwitchOutcome> {
        info!(from = ?from, to = %to, reason = %reason, preserve_session, "Switching provider");
        self.events.emit(ProviderEvent::SwitchStarted {
            from: from.clone(),
            to: to.clone(),
            reason: reason.clone(),
        });

        let result = self.perform_switch(&to, factory, preserve_session).await;
        self.switching.store(false, Ordering::SeqCst);

        match result {
            Ok(session_preserved) => {
                self.apply_success(&to);
                let outcome =
                    SwitchOutcome::succeeded(from, to.clone(), reason, session_preserved, started_at);
                info!(
                    switch_id = %outcome.switch_id,
                    to = %to,
                    elapsed_ms = outcome.duration().num_milliseconds(),
                    "Provider switch completed"
                );
                self.finish(outcome.clone());
                Ok(outcome)
            }
            Err(e) => {
                if matches!(e, Error::Provider { .. }) {
                    self.apply_error(&to);
                }
                error!(to = %to, error = %e, "Provider switch failed, keeping previous provider");
                self.finish(SwitchOutcome::failed(from, to, reason, &e, started_at));
                Err(e)
            }
        }
    }

    /// Capture, construct, restore, swap. Returns whether session state was carried over.
    async fn perform_switch(
        &self,
        to: &ProviderId,
        factory: Arc<dyn ProviderFactory>,
        preserve_session: bool,
    ) -> Result<bool> {
        let previous = self.current.read().clone();

        let snapshot = match (&self.session, preserve_session) {
            (Some(session), true) => Some(session.capture(previous.as_ref().map(|p| &p.id)).await?),
            (None, true) => {
                debug!(to = %to, "No session source configured, switching without snapshot");
                None
            }
            _ => None,
        };

        let handle = factory.create().await.map_err(|e| e.for_provider(to))?;

        if let (Some(session), Some(snapshot)) = (&self.session, &snapshot) {
            if let Err(e) = session.restore(to, handle.as_ref(), snapshot).await {
                if let Err(shutdown_err) = handle.shutdown().await {
                    warn!(provider = %to, error = %shutdown_err, "Failed to shut down half-built provider");
                }
                return Err(e);
            }
        }

        let replaced = self.current.write().replace(ActiveProvider {
            id: to.clone(),
            handle,
        });

        if let Some(old) = replaced {
            self.reconnect.cancel(&old.id);
            if let Err(e) = old.handle.shutdown().await {
                warn!(provider = %old.id, error = %e, "Previous provider did not shut down cleanly");
            }
        }

        Ok(snapshot.is_some())
    }

    /// Switch to the first eligible provider of the fallback chain.
    ///
    /// Skips the current provider, unregistered entries and unhealthy
    /// providers. A candidate that fails to come up is skipped and the walk
    /// continues. With no chain configured, registered providers are walked in
    /// priority order.
    pub async fn attempt_fallback_switch(&self, reason: SwitchReason) -> Result<SwitchOutcome> {
        let current = self.current_provider();
        let candidates: Vec<ProviderId> = {
            let chain = self.fallback_chain.read();
            if chain.is_empty() {
                self.registry
                    .read()
                    .available_providers()
                    .into_iter()
                    .map(|identity| identity.id().clone())
                    .collect()
            } else {
                chain.to_vec()
            }
        };

        for candidate in candidates {
            if current.as_ref() == Some(&candidate) {
                continue;
            }
            if !self.registry.read().contains(&candidate) {
                debug!(provider = %candidate, "Fallback candidate not registered, skipping");
                continue;
            }
            if self.health_status(&candidate) == HealthStatus::Unhealthy {
                debug!(provider = %candidate, "Fallback candidate unhealthy, skipping");
                continue;
            }

            match self.switch_provider(&candidate, true, reason.clone()).await {
                Ok(outcome) => return Ok(outcome),
                Err(Error::SwitchInProgress) => return Err(Error::SwitchInProgress),
                Err(e) => {
                    warn!(provider = %candidate, error = %e, "Fallback candidate failed, trying next");
                }
            }
        }

        warn!(reason = %reason, current = ?current, "No eligible fallback provider");
        let err = Error::NoFallbackCandidate;
        self.events.emit(ProviderEvent::FallbackFailed {
            reason,
            error: err.to_string(),
        });
        Err(err)
    }

    fn finish(&self, outcome: SwitchOutcome) {
        *self.last_outcome.write() = Some(outcome.clone());
        self.events.emit(ProviderEvent::SwitchCompleted(outcome));
    }

    // ========== Health ==========

    /// Record a failed operation against `provider`.
    ///
    /// When this turns the current provider unhealthy and auto-fallback is
    /// enabled, a fallback switch is attempted before returning.
    pub async fn report_error(&self, provider: &ProviderId) -> HealthStatus {
        let transition = self.apply_error(provider);

        let became_unhealthy =
            transition.changed() && transition.new == HealthStatus::Unhealthy;
        if became_unhealthy && self.auto_fallback && self.current_provider().as_ref() == Some(provider) {
            if let Err(e) = self.attempt_fallback_switch(SwitchReason::HealthDegraded).await {
                warn!(provider = %provider, error = %e, "Automatic fallback failed");
            }
        }

        transition.new
    }

    /// Record a successful operation against `provider`
    pub fn report_success(&self, provider: &ProviderId) -> HealthStatus {
        self.apply_success(provider).new
    }

    fn apply_error(&self, provider: &ProviderId) -> HealthTransition {
        let transition = self.health.write().report_error(provider);
        self.emit_health(provider, transition);
        transition
    }

    fn apply_success(&self, provider: &ProviderId) -> HealthTransition {
        let transition = self.health.write().report_success(provider);
        self.emit_health(provider, transition);
        transition
    }

    fn emit_health(&self, provider: &ProviderId, transition: HealthTransition) {
        if !transition.changed() {
            return;
        }
        if transition.new == HealthStatus::Healthy {
            info!(provider = %provider, old = ?transition.old, "Provider recovered");
        } else {
            warn!(provider = %provider, old = ?transition.old, new = ?transition.new, "Provider health changed");
        }
        self.events.emit(ProviderEvent::HealthChanged {
            provider: provider.clone(),
            old: transition.old,
            new: transition.new,
        });
    }

    // ========== Connection loss ==========

    /// Transport of the current provider dropped.
    ///
    /// Counts as an error for the current provider, then reconnects with
    /// backoff. Without provider reconnection, falls back directly when
    /// auto-fallback is on.
    pub async fn handle_connection_lost(self: &Arc<Self>, cause: &str) -> Result<()> {
        let Some(current) = self.current_provider() else {
            return Err(Error::ProviderUnavailable("no active provider".to_string()));
        };

        warn!(provider = %current, cause, "Provider connection lost");
        self.apply_error(&current);

        if self.reconnect.policy().enabled {
            self.reconnect.schedule(current, Arc::clone(self));
            return Ok(());
        }

        if self.auto_fallback {
            self.attempt_fallback_switch(SwitchReason::ConnectionLost).await?;
        }
        Ok(())
    }

    // ========== Accessors ==========

    #[must_use]
    pub fn current_provider(&self) -> Option<ProviderId> {
        self.current.read().as_ref().map(|p| p.id.clone())
    }

    #[must_use]
    pub fn current_handle(&self) -> Option<Arc<dyn ProviderHandle>> {
        self.current.read().as_ref().map(|p| Arc::clone(&p.handle))
    }

    #[must_use]
    pub fn is_switching(&self) -> bool {
        self.switching.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn last_switch_outcome(&self) -> Option<SwitchOutcome> {
        self.last_outcome.read().clone()
    }

    #[must_use]
    pub fn last_switch_error(&self) -> Option<String> {
        self.last_outcome.read().as_ref().and_then(|o| o.error.clone())
    }

    #[must_use]
    pub fn available_providers(&self) -> Vec<ProviderIdentity> {
        self.registry.read().available_providers()
    }

    #[must_use]
    pub fn providers_with_capability(&self, capability: Capability) -> Vec<ProviderIdentity> {
        self.registry.read().providers_with_capability(capability)
    }

    #[must_use]
    pub fn is_registered(&self, provider: &ProviderId) -> bool {
        self.registry.read().contains(provider)
    }

    #[must_use]
    pub fn health(&self, provider: &ProviderId) -> Option<ProviderHealthStatus> {
        self.health.read().get(provider)
    }

    #[must_use]
    pub fn health_status(&self, provider: &ProviderId) -> HealthStatus {
        self.health.read().status(provider)
    }

    #[must_use]
    pub fn fallback_chain(&self) -> FallbackChain {
        self.fallback_chain.read().clone()
    }

    #[must_use]
    pub fn last_snapshot_time(&self) -> Option<DateTime<Utc>> {
        self.session
            .as_ref()
            .and_then(SessionStateCapture::last_snapshot)
            .map(|s| s.captured_at)
    }

    pub fn subscribe(&self) -> EventReceiver<ProviderEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl ReconnectHandler<ProviderId> for ProviderSwitchCoordinator {
    async fn reconnect(&self, target: &ProviderId, attempt: u32) -> Result<()> {
        let handle = {
            let current = self.current.read();
            match current.as_ref() {
                Some(active) if &active.id == target => Arc::clone(&active.handle),
                _ => return Err(Error::ProviderUnavailable(target.to_string())),
            }
        };
        debug!(provider = %target, attempt, "Reconnecting provider");
        handle.reconnect().await.map_err(|e| e.for_provider(target))
    }

    async fn on_event(&self, event: ReconnectEvent<ProviderId>) {
        match event {
            ReconnectEvent::Scheduled {
                target,
                attempt,
                delay,
            } => {
                self.events.emit(ProviderEvent::ReconnectAttempt {
                    provider: target,
                    attempt,
                    delay,
                });
            }
            ReconnectEvent::Failed { target, .. } => {
                self.apply_error(&target);
            }
            ReconnectEvent::Succeeded { target, attempt } => {
                self.apply_success(&target);
                self.events.emit(ProviderEvent::Reconnected {
                    provider: target,
                    attempt,
                });
            }
            ReconnectEvent::Exhausted { target, attempts } => {
                self.events.emit(ProviderEvent::ReconnectExhausted {
                    provider: target.clone(),
                    attempts,
                });
                if self.auto_fallback && self.current_provider().as_ref() == Some(&target) {
                    if let Err(e) = self.attempt_fallback_switch(SwitchReason::ConnectionLost).await {
                        error!(provider = %target, error = %e, "Fallback after lost connection failed");
                    }
                }
            }
        }
    }
}
