//! Media relay coordinator
//!
//! Fans one source channel out to a set of destination channels and keeps
//! each destination alive:
//! - relay lifecycle (start, stop, source failure)
//! - destination add, remove and atomic replacement
//! - per-channel pause/resume and connection state
//! - backoff reconnection of failed destinations
//!
//! Every operation holds the relay lock for its whole duration, so concurrent
//! callers observe a linear history. Transfer statistics are updated outside
//! that lock. Reconnection is keyed by [`ChannelTarget`]; progress for a
//! channel registration that no longer exists is dropped.

use crate::channel::{check_limit, MediaRelayConfig, RelayChannelInfo, RelayChannelState};
use crate::connector::ChannelConnector;
use crate::events::RelayEvent;
use crate::registry::{ChannelTarget, RelayChannelRegistry, StatisticsMap};
use crate::stats::{ChannelStatisticsSnapshot, RelayLifecycleStatistics};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{
    Error, EventBus, EventReceiver, ReconnectEvent, ReconnectHandler, ReconnectionScheduler,
    RelayConfig, Result,
};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

struct RelaySession {
    config: MediaRelayConfig,
    channels: RelayChannelRegistry,
    started_at: Instant,
}

impl RelaySession {
    fn channel_mut(&mut self, name: &str) -> Result<&mut RelayChannelRegistry> {
        if self.channels.contains(name) {
            Ok(&mut self.channels)
        } else {
            Err(Error::ChannelNotFound(name.to_string()))
        }
    }
}

pub struct MediaRelayCoordinator {
    max_destination_channels: usize,
    /// `Some` while a relay is active
    session: Mutex<Option<RelaySession>>,
    statistics: StatisticsMap,
    epochs: Arc<AtomicU64>,
    lifecycle: parking_lot::Mutex<RelayLifecycleStatistics>,
    connector: Arc<dyn ChannelConnector>,
    reconnect: ReconnectionScheduler<ChannelTarget>,
    events: EventBus<RelayEvent>,
}

impl MediaRelayCoordinator {
    pub fn new(config: &RelayConfig, connector: Arc<dyn ChannelConnector>) -> Result<Arc<Self>> {
        if config.max_destination_channels == 0 {
            return Err(Error::Configuration(
                "max_destination_channels must be at least 1".to_string(),
            ));
        }
        config.reconnect.validate()?;

        info!(
            max_destination_channels = config.max_destination_channels,
            auto_reconnect = config.reconnect.enabled,
            "Media relay coordinator initialized"
        );

        Ok(Arc::new(Self {
            max_destination_channels: config.max_destination_channels,
            session: Mutex::new(None),
            statistics: Arc::default(),
            epochs: Arc::default(),
            lifecycle: parking_lot::Mutex::new(RelayLifecycleStatistics::default()),
            connector,
            reconnect: ReconnectionScheduler::new(config.reconnect.clone()),
            events: EventBus::new(),
        }))
    }

    // ========== Relay lifecycle ==========

    /// Start relaying `config.source()` to every destination in `config`.
    ///
    /// Each destination starts out connected.
    pub async fn start_media_relay(&self, config: MediaRelayConfig) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            warn!("Rejected relay start: relay already active");
            return Err(Error::RelayAlreadyActive);
        }
        check_limit(config.destinations().len(), self.max_destination_channels)?;

        let mut channels = RelayChannelRegistry::new(Arc::clone(&self.statistics), Arc::clone(&self.epochs));
        for destination in config.destinations() {
            channels.insert(destination.clone(), RelayChannelState::Connected)?;
        }

        info!(
            source = config.source().channel_name(),
            destinations = ?channels.names(),
            mode = ?config.mode(),
            "Media relay started"
        );
        self.events.emit(RelayEvent::Active {
            mode: config.mode(),
            source: config.source().channel_name().to_string(),
            destinations: channels.names(),
        });

        *session = Some(RelaySession {
            config,
            channels,
            started_at: Instant::now(),
        });
        Ok(())
    }

    pub async fn stop_media_relay(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        let Some(active) = session.take() else {
            warn!("Rejected relay stop: relay not active");
            return Err(Error::RelayNotActive);
        };

        let (duration, statistics) = self.teardown(active);
        info!(
            duration_ms = duration.as_millis() as u64,
            total_relays = statistics.total_relays,
            "Media relay stopped"
        );
        self.events.emit(RelayEvent::Inactive {
            duration,
            statistics,
        });
        Ok(())
    }

    /// The source channel failed: the relay cannot continue.
    ///
    /// Tears the relay down as if stopped, recording a completed cycle.
    pub async fn handle_source_channel_error(&self, cause: &str) -> Result<()> {
        let mut session = self.session.lock().await;
        let Some(active) = session.take() else {
            return Err(Error::RelayNotActive);
        };

        let source = active.config.source().channel_name().to_string();
        let (duration, statistics) = self.teardown(active);
        let failure = Error::SourceChannelFailed(format!("{source}: {cause}"));
        error!(source = %source, cause, "Source channel failed, relay torn down");

        self.events.emit(RelayEvent::RelayFailed {
            error: failure.to_string(),
        });
        self.events.emit(RelayEvent::Inactive {
            duration,
            statistics,
        });
        Ok(())
    }

    fn teardown(&self, mut session: RelaySession) -> (Duration, RelayLifecycleStatistics) {
        self.reconnect.cancel_all();
        session.channels.clear();

        let duration = session.started_at.elapsed();
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.record_cycle(duration);
        (duration, *lifecycle)
    }

    // ========== Destinations ==========

    pub async fn add_destination_channel(&self, info: RelayChannelInfo) -> Result<()> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(Error::RelayNotActive)?;

        let name = info.channel_name().to_string();
        if session.channels.contains(&name) {
            return Err(Error::ChannelAlreadyExists(name));
        }
        check_limit(session.channels.len() + 1, self.max_destination_channels)?;

        session
            .channels
            .insert(info.clone(), RelayChannelState::Connected)?;
        session.config.push_destination(info);

        info!(channel = %name, destinations = session.channels.len(), "Destination channel added");
        self.events.emit(RelayEvent::ChannelAdded { channel: name });
        Ok(())
    }

    /// Remove a destination and cancel its reconnection.
    ///
    /// The last destination cannot be removed; stop the relay instead.
    pub async fn remove_destination_channel(&self, name: &str) -> Result<()> {
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| Error::ChannelNotFound(name.to_string()))?;

        if !session.channels.contains(name) {
            return Err(Error::ChannelNotFound(name.to_string()));
        }
        if session.channels.len() == 1 {
            return Err(Error::LastDestination(name.to_string()));
        }

        if let Some(target) = session.channels.target(name) {
            self.reconnect.cancel(&target);
        }
        session.channels.remove(name);
        session.config.remove_destination(name);

        info!(channel = %name, destinations = session.channels.len(), "Destination channel removed");
        self.events.emit(RelayEvent::ChannelRemoved {
            channel: name.to_string(),
        });
        Ok(())
    }

    /// Replace the destination set in one step.
    ///
    /// Channels present before and after keep their state and statistics.
    pub async fn update_destination_channels(&self, config: MediaRelayConfig) -> Result<()> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(Error::RelayNotActive)?;
        check_limit(config.destinations().len(), self.max_destination_channels)?;

        let wanted: HashSet<&str> = config
            .destinations()
            .iter()
            .map(RelayChannelInfo::channel_name)
            .collect();

        let mut removed = Vec::new();
        for name in session.channels.names() {
            if !wanted.contains(name.as_str()) {
                if let Some(target) = session.channels.target(&name) {
                    self.reconnect.cancel(&target);
                }
                session.channels.remove(&name);
                removed.push(name);
            }
        }

        let mut added = Vec::new();
        for destination in config.destinations() {
            if !session.channels.contains(destination.channel_name()) {
                session
                    .channels
                    .insert(destination.clone(), RelayChannelState::Connected)?;
                added.push(destination.channel_name().to_string());
            }
        }

        info!(added = ?added, removed = ?removed, mode = ?config.mode(), "Destination channels updated");
        for channel in removed {
            self.events.emit(RelayEvent::ChannelRemoved { channel });
        }
        for channel in added {
            self.events.emit(RelayEvent::ChannelAdded { channel });
        }
        session.config = config;
        Ok(())
    }

    // ========== Channel state ==========

    /// Connected → paused. Pausing a paused channel succeeds without change.
    pub async fn pause_channel_relay(&self, name: &str) -> Result<()> {
        self.transition(name, RelayChannelState::Connected, RelayChannelState::Paused)
            .await
    }

    /// Paused → connected. Resuming a connected channel succeeds without change.
    pub async fn resume_channel_relay(&self, name: &str) -> Result<()> {
        self.transition(name, RelayChannelState::Paused, RelayChannelState::Connected)
            .await
    }

    async fn transition(
        &self,
        name: &str,
        from: RelayChannelState,
        to: RelayChannelState,
    ) -> Result<()> {
        let mut guard = self.session.lock().await;
        let channels = guard
            .as_mut()
            .ok_or_else(|| Error::ChannelNotFound(name.to_string()))?
            .channel_mut(name)?;

        match channels.state(name) {
            Some(state) if state == to => {
                debug!(channel = %name, state = %to, "Channel already in requested state");
                Ok(())
            }
            Some(state) if state == from => {
                channels.set_state(name, to)?;
                info!(channel = %name, old = %from, new = %to, "Channel relay state changed");
                self.events.emit(RelayEvent::ChannelStateChanged {
                    channel: name.to_string(),
                    old: from,
                    new: to,
                });
                Ok(())
            }
            Some(state) => Err(Error::InvalidChannelState {
                channel: name.to_string(),
                state: state.to_string(),
            }),
            None => Err(Error::ChannelNotFound(name.to_string())),
        }
    }

    /// Record a connection state reported by the transport.
    ///
    /// `Connected` also clears the channel's reconnection attempts.
    pub async fn handle_channel_connection_change(
        &self,
        name: &str,
        state: RelayChannelState,
    ) -> Result<()> {
        let mut guard = self.session.lock().await;
        let channels = guard
            .as_mut()
            .ok_or_else(|| Error::ChannelNotFound(name.to_string()))?
            .channel_mut(name)?;

        let old = channels.set_state(name, state)?;
        if state == RelayChannelState::Connected {
            if let Some(target) = channels.target(name) {
                self.reconnect.cancel(&target);
            }
        }

        debug!(channel = %name, old = %old, new = %state, "Channel connection state changed");
        self.events.emit(RelayEvent::ChannelStateChanged {
            channel: name.to_string(),
            old,
            new: state,
        });
        Ok(())
    }

    /// Mark a destination failed and, when enabled, start reconnecting it
    pub async fn handle_channel_error(self: &Arc<Self>, name: &str, cause: &str) -> Result<()> {
        let mut guard = self.session.lock().await;
        let channels = guard
            .as_mut()
            .ok_or_else(|| Error::ChannelNotFound(name.to_string()))?
            .channel_mut(name)?;

        let old = channels.set_state(name, RelayChannelState::Error)?;
        warn!(channel = %name, cause, "Destination channel error");

        if old != RelayChannelState::Error {
            self.events.emit(RelayEvent::ChannelStateChanged {
                channel: name.to_string(),
                old,
                new: RelayChannelState::Error,
            });
        }
        self.events.emit(RelayEvent::ChannelError {
            channel: name.to_string(),
            error: cause.to_string(),
        });

        if self.reconnect.policy().enabled {
            if let Some(target) = channels.target(name) {
                self.reconnect.schedule(target, Arc::clone(self));
            }
        }
        Ok(())
    }

    /// Add transferred bytes and packets to a channel's counters.
    ///
    /// Unknown channels are ignored.
    pub fn update_channel_statistics(&self, name: &str, bytes: u64, packets: u64) {
        match self.statistics.get(name) {
            Some(stats) => stats.record(bytes, packets),
            None => debug!(channel = %name, "Statistics for unknown channel dropped"),
        }
    }

    // ========== Accessors ==========

    pub async fn is_active(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Destination channel names, sorted
    pub async fn active_channels(&self) -> Vec<String> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.channels.names())
            .unwrap_or_default()
    }

    pub async fn channel_state(&self, name: &str) -> Option<RelayChannelState> {
        self.session
            .lock()
            .await
            .as_ref()
            .and_then(|s| s.channels.state(name))
    }

    pub async fn channel_states(&self) -> BTreeMap<String, RelayChannelState> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.channels.states())
            .unwrap_or_default()
    }

    pub async fn current_config(&self) -> Option<MediaRelayConfig> {
        self.session.lock().await.as_ref().map(|s| s.config.clone())
    }

    #[must_use]
    pub fn channel_statistics(&self, name: &str) -> Option<ChannelStatisticsSnapshot> {
        self.statistics.get(name).map(|s| s.snapshot())
    }

    #[must_use]
    pub fn statistics(&self) -> RelayLifecycleStatistics {
        *self.lifecycle.lock()
    }

    #[must_use]
    pub fn max_destination_channels(&self) -> usize {
        self.max_destination_channels
    }

    /// Destinations with a reconnection loop in flight
    #[must_use]
    pub fn pending_reconnections(&self) -> usize {
        self.reconnect.scheduled_count()
    }

    pub fn subscribe(&self) -> EventReceiver<RelayEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl ReconnectHandler<ChannelTarget> for MediaRelayCoordinator {
    async fn reconnect(&self, target: &ChannelTarget, attempt: u32) -> Result<()> {
        let name = &target.channel;
        let (source, destination) = {
            let mut guard = self.session.lock().await;
            let session = guard.as_mut().ok_or(Error::RelayNotActive)?;
            if !session.channels.is_current(target) {
                return Err(Error::ChannelNotFound(name.clone()));
            }
            let destination = session
                .channels
                .info(name)
                .cloned()
                .ok_or_else(|| Error::ChannelNotFound(name.clone()))?;

            let old = session
                .channels
                .set_state(name, RelayChannelState::Connecting)?;
            self.events.emit(RelayEvent::ChannelStateChanged {
                channel: name.clone(),
                old,
                new: RelayChannelState::Connecting,
            });
            (session.config.source().clone(), destination)
        };

        debug!(channel = %target, attempt, "Reconnecting destination channel");
        self.connector.connect(&source, &destination).await
    }

    async fn on_event(&self, event: ReconnectEvent<ChannelTarget>) {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return;
        };
        if !session.channels.is_current(event.target()) {
            debug!(channel = %event.target(), "Dropping progress for a stale channel registration");
            return;
        }

        match event {
            ReconnectEvent::Scheduled {
                target,
                attempt,
                delay,
            } => {
                self.events.emit(RelayEvent::ChannelReconnectAttempt {
                    channel: target.channel,
                    attempt,
                    delay,
                });
            }
            ReconnectEvent::Failed { target, error, .. } => {
                if let Ok(old) = session
                    .channels
                    .set_state(&target.channel, RelayChannelState::Error)
                {
                    self.events.emit(RelayEvent::ChannelStateChanged {
                        channel: target.channel.clone(),
                        old,
                        new: RelayChannelState::Error,
                    });
                    self.events.emit(RelayEvent::ChannelError {
                        channel: target.channel,
                        error,
                    });
                }
            }
            ReconnectEvent::Succeeded { target, attempt } => {
                if let Ok(old) = session
                    .channels
                    .set_state(&target.channel, RelayChannelState::Connected)
                {
                    info!(channel = %target, attempt, "Destination channel reconnected");
                    self.events.emit(RelayEvent::ChannelStateChanged {
                        channel: target.channel.clone(),
                        old,
                        new: RelayChannelState::Connected,
                    });
                    self.events.emit(RelayEvent::ChannelReconnected {
                        channel: target.channel,
                        attempt,
                    });
                }
            }
            ReconnectEvent::Exhausted { target, attempts } => {
                warn!(channel = %target, attempts, "Destination channel reconnection gave up");
                self.events.emit(RelayEvent::ChannelReconnectExhausted {
                    channel: target.channel,
                    attempts,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use switchboard_core::ReconnectPolicy;

    /// Fails the first `failures` connects, then succeeds
    struct ScriptedConnector {
        failures: u32,
        calls: AtomicU32,
    }

    impl ScriptedConnector {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ChannelConnector for ScriptedConnector {
        async fn connect(&self, _source: &RelayChannelInfo, _destination: &RelayChannelInfo) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(Error::Transport("destination unreachable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn channel(name: &str) -> RelayChannelInfo {
        RelayChannelInfo::new(name, "tok", "1001").unwrap()
    }

    fn relay_config(destinations: &[&str]) -> MediaRelayConfig {
        MediaRelayConfig::new(
            channel("source"),
            destinations.iter().map(|d| channel(d)).collect(),
        )
        .unwrap()
    }

    fn coordinator(reconnect: ReconnectPolicy, connector: Arc<ScriptedConnector>) -> Arc<MediaRelayCoordinator> {
        let config = RelayConfig {
            reconnect,
            ..RelayConfig::default()
        };
        MediaRelayCoordinator::new(&config, connector).unwrap()
    }

    fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: true,
            max_attempts,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_start_twice_keeps_first_relay() {
        let relay = coordinator(ReconnectPolicy::disabled(), ScriptedConnector::new(0));
        relay.start_media_relay(relay_config(&["b", "c"])).await.unwrap();

        let err = relay
            .start_media_relay(relay_config(&["x"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RelayAlreadyActive));
        assert_eq!(relay.active_channels().await, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_stop_inactive_fails() {
        let relay = coordinator(ReconnectPolicy::disabled(), ScriptedConnector::new(0));
        assert!(matches!(
            relay.stop_media_relay().await,
            Err(Error::RelayNotActive)
        ));
    }

    #[tokio::test]
    async fn test_start_respects_coordinator_limit() {
        let config = RelayConfig {
            max_destination_channels: 2,
            reconnect: ReconnectPolicy::disabled(),
        };
        let relay = MediaRelayCoordinator::new(&config, ScriptedConnector::new(0)).unwrap();
        let err = relay
            .start_media_relay(relay_config(&["b", "c", "d"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TooManyDestinations { count: 3, max: 2 }));
        assert!(!relay.is_active().await);
    }

    #[tokio::test]
    async fn test_add_rejects_duplicate_and_overflow() {
        let relay = coordinator(ReconnectPolicy::disabled(), ScriptedConnector::new(0));
        relay
            .start_media_relay(relay_config(&["b", "c", "d", "e"]))
            .await
            .unwrap();

        assert!(matches!(
            relay.add_destination_channel(channel("b")).await,
            Err(Error::ChannelAlreadyExists(name)) if name == "b"
        ));
        assert!(matches!(
            relay.add_destination_channel(channel("f")).await,
            Err(Error::TooManyDestinations { count: 5, max: 4 })
        ));
    }

    #[tokio::test]
    async fn test_pause_resume_idempotent() {
        let relay = coordinator(ReconnectPolicy::disabled(), ScriptedConnector::new(0));
        relay.start_media_relay(relay_config(&["b"])).await.unwrap();

        relay.pause_channel_relay("b").await.unwrap();
        relay.pause_channel_relay("b").await.unwrap();
        assert_eq!(relay.channel_state("b").await, Some(RelayChannelState::Paused));

        relay.resume_channel_relay("b").await.unwrap();
        relay.resume_channel_relay("b").await.unwrap();
        assert_eq!(relay.channel_state("b").await, Some(RelayChannelState::Connected));
    }

    #[tokio::test]
    async fn test_unknown_channel_is_named() {
        let relay = coordinator(ReconnectPolicy::disabled(), ScriptedConnector::new(0));
        relay.start_media_relay(relay_config(&["b"])).await.unwrap();

        for err in [
            relay.pause_channel_relay("ghost").await.unwrap_err(),
            relay.resume_channel_relay("ghost").await.unwrap_err(),
            relay.remove_destination_channel("ghost").await.unwrap_err(),
        ] {
            assert_eq!(err.to_string(), "Channel not found: ghost");
        }
    }

    #[tokio::test]
    async fn test_pause_errored_channel_rejected() {
        let relay = coordinator(ReconnectPolicy::disabled(), ScriptedConnector::new(0));
        relay.start_media_relay(relay_config(&["b"])).await.unwrap();
        relay.handle_channel_error("b", "ice failed").await.unwrap();

        let err = relay.pause_channel_relay("b").await.unwrap_err();
        assert!(matches!(err, Error::InvalidChannelState { .. }));
        assert_eq!(relay.pending_reconnections(), 0);
    }

    #[tokio::test]
    async fn test_remove_last_destination_rejected() {
        let relay = coordinator(ReconnectPolicy::disabled(), ScriptedConnector::new(0));
        relay.start_media_relay(relay_config(&["b"])).await.unwrap();
        assert!(matches!(
            relay.remove_destination_channel("b").await,
            Err(Error::LastDestination(_))
        ));
    }

    #[tokio::test]
    async fn test_update_keeps_surviving_statistics() {
        let relay = coordinator(ReconnectPolicy::disabled(), ScriptedConnector::new(0));
        relay.start_media_relay(relay_config(&["b", "c"])).await.unwrap();
        relay.update_channel_statistics("b", 500, 5);
        relay.update_channel_statistics("c", 100, 1);
        relay.pause_channel_relay("b").await.unwrap();

        relay
            .update_destination_channels(relay_config(&["b", "d"]))
            .await
            .unwrap();

        assert_eq!(relay.active_channels().await, vec!["b", "d"]);
        assert_eq!(relay.channel_state("b").await, Some(RelayChannelState::Paused));
        assert_eq!(relay.channel_statistics("b").unwrap().bytes_transferred, 500);
        assert!(relay.channel_statistics("c").is_none());
        assert_eq!(relay.channel_statistics("d"), Some(ChannelStatisticsSnapshot::default()));
        let config = relay.current_config().await.unwrap();
        assert_eq!(config.destinations().len(), 2);
    }

    #[tokio::test]
    async fn test_statistics_ignored_for_unknown_channel() {
        let relay = coordinator(ReconnectPolicy::disabled(), ScriptedConnector::new(0));
        relay.update_channel_statistics("nowhere", 10, 1);
        assert!(relay.channel_statistics("nowhere").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_duration_accumulates() {
        let relay = coordinator(ReconnectPolicy::disabled(), ScriptedConnector::new(0));

        relay.start_media_relay(relay_config(&["b"])).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        relay.stop_media_relay().await.unwrap();

        relay.start_media_relay(relay_config(&["b"])).await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        relay.handle_source_channel_error("source left").await.unwrap();

        let stats = relay.statistics();
        assert_eq!(stats.total_relays, 2);
        assert_eq!(stats.total_duration, Duration::from_secs(30));
        assert_eq!(stats.average_duration(), Duration::from_secs(15));
        assert!(!relay.is_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_error_reconnects() {
        let connector = ScriptedConnector::new(1);
        let relay = coordinator(fast_policy(3), Arc::clone(&connector));
        relay.start_media_relay(relay_config(&["b"])).await.unwrap();
        let mut events = relay.subscribe();

        relay.handle_channel_error("b", "transport closed").await.unwrap();

        let mut delays = Vec::new();
        loop {
            match events.recv().await.unwrap() {
                RelayEvent::ChannelReconnectAttempt { delay, .. } => delays.push(delay),
                RelayEvent::ChannelReconnected { attempt, .. } => {
                    assert_eq!(attempt, 2);
                    break;
                }
                _ => {}
            }
        }

        assert_eq!(delays, vec![Duration::from_millis(100), Duration::from_millis(200)]);
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
        assert_eq!(relay.channel_state("b").await, Some(RelayChannelState::Connected));
        assert_eq!(relay.pending_reconnections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_exhaustion_leaves_channel_errored() {
        let connector = ScriptedConnector::new(u32::MAX);
        let relay = coordinator(fast_policy(2), Arc::clone(&connector));
        relay.start_media_relay(relay_config(&["b"])).await.unwrap();
        let mut events = relay.subscribe();

        relay.handle_channel_error("b", "transport closed").await.unwrap();

        let mut exhausted = 0;
        while let Some(event) = events.recv().await {
            if let RelayEvent::ChannelReconnectExhausted { attempts, .. } = event {
                assert_eq!(attempts, 2);
                exhausted += 1;
                break;
            }
        }
        assert_eq!(exhausted, 1);
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
        assert_eq!(relay.channel_state("b").await, Some(RelayChannelState::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_reconnection() {
        let connector = ScriptedConnector::new(0);
        let relay = coordinator(fast_policy(3), Arc::clone(&connector));
        relay.start_media_relay(relay_config(&["b"])).await.unwrap();

        relay.handle_channel_error("b", "transport closed").await.unwrap();
        assert_eq!(relay.pending_reconnections(), 1);

        relay.stop_media_relay().await.unwrap();
        assert_eq!(relay.pending_reconnections(), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_report_cancels_reconnection() {
        let connector = ScriptedConnector::new(0);
        let relay = coordinator(fast_policy(3), Arc::clone(&connector));
        relay.start_media_relay(relay_config(&["b"])).await.unwrap();

        relay.handle_channel_error("b", "jitter").await.unwrap();
        relay
            .handle_channel_connection_change("b", RelayChannelState::Connected)
            .await
            .unwrap();
        assert_eq!(relay.pending_reconnections(), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
        assert_eq!(relay.channel_state("b").await, Some(RelayChannelState::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_error_cancels_pending_reconnection() {
        let connector = ScriptedConnector::new(0);
        let relay = coordinator(fast_policy(3), Arc::clone(&connector));
        relay.start_media_relay(relay_config(&["b", "c"])).await.unwrap();
        relay.handle_channel_error("b", "transport closed").await.unwrap();
        assert_eq!(relay.pending_reconnections(), 1);
        let mut events = relay.subscribe();

        relay.handle_source_channel_error("source left").await.unwrap();
        assert_eq!(relay.pending_reconnections(), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[0], RelayEvent::RelayFailed { .. }));
        assert!(matches!(seen[1], RelayEvent::Inactive { .. }));
        assert!(relay.channel_states().await.is_empty());
    }

    #[tokio::test]
    async fn test_progress_for_previous_relay_is_ignored() {
        let connector = ScriptedConnector::new(0);
        let relay = coordinator(fast_policy(3), Arc::clone(&connector));
        relay.start_media_relay(relay_config(&["b"])).await.unwrap();
        let stale = relay.session.lock().await.as_ref().unwrap().channels.target("b").unwrap();
        relay.stop_media_relay().await.unwrap();
        relay.start_media_relay(relay_config(&["b"])).await.unwrap();
        let mut events = relay.subscribe();

        relay
            .on_event(ReconnectEvent::Failed {
                target: stale.clone(),
                attempt: 1,
                error: "late failure".to_string(),
            })
            .await;
        relay
            .on_event(ReconnectEvent::Scheduled {
                target: stale.clone(),
                attempt: 2,
                delay: Duration::from_millis(200),
            })
            .await;
        let err = relay.reconnect(&stale, 2).await.unwrap_err();

        assert!(matches!(err, Error::ChannelNotFound(name) if name == "b"));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
        assert_eq!(relay.channel_state("b").await, Some(RelayChannelState::Connected));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_progress_for_removed_registration_is_ignored() {
        let relay = coordinator(fast_policy(3), ScriptedConnector::new(0));
        relay.start_media_relay(relay_config(&["b", "c"])).await.unwrap();
        let stale = relay.session.lock().await.as_ref().unwrap().channels.target("b").unwrap();
        relay.remove_destination_channel("b").await.unwrap();
        relay.add_destination_channel(channel("b")).await.unwrap();
        let mut events = relay.subscribe();

        relay
            .on_event(ReconnectEvent::Succeeded {
                target: stale,
                attempt: 1,
            })
            .await;
        assert!(events.try_recv().is_err());
        assert_eq!(relay.channel_state("b").await, Some(RelayChannelState::Connected));
    }
}
