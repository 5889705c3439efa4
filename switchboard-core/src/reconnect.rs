//! Exponential-backoff reconnection
//!
//! A [`ReconnectionScheduler`] runs at most one retry loop per target. Attempt
//! `n` waits `min(max_delay, initial_delay * multiplier^(n-1))` and then calls
//! [`ReconnectHandler::reconnect`]. A success clears the target's failure
//! count; `max_attempts` consecutive failures end the loop with
//! [`ReconnectEvent::Exhausted`].

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Backoff parameters for one class of reconnection (provider or channel)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Delays before each of the first `attempts` attempts, without jitter
    pub fn delays(&self, attempts: u32) -> impl Iterator<Item = Duration> {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_delay())
            .with_max_delay(self.max_delay())
            .with_factor(self.backoff_multiplier)
            .with_max_times(attempts as usize)
            .build()
            .map(whole_millis)
    }

    /// Delay before attempt `attempt` (1-based; 0 is treated as 1)
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delays(attempt.max(1))
            .last()
            .unwrap_or_else(|| self.initial_delay())
    }

    pub fn validate(&self) -> Result<()> {
        if self.backoff_multiplier < 1.0 || !self.backoff_multiplier.is_finite() {
            return Err(Error::Configuration(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(Error::Configuration(format!(
                "max_delay_ms ({}) is below initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            )));
        }
        Ok(())
    }
}

/// The backoff works in `f32` seconds; round back to the policy's millisecond grid
fn whole_millis(delay: Duration) -> Duration {
    let millis = (delay.as_nanos() + 500_000) / 1_000_000;
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}

/// Progress of a retry loop, delivered to [`ReconnectHandler::on_event`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectEvent<K> {
    /// Attempt `attempt` will run after `delay`
    Scheduled { target: K, attempt: u32, delay: Duration },
    Failed { target: K, attempt: u32, error: String },
    Succeeded { target: K, attempt: u32 },
    /// Terminal: the loop gave up after `attempts` consecutive failures
    Exhausted { target: K, attempts: u32 },
}

impl<K> ReconnectEvent<K> {
    #[must_use]
    pub const fn target(&self) -> &K {
        match self {
            Self::Scheduled { target, .. }
            | Self::Failed { target, .. }
            | Self::Succeeded { target, .. }
            | Self::Exhausted { target, .. } => target,
        }
    }
}

/// The side being reconnected: performs the connect call and observes progress
#[async_trait]
pub trait ReconnectHandler<K: Send + Sync + 'static>: Send + Sync + 'static {
    async fn reconnect(&self, target: &K, attempt: u32) -> Result<()>;

    async fn on_event(&self, event: ReconnectEvent<K>);
}

struct PendingSchedule {
    id: u64,
    token: CancellationToken,
}

pub struct ReconnectionScheduler<K> {
    policy: ReconnectPolicy,
    /// Consecutive failed attempts per target
    failures: Arc<DashMap<K, u32>>,
    pending: Arc<DashMap<K, PendingSchedule>>,
    next_id: AtomicU64,
}

impl<K> ReconnectionScheduler<K>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            failures: Arc::new(DashMap::new()),
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Start a retry loop for `target`.
    ///
    /// Returns `false` without doing anything when the policy is disabled or a
    /// loop for `target` is already running.
    pub fn schedule<H>(&self, target: K, handler: Arc<H>) -> bool
    where
        H: ReconnectHandler<K>,
    {
        if !self.policy.enabled {
            debug!(target = %target, "Reconnection disabled, not scheduling");
            return false;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        match self.pending.entry(target.clone()) {
            Entry::Occupied(_) => {
                debug!(target = %target, "Reconnection already scheduled");
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingSchedule {
                    id,
                    token: token.clone(),
                });
            }
        }

        info!(
            target = %target,
            max_attempts = self.policy.max_attempts,
            "Scheduling reconnection"
        );

        let policy = self.policy.clone();
        let failures = Arc::clone(&self.failures);
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            run_schedule(target, id, token, policy, failures, pending, handler).await;
        });

        true
    }

    /// Cancel the loop for `target` and forget its failure count
    pub fn cancel(&self, target: &K) -> bool {
        self.failures.remove(target);
        if let Some((_, schedule)) = self.pending.remove(target) {
            schedule.token.cancel();
            debug!(target = %target, "Reconnection cancelled");
            true
        } else {
            false
        }
    }

    /// Cancel every running loop
    pub fn cancel_all(&self) {
        let targets: Vec<K> = self.pending.iter().map(|e| e.key().clone()).collect();
        for target in &targets {
            self.cancel(target);
        }
        self.failures.clear();
    }

    /// Clear the failure count after an externally observed success
    pub fn reset(&self, target: &K) {
        self.failures.remove(target);
    }

    #[must_use]
    pub fn failures(&self, target: &K) -> u32 {
        self.failures.get(target).map_or(0, |v| *v)
    }

    #[must_use]
    pub fn is_scheduled(&self, target: &K) -> bool {
        self.pending.contains_key(target)
    }

    #[must_use]
    pub fn scheduled_count(&self) -> usize {
        self.pending.len()
    }
}

async fn run_schedule<K, H>(
    target: K,
    id: u64,
    token: CancellationToken,
    policy: ReconnectPolicy,
    failures: Arc<DashMap<K, u32>>,
    pending: Arc<DashMap<K, PendingSchedule>>,
    handler: Arc<H>,
) where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    H: ReconnectHandler<K>,
{
    let release = || {
        pending.remove_if(&target, |_, schedule| schedule.id == id);
    };

    let mut delays = policy.delays(policy.max_attempts);
    let mut attempt = 0;
    loop {
        if token.is_cancelled() {
            break;
        }
        let Some(delay) = delays.next() else {
            failures.remove(&target);
            release();
            warn!(
                target = %target,
                attempts = policy.max_attempts,
                "Reconnection attempts exhausted"
            );
            handler
                .on_event(ReconnectEvent::Exhausted {
                    target: target.clone(),
                    attempts: policy.max_attempts,
                })
                .await;
            return;
        };
        attempt += 1;

        handler
            .on_event(ReconnectEvent::Scheduled {
                target: target.clone(),
                attempt,
                delay,
            })
            .await;

        tokio::select! {
            biased;
            () = token.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        let result = tokio::select! {
            biased;
            () = token.cancelled() => break,
            result = handler.reconnect(&target, attempt) => result,
        };
        if token.is_cancelled() {
            break;
        }

        match result {
            Ok(()) => {
                failures.remove(&target);
                release();
                info!(target = %target, attempt, "Reconnected");
                handler
                    .on_event(ReconnectEvent::Succeeded {
                        target: target.clone(),
                        attempt,
                    })
                    .await;
                return;
            }
            Err(e) => {
                failures.insert(target.clone(), attempt);
                warn!(target = %target, attempt, error = %e, "Reconnection attempt failed");
                handler
                    .on_event(ReconnectEvent::Failed {
                        target: target.clone(),
                        attempt,
                        error: e.to_string(),
                    })
                    .await;
            }
        }
    }

    debug!(target = %target, "Reconnection loop stopped by cancellation");
    release();
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::mpsc;

    struct FlakyTarget {
        failures_before_success: u32,
        calls: AtomicU32,
        events: Mutex<Vec<ReconnectEvent<String>>>,
        done: mpsc::UnboundedSender<ReconnectEvent<String>>,
    }

    impl FlakyTarget {
        fn new(failures_before_success: u32) -> (Arc<Self>, mpsc::UnboundedReceiver<ReconnectEvent<String>>) {
            let (done, rx) = mpsc::unbounded_channel();
            let target = Arc::new(Self {
                failures_before_success,
                calls: AtomicU32::new(0),
                events: Mutex::new(Vec::new()),
                done,
            });
            (target, rx)
        }
    }

    #[async_trait]
    impl ReconnectHandler<String> for FlakyTarget {
        async fn reconnect(&self, _target: &String, _attempt: u32) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call > self.failures_before_success {
                Ok(())
            } else {
                Err(Error::Transport("connection refused".to_string()))
            }
        }

        async fn on_event(&self, event: ReconnectEvent<String>) {
            self.events.lock().push(event.clone());
            if matches!(
                event,
                ReconnectEvent::Succeeded { .. } | ReconnectEvent::Exhausted { .. }
            ) {
                let _ = self.done.send(event);
            }
        }
    }

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: true,
            max_attempts,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_delay_follows_exponential_formula() {
        let policy = policy(10);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for_attempt(60), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
    }

    #[test]
    fn test_fractional_multiplier() {
        let policy = ReconnectPolicy {
            backoff_multiplier: 1.5,
            ..policy(5)
        };
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(150));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(225));
    }

    #[test]
    fn test_delays_bounded_by_attempts() {
        let delays: Vec<Duration> = policy(4).delays(4).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800)
            ]
        );
        assert_eq!(policy(4).delays(0).count(), 0);
    }

    #[test]
    fn test_policy_validation() {
        assert!(ReconnectPolicy::default().validate().is_ok());
        let shrinking = ReconnectPolicy {
            backoff_multiplier: 0.5,
            ..ReconnectPolicy::default()
        };
        assert!(shrinking.validate().is_err());
        let inverted = ReconnectPolicy {
            initial_delay_ms: 5_000,
            max_delay_ms: 1_000,
            ..ReconnectPolicy::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_terminal() {
        let scheduler = ReconnectionScheduler::new(policy(3));
        let (target, mut done) = FlakyTarget::new(u32::MAX);

        assert!(scheduler.schedule("dest".to_string(), Arc::clone(&target)));
        let last = done.recv().await.unwrap();
        assert_eq!(
            last,
            ReconnectEvent::Exhausted {
                target: "dest".to_string(),
                attempts: 3
            }
        );

        let events = target.events.lock().clone();
        let delays: Vec<Duration> = events
            .iter()
            .filter_map(|e| match e {
                ReconnectEvent::Scheduled { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
        assert_eq!(target.calls.load(Ordering::SeqCst), 3);
        assert!(!scheduler.is_scheduled(&"dest".to_string()));
        assert_eq!(scheduler.failures(&"dest".to_string()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_counter() {
        let scheduler = ReconnectionScheduler::new(policy(5));
        let (target, mut done) = FlakyTarget::new(2);

        scheduler.schedule("dest".to_string(), Arc::clone(&target));
        let last = done.recv().await.unwrap();
        assert_eq!(
            last,
            ReconnectEvent::Succeeded {
                target: "dest".to_string(),
                attempt: 3
            }
        );
        assert_eq!(scheduler.failures(&"dest".to_string()), 0);
        assert!(!scheduler.is_scheduled(&"dest".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_schedule_is_rejected() {
        let scheduler = ReconnectionScheduler::new(policy(3));
        let (target, _done) = FlakyTarget::new(u32::MAX);

        assert!(scheduler.schedule("dest".to_string(), Arc::clone(&target)));
        assert!(!scheduler.schedule("dest".to_string(), Arc::clone(&target)));
        assert_eq!(scheduler.scheduled_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_before_connect() {
        let scheduler = ReconnectionScheduler::new(policy(3));
        let (target, _done) = FlakyTarget::new(0);

        scheduler.schedule("dest".to_string(), Arc::clone(&target));
        assert!(scheduler.cancel(&"dest".to_string()));
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(target.calls.load(Ordering::SeqCst), 0);
        assert!(target.events.lock().is_empty());
        assert!(!scheduler.is_scheduled(&"dest".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait_emits_nothing_more() {
        let scheduler = ReconnectionScheduler::new(policy(3));
        let (target, _done) = FlakyTarget::new(0);

        scheduler.schedule("dest".to_string(), Arc::clone(&target));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(target.events.lock().len(), 1);

        scheduler.cancel(&"dest".to_string());
        tokio::time::sleep(Duration::from_secs(5)).await;

        let events = target.events.lock().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].target(), "dest");
        assert_eq!(target.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let scheduler = ReconnectionScheduler::new(policy(3));
        let (target, _done) = FlakyTarget::new(0);

        scheduler.schedule("a".to_string(), Arc::clone(&target));
        scheduler.schedule("b".to_string(), Arc::clone(&target));
        scheduler.cancel_all();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(scheduler.scheduled_count(), 0);
        assert_eq!(target.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disabled_policy_never_schedules() {
        let scheduler = ReconnectionScheduler::<String>::new(ReconnectPolicy::disabled());
        let (target, _done) = FlakyTarget::new(0);
        assert!(!scheduler.schedule("dest".to_string(), target));
    }
}
