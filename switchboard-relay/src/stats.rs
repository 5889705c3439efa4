//! Relay statistics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Per-channel transfer counters, updated without taking the relay lock
#[derive(Debug, Default)]
pub struct ChannelStatistics {
    bytes_transferred: AtomicU64,
    packets_transferred: AtomicU64,
}

impl ChannelStatistics {
    /// Counters saturate at `u64::MAX` instead of wrapping
    pub fn record(&self, bytes: u64, packets: u64) {
        saturating_add(&self.bytes_transferred, bytes);
        saturating_add(&self.packets_transferred, packets);
    }

    #[must_use]
    pub fn snapshot(&self) -> ChannelStatisticsSnapshot {
        ChannelStatisticsSnapshot {
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            packets_transferred: self.packets_transferred.load(Ordering::Relaxed),
        }
    }
}

fn saturating_add(counter: &AtomicU64, delta: u64) {
    // The closure always returns Some, so the update cannot fail
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_add(delta))
    });
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatisticsSnapshot {
    pub bytes_transferred: u64,
    pub packets_transferred: u64,
}

/// Cumulative start/stop cycles of a relay coordinator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayLifecycleStatistics {
    pub total_relays: u64,
    pub total_duration: Duration,
}

impl RelayLifecycleStatistics {
    pub(crate) fn record_cycle(&mut self, duration: Duration) {
        self.total_relays += 1;
        self.total_duration += duration;
    }

    /// Zero until the first cycle completes
    #[must_use]
    pub fn average_duration(&self) -> Duration {
        if self.total_relays == 0 {
            return Duration::ZERO;
        }
        self.total_duration.div_f64(self.total_relays as f64)
    }
}
