//! Destination channel registry
//!
//! Tracks state for every destination of the active relay. Statistics are
//! kept in a shared map so the relay coordinator can update them without
//! holding the lock that guards the registry.
//!
//! Each inserted channel gets a fresh epoch. A [`ChannelTarget`] names one
//! channel instance, so work started for a channel that has since been
//! removed or re-added can be told apart from work for the current one.

use crate::channel::{RelayChannelInfo, RelayChannelState};
use crate::stats::{ChannelStatistics, ChannelStatisticsSnapshot};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use switchboard_core::{Error, Result};

pub(crate) type StatisticsMap = Arc<DashMap<String, Arc<ChannelStatistics>>>;

/// One registration of a destination channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelTarget {
    pub channel: String,
    pub epoch: u64,
}

impl fmt::Display for ChannelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.channel, self.epoch)
    }
}

struct ChannelEntry {
    info: RelayChannelInfo,
    state: RelayChannelState,
    epoch: u64,
}

pub struct RelayChannelRegistry {
    channels: BTreeMap<String, ChannelEntry>,
    statistics: StatisticsMap,
    /// Shared across registries so epochs never repeat between relay cycles
    epochs: Arc<AtomicU64>,
}

impl RelayChannelRegistry {
    pub(crate) fn new(statistics: StatisticsMap, epochs: Arc<AtomicU64>) -> Self {
        Self {
            channels: BTreeMap::new(),
            statistics,
            epochs,
        }
    }

    /// Add a destination in `state` with fresh statistics
    pub fn insert(&mut self, info: RelayChannelInfo, state: RelayChannelState) -> Result<()> {
        let name = info.channel_name().to_string();
        if self.channels.contains_key(&name) {
            return Err(Error::ChannelAlreadyExists(name));
        }
        self.statistics
            .insert(name.clone(), Arc::new(ChannelStatistics::default()));
        let epoch = self.epochs.fetch_add(1, Ordering::Relaxed);
        self.channels.insert(name, ChannelEntry { info, state, epoch });
        Ok(())
    }

    /// Remove a destination along with its statistics
    pub fn remove(&mut self, name: &str) -> Option<RelayChannelInfo> {
        let entry = self.channels.remove(name)?;
        self.statistics.remove(name);
        Some(entry.info)
    }

    /// Drop every destination and its statistics
    pub fn clear(&mut self) {
        for name in self.channels.keys() {
            self.statistics.remove(name);
        }
        self.channels.clear();
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    #[must_use]
    pub fn state(&self, name: &str) -> Option<RelayChannelState> {
        self.channels.get(name).map(|entry| entry.state)
    }

    /// The current registration of `name`
    #[must_use]
    pub fn target(&self, name: &str) -> Option<ChannelTarget> {
        self.channels.get(name).map(|entry| ChannelTarget {
            channel: name.to_string(),
            epoch: entry.epoch,
        })
    }

    /// Whether `target` is still the registration held for its channel
    #[must_use]
    pub fn is_current(&self, target: &ChannelTarget) -> bool {
        self.channels
            .get(&target.channel)
            .is_some_and(|entry| entry.epoch == target.epoch)
    }

    #[must_use]
    pub fn info(&self, name: &str) -> Option<&RelayChannelInfo> {
        self.channels.get(name).map(|entry| &entry.info)
    }

    /// Overwrite the state of `name`, returning the previous one
    pub fn set_state(&mut self, name: &str, state: RelayChannelState) -> Result<RelayChannelState> {
        let entry = self
            .channels
            .get_mut(name)
            .ok_or_else(|| Error::ChannelNotFound(name.to_string()))?;
        Ok(std::mem::replace(&mut entry.state, state))
    }

    #[must_use]
    pub fn statistics(&self, name: &str) -> Option<ChannelStatisticsSnapshot> {
        self.statistics.get(name).map(|s| s.snapshot())
    }

    /// Channel names in sorted order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    #[must_use]
    pub fn states(&self) -> BTreeMap<String, RelayChannelState> {
        self.channels
            .iter()
            .map(|(name, entry)| (name.clone(), entry.state))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
