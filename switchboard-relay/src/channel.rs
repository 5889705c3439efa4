//! Relay channel value types
//!
//! [`RelayChannelInfo`] and [`MediaRelayConfig`] validate on construction and
//! on deserialization, so an instance that exists is always well formed.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use switchboard_core::config::DEFAULT_MAX_DESTINATION_CHANNELS;
use switchboard_core::{Error, Result};

#[derive(Deserialize)]
struct RawChannelInfo {
    channel_name: String,
    token: String,
    user_id: String,
}

/// Addressing of one relay endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawChannelInfo")]
pub struct RelayChannelInfo {
    channel_name: String,
    token: String,
    user_id: String,
}

impl RelayChannelInfo {
    /// Fails when any field is empty or whitespace only
    pub fn new(
        channel_name: impl Into<String>,
        token: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Result<Self> {
        let info = Self {
            channel_name: channel_name.into(),
            token: token.into(),
            user_id: user_id.into(),
        };
        if info.channel_name.trim().is_empty() {
            return Err(Error::MissingField("channel_name"));
        }
        if info.token.trim().is_empty() {
            return Err(Error::MissingField("token"));
        }
        if info.user_id.trim().is_empty() {
            return Err(Error::MissingField("user_id"));
        }
        Ok(info)
    }

    #[must_use]
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl TryFrom<RawChannelInfo> for RelayChannelInfo {
    type Error = Error;

    fn try_from(raw: RawChannelInfo) -> Result<Self> {
        Self::new(raw.channel_name, raw.token, raw.user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    OneToOne,
    OneToMany,
}

impl RelayMode {
    fn for_count(destinations: usize) -> Self {
        if destinations > 1 {
            Self::OneToMany
        } else {
            Self::OneToOne
        }
    }
}

#[derive(Deserialize)]
struct RawRelayConfig {
    source: RelayChannelInfo,
    destinations: Vec<RelayChannelInfo>,
    #[serde(default)]
    mode: Option<RelayMode>,
}

/// A source channel fanned out to one or more destinations.
///
/// Deserialized configs are not bounded in size; the coordinator that
/// receives one enforces its own destination maximum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRelayConfig")]
pub struct MediaRelayConfig {
    source: RelayChannelInfo,
    destinations: Vec<RelayChannelInfo>,
    mode: RelayMode,
}

impl MediaRelayConfig {
    /// Convenience constructor bounded by [`DEFAULT_MAX_DESTINATION_CHANNELS`].
    ///
    /// Use [`Self::with_max_destinations`] when the coordinator is configured
    /// with a different maximum.
    pub fn new(source: RelayChannelInfo, destinations: Vec<RelayChannelInfo>) -> Result<Self> {
        Self::with_max_destinations(source, destinations, DEFAULT_MAX_DESTINATION_CHANNELS)
    }

    /// Build a config allowing at most `max` destinations.
    ///
    /// Fails on an empty destination list, more than `max` destinations, or
    /// two destinations sharing a channel name.
    pub fn with_max_destinations(
        source: RelayChannelInfo,
        destinations: Vec<RelayChannelInfo>,
        max: usize,
    ) -> Result<Self> {
        if destinations.is_empty() {
            return Err(Error::EmptyDestinations);
        }
        check_limit(destinations.len(), max)?;

        let mut seen = HashSet::new();
        for destination in &destinations {
            if !seen.insert(destination.channel_name()) {
                return Err(Error::DuplicateChannel(destination.channel_name().to_string()));
            }
        }

        let mode = RelayMode::for_count(destinations.len());
        Ok(Self {
            source,
            destinations,
            mode,
        })
    }

    /// Request a relay mode instead of the one implied by the destination count.
    ///
    /// One-to-many may start with a single destination; one-to-one cannot
    /// carry more than one.
    pub fn with_mode(mut self, mode: RelayMode) -> Result<Self> {
        if mode == RelayMode::OneToOne && self.destinations.len() > 1 {
            return Err(Error::InvalidInput(format!(
                "one_to_one relay cannot have {} destinations",
                self.destinations.len()
            )));
        }
        self.mode = mode;
        Ok(self)
    }

    #[must_use]
    pub fn source(&self) -> &RelayChannelInfo {
        &self.source
    }

    #[must_use]
    pub fn destinations(&self) -> &[RelayChannelInfo] {
        &self.destinations
    }

    #[must_use]
    pub fn mode(&self) -> RelayMode {
        self.mode
    }

    /// A second destination turns a one-to-one relay into one-to-many
    pub(crate) fn push_destination(&mut self, destination: RelayChannelInfo) {
        self.destinations.push(destination);
        if self.destinations.len() > 1 {
            self.mode = RelayMode::OneToMany;
        }
    }

    pub(crate) fn remove_destination(&mut self, channel_name: &str) {
        self.destinations.retain(|d| d.channel_name() != channel_name);
    }
}

impl TryFrom<RawRelayConfig> for MediaRelayConfig {
    type Error = Error;

    fn try_from(raw: RawRelayConfig) -> Result<Self> {
        let config = Self::with_max_destinations(raw.source, raw.destinations, usize::MAX)?;
        match raw.mode {
            Some(mode) => config.with_mode(mode),
            None => Ok(config),
        }
    }
}

pub(crate) fn check_limit(count: usize, max: usize) -> Result<()> {
    if count > max {
        return Err(Error::TooManyDestinations { count, max });
    }
    Ok(())
}

/// Connection state of one destination channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayChannelState {
    Connecting,
    Connected,
    Paused,
    Error,
    Disconnected,
}

impl fmt::Display for RelayChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Paused => "paused",
            Self::Error => "error",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}
