//! Error types shared by the provider and relay coordinators

use thiserror::Error;

/// Broad class of an [`Error`], deciding how it propagates.
///
/// Validation and precondition errors are returned to the caller. Transport
/// errors are retried by the reconnection policy and only surface as events.
/// Fatal errors tear the relay down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Precondition,
    Transport,
    Fatal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Destination list is empty")]
    EmptyDestinations,

    #[error("Too many destination channels: {count} (max {max})")]
    TooManyDestinations { count: usize, max: usize },

    #[error("Duplicate channel: {0}")]
    DuplicateChannel(String),

    #[error("Duplicate provider in fallback chain: {0}")]
    DuplicateProvider(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Media relay is already active")]
    RelayAlreadyActive,

    #[error("Media relay is not active")]
    RelayNotActive,

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Channel already exists: {0}")]
    ChannelAlreadyExists(String),

    #[error("Channel {channel} cannot do that while {state}")]
    InvalidChannelState { channel: String, state: String },

    #[error("Cannot remove the last destination channel: {0}")]
    LastDestination(String),

    #[error("Provider switch already in progress")]
    SwitchInProgress,

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("No eligible fallback provider")]
    NoFallbackCandidate,

    #[error("Provider error ({provider}): {reason}")]
    Provider { provider: String, reason: String },

    #[error("Session state error: {0}")]
    SessionState(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Reconnection to {target} gave up after {attempts} attempts")]
    ReconnectExhausted { target: String, attempts: u32 },

    #[error("Source channel failed: {0}")]
    SourceChannelFailed(String),
}

impl Error {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_)
            | Self::MissingField(_)
            | Self::EmptyDestinations
            | Self::TooManyDestinations { .. }
            | Self::DuplicateChannel(_)
            | Self::DuplicateProvider(_)
            | Self::Configuration(_) => ErrorKind::Validation,
            Self::RelayAlreadyActive
            | Self::RelayNotActive
            | Self::ChannelNotFound(_)
            | Self::ChannelAlreadyExists(_)
            | Self::InvalidChannelState { .. }
            | Self::LastDestination(_)
            | Self::SwitchInProgress
            | Self::ProviderUnavailable(_)
            | Self::NoFallbackCandidate => ErrorKind::Precondition,
            Self::Provider { .. }
            | Self::SessionState(_)
            | Self::Transport(_)
            | Self::ReconnectExhausted { .. } => ErrorKind::Transport,
            Self::SourceChannelFailed(_) => ErrorKind::Fatal,
        }
    }

    /// True for errors the reconnection policy may retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Provider { .. } | Self::SessionState(_) | Self::Transport(_)
        )
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
