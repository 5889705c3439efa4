use crate::health::HealthStatus;
use crate::types::ProviderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why a switch was requested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchReason {
    UserRequested,
    HealthDegraded,
    ConnectionLost,
    CapabilityRequired,
    Other(String),
}

impl fmt::Display for SwitchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserRequested => f.write_str("user_requested"),
            Self::HealthDegraded => f.write_str("health_degraded"),
            Self::ConnectionLost => f.write_str("connection_lost"),
            Self::CapabilityRequired => f.write_str("capability_required"),
            Self::Other(reason) => write!(f, "other: {reason}"),
        }
    }
}

/// Result of a switch request, kept as the "last switch result"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchOutcome {
    pub switch_id: String,
    pub from: Option<ProviderId>,
    pub to: ProviderId,
    pub reason: SwitchReason,
    pub success: bool,
    pub error: Option<String>,
    /// Whether a session snapshot was captured and restored
    pub session_preserved: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl SwitchOutcome {
    pub(crate) fn succeeded(
        from: Option<ProviderId>,
        to: ProviderId,
        reason: SwitchReason,
        session_preserved: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            switch_id: nanoid::nanoid!(12),
            from,
            to,
            reason,
            success: true,
            error: None,
            session_preserved,
            started_at,
            completed_at: Utc::now(),
        }
    }

    pub(crate) fn failed(
        from: Option<ProviderId>,
        to: ProviderId,
        reason: SwitchReason,
        error: &switchboard_core::Error,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            switch_id: nanoid::nanoid!(12),
            from,
            to,
            reason,
            success: false,
            error: Some(error.to_string()),
            session_preserved: false,
            started_at,
            completed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }
}

/// Observable output of the switch coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    Registered {
        provider: ProviderId,
        priority: u32,
    },
    Unregistered {
        provider: ProviderId,
    },
    SwitchStarted {
        from: Option<ProviderId>,
        to: ProviderId,
        reason: SwitchReason,
    },
    SwitchCompleted(SwitchOutcome),
    FallbackFailed {
        reason: SwitchReason,
        error: String,
    },
    HealthChanged {
        provider: ProviderId,
        old: HealthStatus,
        new: HealthStatus,
    },
    ReconnectAttempt {
        provider: ProviderId,
        attempt: u32,
        delay: Duration,
    },
    Reconnected {
        provider: ProviderId,
        attempt: u32,
    },
    ReconnectExhausted {
        provider: ProviderId,
        attempts: u32,
    },
}
