use crate::channel::{RelayChannelState, RelayMode};
use crate::stats::RelayLifecycleStatistics;
use std::time::Duration;

/// Observable output of the media relay coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Active {
        mode: RelayMode,
        source: String,
        destinations: Vec<String>,
    },
    Inactive {
        duration: Duration,
        statistics: RelayLifecycleStatistics,
    },
    ChannelAdded {
        channel: String,
    },
    ChannelRemoved {
        channel: String,
    },
    ChannelStateChanged {
        channel: String,
        old: RelayChannelState,
        new: RelayChannelState,
    },
    ChannelError {
        channel: String,
        error: String,
    },
    ChannelReconnectAttempt {
        channel: String,
        attempt: u32,
        delay: Duration,
    },
    ChannelReconnected {
        channel: String,
        attempt: u32,
    },
    ChannelReconnectExhausted {
        channel: String,
        attempts: u32,
    },
    /// The source channel failed and the relay was torn down
    RelayFailed {
        error: String,
    },
}
