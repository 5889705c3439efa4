//! Media relay
//!
//! Relays a live session from one source channel to several destination
//! channels, tracking per-channel state and statistics and reconnecting
//! destinations that drop.

pub mod channel;
pub mod connector;
pub mod coordinator;
pub mod events;
pub mod registry;
pub mod stats;

pub use channel::{MediaRelayConfig, RelayChannelInfo, RelayChannelState, RelayMode};
pub use connector::ChannelConnector;
pub use coordinator::MediaRelayCoordinator;
pub use events::RelayEvent;
pub use registry::{ChannelTarget, RelayChannelRegistry};
pub use stats::{ChannelStatistics, ChannelStatisticsSnapshot, RelayLifecycleStatistics};
