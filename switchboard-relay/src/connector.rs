// Relay transport boundary

use crate::channel::RelayChannelInfo;
use async_trait::async_trait;
use switchboard_core::Result;

/// Establishes the media path from the source channel to one destination.
///
/// Invoked by channel reconnection attempts after a destination failed.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, source: &RelayChannelInfo, destination: &RelayChannelInfo) -> Result<()>;
}
