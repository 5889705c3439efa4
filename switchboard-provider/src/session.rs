//! Session state carried across provider switches
//!
//! The engine treats snapshots as opaque: a [`SessionStateSource`] captures
//! one before the old provider is torn down and restores it onto the new
//! provider once that is live.

use crate::traits::ProviderHandle;
use crate::types::ProviderId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use switchboard_core::{Error, Result};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub captured_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Session-management layer boundary
#[async_trait]
pub trait SessionStateSource: Send + Sync {
    async fn capture(&self) -> Result<SessionSnapshot>;

    async fn restore(
        &self,
        provider: &ProviderId,
        handle: &dyn ProviderHandle,
        snapshot: &SessionSnapshot,
    ) -> Result<()>;
}

/// Capture/restore wrapper used by the switch coordinator
pub struct SessionStateCapture {
    source: Arc<dyn SessionStateSource>,
    last_snapshot: Mutex<Option<SessionSnapshot>>,
}

impl SessionStateCapture {
    pub fn new(source: Arc<dyn SessionStateSource>) -> Self {
        Self {
            source,
            last_snapshot: Mutex::new(None),
        }
    }

    pub async fn capture(&self, from: Option<&ProviderId>) -> Result<SessionSnapshot> {
        let snapshot = self.source.capture().await?;
        debug!(
            from = from.map(ProviderId::as_str),
            captured_at = %snapshot.captured_at,
            "Captured session snapshot"
        );
        *self.last_snapshot.lock() = Some(snapshot.clone());
        Ok(snapshot)
    }

    pub async fn restore(
        &self,
        provider: &ProviderId,
        handle: &dyn ProviderHandle,
        snapshot: &SessionSnapshot,
    ) -> Result<()> {
        self.source.restore(provider, handle, snapshot).await?;
        info!(provider = %provider, "Restored session state onto provider");
        Ok(())
    }

    /// Most recent snapshot taken for a switch
    #[must_use]
    pub fn last_snapshot(&self) -> Option<SessionSnapshot> {
        self.last_snapshot.lock().clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMembership {
    pub channel: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSettings {
    pub recording_volume: u8,
    pub playback_volume: u8,
    pub muted: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            recording_volume: 100,
            playback_volume: 100,
            muted: false,
        }
    }
}

/// The portion of a session that survives a provider switch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub room: Option<RoomMembership>,
    pub audio: AudioSettings,
    pub volume_indication_enabled: bool,
}

/// In-process [`SessionStateSource`] holding the session state directly
#[derive(Default)]
pub struct MemorySessionStore {
    state: RwLock<SessionState>,
    restored_onto: Mutex<Vec<ProviderId>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(state: SessionState) -> Self {
        Self {
            state: RwLock::new(state),
            restored_onto: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut SessionState)) {
        f(&mut self.state.write());
    }

    /// Providers the state has been restored onto, oldest first
    #[must_use]
    pub fn restored_onto(&self) -> Vec<ProviderId> {
        self.restored_onto.lock().clone()
    }
}

#[async_trait]
impl SessionStateSource for MemorySessionStore {
    async fn capture(&self) -> Result<SessionSnapshot> {
        let payload = serde_json::to_value(&*self.state.read())
            .map_err(|e| Error::SessionState(format!("failed to encode session state: {e}")))?;
        Ok(SessionSnapshot {
            captured_at: Utc::now(),
            payload,
        })
    }

    async fn restore(
        &self,
        provider: &ProviderId,
        _handle: &dyn ProviderHandle,
        snapshot: &SessionSnapshot,
    ) -> Result<()> {
        let state: SessionState = serde_json::from_value(snapshot.payload.clone())
            .map_err(|e| Error::SessionState(format!("failed to decode session state: {e}")))?;
        *self.state.write() = state;
        self.restored_onto.lock().push(provider.clone());
        Ok(())
    }
}
