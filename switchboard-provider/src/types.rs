//! Provider identity types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Opaque vendor tag identifying a provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ProviderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Features a provider declares at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    AudioStreaming,
    VideoStreaming,
    StreamPush,
    MediaRelay,
    VolumeIndication,
}

/// What a factory declares about the providers it builds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Lower is preferred
    pub priority: u32,
    pub capabilities: BTreeSet<Capability>,
}

impl ProviderDescriptor {
    #[must_use]
    pub fn new(priority: u32, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            priority,
            capabilities: capabilities.into_iter().collect(),
        }
    }
}

/// A registered provider: id, priority and capabilities, fixed at registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    id: ProviderId,
    priority: u32,
    capabilities: BTreeSet<Capability>,
}

impl ProviderIdentity {
    #[must_use]
    pub fn new(id: ProviderId, descriptor: ProviderDescriptor) -> Self {
        Self {
            id,
            priority: descriptor.priority,
            capabilities: descriptor.capabilities,
        }
    }

    #[must_use]
    pub const fn id(&self) -> &ProviderId {
        &self.id
    }

    #[must_use]
    pub const fn priority(&self) -> u32 {
        self.priority
    }

    #[must_use]
    pub const fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }

    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}
