//! Provider orchestration
//!
//! Keeps a registry of interchangeable real-time communication providers,
//! tracks their health and moves the session between them, either on request
//! or automatically when the active provider fails.

pub mod coordinator;
pub mod error;
pub mod events;
pub mod fallback;
pub mod health;
pub mod registry;
pub mod session;
pub mod traits;
pub mod types;

pub use coordinator::ProviderSwitchCoordinator;
pub use error::ProviderError;
pub use events::{ProviderEvent, SwitchOutcome, SwitchReason};
pub use fallback::FallbackChain;
pub use health::{HealthStatus, HealthTransition, ProviderHealthStatus, ProviderHealthTracker};
pub use registry::ProviderRegistry;
pub use session::{
    AudioSettings, MemorySessionStore, RoomMembership, SessionSnapshot, SessionState,
    SessionStateCapture, SessionStateSource,
};
pub use traits::{ProviderFactory, ProviderHandle};
pub use types::{Capability, ProviderDescriptor, ProviderId, ProviderIdentity};
