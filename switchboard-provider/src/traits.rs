// Provider boundary traits
//
// Concrete vendor SDK bindings live behind these; the engine only constructs,
// reconnects and shuts down.

use crate::error::ProviderError;
use crate::types::ProviderDescriptor;
use async_trait::async_trait;
use std::sync::Arc;

/// Builds live provider handles
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    /// Priority and capabilities of the providers this factory builds
    fn descriptor(&self) -> ProviderDescriptor;

    /// Construct a live provider. Failure is an ordinary switch failure.
    async fn create(&self) -> Result<Arc<dyn ProviderHandle>, ProviderError>;
}

/// A live provider instance
#[async_trait]
pub trait ProviderHandle: Send + Sync {
    /// Re-establish the transport after a connection loss
    async fn reconnect(&self) -> Result<(), ProviderError>;

    /// Release the provider; called after another provider took over
    async fn shutdown(&self) -> Result<(), ProviderError>;
}
