// Provider Registry
//
// Factory-based registry keyed by provider id. Pure bookkeeping: nothing here
// constructs a provider.

use crate::traits::ProviderFactory;
use crate::types::{Capability, ProviderId, ProviderIdentity};
use std::collections::HashMap;
use std::sync::Arc;

struct RegisteredProvider {
    identity: ProviderIdentity,
    factory: Arc<dyn ProviderFactory>,
}

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderId, RegisteredProvider>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `provider`, replacing any previous registration.
    ///
    /// Returns the identity derived from the factory's descriptor.
    pub fn register(&mut self, provider: ProviderId, factory: Arc<dyn ProviderFactory>) -> ProviderIdentity {
        let identity = ProviderIdentity::new(provider.clone(), factory.descriptor());
        self.providers.insert(
            provider,
            RegisteredProvider {
                identity: identity.clone(),
                factory,
            },
        );
        identity
    }

    /// Remove a provider. Returns whether it was registered.
    pub fn unregister(&mut self, provider: &ProviderId) -> bool {
        self.providers.remove(provider).is_some()
    }

    #[must_use]
    pub fn contains(&self, provider: &ProviderId) -> bool {
        self.providers.contains_key(provider)
    }

    #[must_use]
    pub fn identity(&self, provider: &ProviderId) -> Option<ProviderIdentity> {
        self.providers.get(provider).map(|p| p.identity.clone())
    }

    #[must_use]
    pub fn factory(&self, provider: &ProviderId) -> Option<Arc<dyn ProviderFactory>> {
        self.providers.get(provider).map(|p| Arc::clone(&p.factory))
    }

    /// Registered identities, most preferred (lowest priority value) first
    #[must_use]
    pub fn available_providers(&self) -> Vec<ProviderIdentity> {
        let mut identities: Vec<ProviderIdentity> =
            self.providers.values().map(|p| p.identity.clone()).collect();
        identities.sort_by(|a, b| a.priority().cmp(&b.priority()).then_with(|| a.id().cmp(b.id())));
        identities
    }

    #[must_use]
    pub fn providers_with_capability(&self, capability: Capability) -> Vec<ProviderIdentity> {
        self.available_providers()
            .into_iter()
            .filter(|identity| identity.supports(capability))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
