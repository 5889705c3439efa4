use crate::types::ProviderId;
use std::collections::HashSet;
use switchboard_core::{Error, Result};

/// Ordered providers tried during automatic failover; never contains duplicates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackChain(Vec<ProviderId>);

impl FallbackChain {
    pub fn new(providers: Vec<ProviderId>) -> Result<Self> {
        let mut seen = HashSet::new();
        for provider in &providers {
            if !seen.insert(provider) {
                return Err(Error::DuplicateProvider(provider.to_string()));
            }
        }
        Ok(Self(providers))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderId> {
        self.0.iter()
    }

    #[must_use]
    pub fn contains(&self, provider: &ProviderId) -> bool {
        self.0.contains(provider)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<ProviderId> {
        self.0.clone()
    }
}

impl TryFrom<Vec<String>> for FallbackChain {
    type Error = Error;

    fn try_from(providers: Vec<String>) -> Result<Self> {
        Self::new(providers.into_iter().map(ProviderId::from).collect())
    }
}
