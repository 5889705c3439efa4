// Provider Error Types

use crate::types::ProviderId;

/// Errors raised by provider factories and live provider handles
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("Authentication required")]
    AuthRequired,

    #[error("Network error: {0}")]
    NetworkError(String),
}

impl ProviderError {
    /// Attach the provider id and lift into the engine error type
    #[must_use]
    pub fn for_provider(self, provider: &ProviderId) -> switchboard_core::Error {
        switchboard_core::Error::Provider {
            provider: provider.to_string(),
            reason: self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::ErrorKind;

    #[test]
    fn test_lifted_error_is_transport() {
        let err = ProviderError::NetworkError("reset by peer".to_string())
            .for_provider(&ProviderId::from("agora"));
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(
            err.to_string(),
            "Provider error (agora): Network error: reset by peer"
        );
    }
}
