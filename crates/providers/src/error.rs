use thiserror::Error;

use crate::capability::Capability;

/// Failures surfaced by provider lookup, selection and calls.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    #[error("provider '{0}' is not registered")]
    NotFound(String),

    #[error("no provider could be resolved for this request")]
    NoneResolved,

    #[error("provider '{0}' is currently unavailable")]
    Unavailable(String),

    #[error("capability '{capability}' not supported by provider '{provider}'")]
    CapabilityNotSupported {
        provider: String,
        capability: Capability,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The backend call itself failed.
    #[error("{provider}: {message}")]
    Upstream { provider: String, message: String },
}

impl ProviderError {
    pub fn upstream(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::NotFound(_) => "provider_not_found",
            ProviderError::NoneResolved => "provider_not_resolved",
            ProviderError::Unavailable(_) => "provider_unavailable",
            ProviderError::CapabilityNotSupported { .. } => "capability_not_supported",
            ProviderError::InvalidRequest(_) => "validation_error",
            ProviderError::Upstream { .. } => "provider_error",
        }
    }
}
