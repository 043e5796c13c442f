//! Error taxonomy for the controller. Every externally reachable operation
//! maps one of these into a stable `{code, message}` pair; nothing crosses
//! the API boundary as a panic.

use std::time::Duration;

use crate::state::Provider;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("{0}")]
    Validation(String),

    #[error("API key {0} not found")]
    NotFound(String),

    #[error("API key already exists")]
    DuplicateKey,

    #[error("no API keys available for {0}")]
    NoActiveKey(Provider),

    /// All keys have hit the error limit. Consumed by the fallback chain;
    /// only surfaced when fallback itself cannot complete.
    #[error("all API keys have reached the error limit")]
    PoolExhausted,

    #[error("provider {provider} is unreachable: {reason}")]
    ProviderUnavailable { provider: Provider, reason: String },

    #[error("probe timed out after {0:?}")]
    ProbeTimeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("state serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ControllerError {
    /// Stable machine-readable code, part of the web-layer contract.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::DuplicateKey => "duplicate_key",
            Self::NoActiveKey(_) => "no_active_key",
            Self::PoolExhausted => "pool_exhausted",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::ProbeTimeout(_) => "probe_timeout",
            Self::Network(_) => "network_error",
            Self::Storage(_) => "storage_error",
            Self::Serialize(_) => "storage_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;
