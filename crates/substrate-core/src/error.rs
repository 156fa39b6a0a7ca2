//! Shared error taxonomy for the substrate services.
//!
//! Every service (`substrate-memory`, `substrate-runtime`,
//! `substrate-council`) returns `SubstrateResult<T>` internally and only
//! flattens to the in-band `{"error": "..."}` JSON shape at the tool
//! surface boundary.

use thiserror::Error;

/// Errors produced by any substrate service.
#[derive(Debug, Error)]
pub enum SubstrateError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("provider timeout: {0}")]
    ProviderTimeout(String),

    #[error("provider failure: {0}")]
    ProviderFailure(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl SubstrateError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn duplicate(msg: impl Into<String>) -> Self {
        Self::Duplicate(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn state_conflict(msg: impl Into<String>) -> Self {
        Self::StateConflict(msg.into())
    }

    pub fn provider_unavailable(msg: impl Into<String>) -> Self {
        Self::ProviderUnavailable(msg.into())
    }

    pub fn provider_timeout(msg: impl Into<String>) -> Self {
        Self::ProviderTimeout(msg.into())
    }

    pub fn provider_failure(msg: impl Into<String>) -> Self {
        Self::ProviderFailure(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Flatten to the in-band `{"error": "<message>"}` shape required at
    /// the tool surface boundary (never raised as a transport exception).
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string() })
    }
}

impl From<rusqlite::Error> for SubstrateError {
    fn from(e: rusqlite::Error) -> Self {
        SubstrateError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for SubstrateError {
    fn from(e: serde_json::Error) -> Self {
        SubstrateError::Serialization(e.to_string())
    }
}

pub type SubstrateResult<T> = Result<T, SubstrateError>;
