//! Overseer Error Types
//!
//! This module defines a layered error hierarchy:
//! - `DomainError`: Business logic errors (config, server records, watchlist)
//! - `InfraError`: Infrastructure errors (IO, serialization, query network)
//! - `OverseerError`: Top-level error that wraps both categories

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors representing business logic failures
#[derive(Debug, Error)]
pub enum DomainError {
    /// No configuration file at any of the searched paths
    #[error("Config not found (searched {searched}); run `overseer init` or pass --config")]
    ConfigNotFound { searched: String },
    /// Configuration validation failed
    #[error("Config invalid [{field}]: {reason}")]
    ConfigInvalid { field: String, reason: String },
    /// Configuration parsing failed
    #[error("Config parse error: {reason}")]
    ConfigParse { reason: String },
    /// No server record with this id
    #[error("Server not found: {id}")]
    ServerNotFound { id: Uuid },
    /// No server record with this name
    #[error("Server not found: {name}")]
    ServerNameNotFound { name: String },
    /// A record with this id is already stored
    #[error("Server already exists: {id}")]
    ServerExists { id: Uuid },
    /// Server record rejected by the store
    #[error("Server invalid: {reason}")]
    ServerInvalid { reason: String },
    /// Watchlist entry rejected by the store
    #[error("Watchlist entry invalid: {reason}")]
    WatchlistInvalid { reason: String },
}

/// Infrastructure-level errors representing external system failures
#[derive(Debug, Error)]
pub enum InfraError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// YAML serialization/deserialization failed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yml::Error),
    /// Query endpoint could not be reached
    #[error("Network error [{addr}]: {reason}")]
    Network { addr: String, reason: String },
    /// Query endpoint did not answer in time
    #[error("Timed out waiting for {addr}")]
    Timeout { addr: String },
    /// Query endpoint answered with something we cannot decode
    #[error("Protocol error [{addr}]: {reason}")]
    Protocol { addr: String, reason: String },
}

/// Top-level error type for Overseer
#[derive(Debug, Error)]
pub enum OverseerError {
    /// Business logic error
    #[error(transparent)]
    Domain(#[from] DomainError),
    /// Infrastructure/external system error
    #[error(transparent)]
    Infra(#[from] InfraError),
}

pub type Result<T> = std::result::Result<T, OverseerError>;

impl From<std::io::Error> for OverseerError {
    fn from(err: std::io::Error) -> Self {
        Self::Infra(InfraError::Io(err))
    }
}

impl From<serde_json::Error> for OverseerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Infra(InfraError::Json(err))
    }
}

impl From<serde_yml::Error> for OverseerError {
    fn from(err: serde_yml::Error) -> Self {
        Self::Infra(InfraError::Yaml(err))
    }
}

impl OverseerError {
    pub fn config_not_found(searched: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigNotFound {
            searched: searched.into(),
        })
    }

    pub fn config_parse_error(reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigParse {
            reason: reason.into(),
        })
    }

    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        })
    }

    pub fn server_not_found(id: Uuid) -> Self {
        Self::Domain(DomainError::ServerNotFound { id })
    }

    pub fn server_exists(id: Uuid) -> Self {
        Self::Domain(DomainError::ServerExists { id })
    }

    pub fn server_name_not_found(name: impl Into<String>) -> Self {
        Self::Domain(DomainError::ServerNameNotFound { name: name.into() })
    }

    pub fn server_invalid(reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::ServerInvalid {
            reason: reason.into(),
        })
    }

    pub fn watchlist_invalid(reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::WatchlistInvalid {
            reason: reason.into(),
        })
    }

    pub fn network(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Infra(InfraError::Network {
            addr: addr.into(),
            reason: reason.into(),
        })
    }

    pub fn timeout(addr: impl Into<String>) -> Self {
        Self::Infra(InfraError::Timeout { addr: addr.into() })
    }

    pub fn protocol(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Infra(InfraError::Protocol {
            addr: addr.into(),
            reason: reason.into(),
        })
    }

    /// True for "record does not exist" failures
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Domain(DomainError::ServerNotFound { .. })
                | Self::Domain(DomainError::ServerNameNotFound { .. })
        )
    }
}
