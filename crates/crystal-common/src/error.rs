//! Error types for Crystal
//!
//! This module defines the common error type used throughout the system.
//! "Not applicable" requests are not errors; see [`crate::context::NotApplicable`].

use thiserror::Error;

/// Common result type for Crystal operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Crystal
#[derive(Debug, Error)]
pub enum Error {
    // Configuration consistency errors
    #[error("filter {filter} has no id at {key}")]
    MissingFilterId { filter: String, key: String },

    #[error("no generic metadata for filter {filter} (id {id})")]
    MissingFilterMetadata { filter: String, id: String },

    #[error("invalid filter definition for {filter}: {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    // Infrastructure errors
    #[error("metadata store unavailable: {0}")]
    MetadataStore(String),

    #[error("filter gateway error: {0}")]
    FilterGateway(String),

    #[error("request body error: {0}")]
    Body(String),

    // Cross-tier transport errors
    #[error("malformed header {header}: {reason}")]
    MalformedHeader { header: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid filter definition error
    pub fn invalid_filter(filter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFilter {
            filter: filter.into(),
            reason: reason.into(),
        }
    }

    /// Create a malformed header error
    pub fn malformed_header(header: impl Into<String>, reason: impl ToString) -> Self {
        Self::MalformedHeader {
            header: header.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a filter gateway error
    pub fn gateway(msg: impl Into<String>) -> Self {
        Self::FilterGateway(msg.into())
    }

    /// Check if this error means the stored filter configuration is inconsistent
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingFilterId { .. }
                | Self::MissingFilterMetadata { .. }
                | Self::InvalidFilter { .. }
                | Self::Configuration(_)
        )
    }

    /// Check if this error comes from an external collaborator being unreachable or failing
    #[must_use]
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::MetadataStore(_) | Self::FilterGateway(_) | Self::Body(_)
        )
    }

    /// Get the HTTP status code returned to the client.
    ///
    /// Every failure inside the filter layer surfaces as a generic server error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        500
    }
}
