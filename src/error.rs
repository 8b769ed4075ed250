//! Error taxonomy for the extraction pipeline
//!
//! Each variant maps to the smallest unit of work it invalidates:
//! - [`ExtractError::Config`] aborts the run before any extraction
//! - [`ExtractError::Connection`] fails the remaining tables of one source
//! - everything else fails a single table

use std::fmt;

/// Errors raised while extracting a table into the landing zone
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// Malformed or missing configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The data source could not be reached
    #[error("connection error: {0}")]
    Connection(String),

    /// Bad query, lost connection mid-query, or timeout
    #[error("query error: {0}")]
    Query(String),

    /// A result could not be encoded into the requested format
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The encoded payload was not durably written
    #[error("delivery error: {0}")]
    Delivery(String),

    /// The watermark backend could not be reached or answered with an error
    #[error("watermark store unavailable: {0}")]
    StoreUnavailable(String),
}

impl ExtractError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Connection(_) => ErrorKind::Connection,
            Self::Query(_) => ErrorKind::Query,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Delivery(_) => ErrorKind::Delivery,
            Self::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
        }
    }
}

/// Discriminant of [`ExtractError`], used in run reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    Connection,
    Query,
    Serialization,
    Delivery,
    StoreUnavailable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Config => "ConfigError",
            Self::Connection => "ConnectionError",
            Self::Query => "QueryError",
            Self::Serialization => "SerializationError",
            Self::Delivery => "DeliveryError",
            Self::StoreUnavailable => "StoreUnavailable",
        };
        f.write_str(name)
    }
}

pub type Result<T, E = ExtractError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        let err = ExtractError::StoreUnavailable("timeout".to_string());
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
        assert_eq!(err.kind().to_string(), "StoreUnavailable");
        assert_eq!(err.to_string(), "watermark store unavailable: timeout");
    }
}
