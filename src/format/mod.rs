//! Wire formats for delivered results
//!
//! Encoding is deterministic: the same result and format always produce the
//! same bytes, with row order preserved.

mod csv;
mod json;
mod parquet;

use crate::data::ExtractionResult;
use crate::error::Result;
use clap::ValueEnum;
use serde::Deserialize;
use std::fmt;

/// Serialization format of a delivery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// UTF-8 CSV with a header row, every value as text
    #[default]
    Csv,
    /// JSON array of row objects
    Json,
    /// Schema-preserving Parquet
    Parquet,
}

impl Format {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Parquet => "parquet",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv; charset=utf-8",
            Self::Json => "application/json",
            Self::Parquet => "application/vnd.apache.parquet",
        }
    }

    /// Encode `result` into this format
    ///
    /// # Errors
    /// [`crate::error::ExtractError::Serialization`] when a value cannot be
    /// represented in the target format
    pub fn encode(&self, result: &ExtractionResult) -> Result<Vec<u8>> {
        match self {
            Self::Csv => csv::encode(result),
            Self::Json => json::encode(result),
            Self::Parquet => parquet::encode(result),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for Format {
    type Err = crate::error::ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "parquet" => Ok(Self::Parquet),
            other => Err(crate::error::ExtractError::Serialization(format!(
                "unsupported format '{}', choose csv, json or parquet",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_from_str() {
        assert_eq!("CSV".parse::<Format>().unwrap(), Format::Csv);
        assert_eq!("parquet".parse::<Format>().unwrap(), Format::Parquet);

        let err = "avro".parse::<Format>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Serialization);
    }
}
