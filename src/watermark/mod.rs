//! Durable per-table watermarks
//!
//! A watermark row is keyed by (source, table) and carries three attributes:
//! - `ExtractMethod`: bookkeeping written when a table is first seen
//! - `LatestUpdatedValue`: highest delivered value of the incremental column
//! - `IncrementalKey`: the column that value was taken from
//!
//! Backends:
//! - [`FileWatermarkStore`]: JSON document on local disk
//! - [`TableWatermarkStore`]: Azure Table Storage over its REST API
//! - [`MemoryWatermarkStore`]: process-local, for tests and dry runs

mod file;
mod memory;
mod table;

pub use file::FileWatermarkStore;
pub use memory::MemoryWatermarkStore;
pub use table::TableWatermarkStore;

use crate::config::ExtractMethod;
use crate::error::{ExtractError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

/// Conventional "since the beginning of time" boundary
///
/// The pipeline itself never binds this value: a table without a stored
/// watermark is queried without a boundary. It exists for callers that want
/// the `(value, found)` view via [`WatermarkStore::last_value_or_epoch`].
pub const EPOCH_SENTINEL: &str = "1970-01-01";

/// Attributes of one watermark row
///
/// Every field is optional so the same type doubles as a partial update:
/// `None` fields are left untouched by [`WatermarkStore::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WatermarkRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_updated_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incremental_key: Option<String>,
}

impl WatermarkRecord {
    /// Initialization attributes registering a table's extraction method
    pub fn method(method: ExtractMethod) -> Self {
        Self {
            extract_method: Some(method.to_string()),
            ..Default::default()
        }
    }

    /// Commit attributes written after a successful incremental delivery
    pub fn committed(value: impl Into<String>, incremental_key: impl Into<String>) -> Self {
        Self {
            latest_updated_value: Some(value.into()),
            incremental_key: Some(incremental_key.into()),
            ..Default::default()
        }
    }

    /// Stored value usable as a lower bound on `column`
    ///
    /// A value taken from another incremental column yields `None`. Records
    /// without a key are trusted.
    pub fn value_for(&self, column: &str) -> Option<&str> {
        match &self.incremental_key {
            Some(key) if key != column => None,
            _ => self.latest_updated_value.as_deref(),
        }
    }

    /// Merge `other` into `self`, keeping fields `other` does not set
    pub fn merge(&mut self, other: &WatermarkRecord) {
        if let Some(method) = &other.extract_method {
            self.extract_method = Some(method.clone());
        }
        if let Some(value) = &other.latest_updated_value {
            self.latest_updated_value = Some(value.clone());
        }
        if let Some(key) = &other.incremental_key {
            self.incremental_key = Some(key.clone());
        }
    }
}

/// Result of an idempotent create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// A row already existed and was left untouched
    AlreadyExists,
}

/// A stored row together with its key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredWatermark {
    pub source: String,
    pub table: String,
    pub record: WatermarkRecord,
}

/// Keyed record store for watermarks
///
/// Operations on different (source, table) keys never interfere.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Read a row, `None` when it does not exist
    ///
    /// # Errors
    /// [`ExtractError::StoreUnavailable`] if the backend cannot be reached
    async fn get(&self, source: &str, table: &str) -> Result<Option<WatermarkRecord>>;

    /// Insert a row unless one already exists
    async fn create(
        &self,
        source: &str,
        table: &str,
        attrs: &WatermarkRecord,
    ) -> Result<CreateOutcome>;

    /// Merge `attrs` into the row, creating it if needed
    async fn update(&self, source: &str, table: &str, attrs: &WatermarkRecord) -> Result<()>;

    /// All rows, optionally restricted to one source
    async fn list(&self, source: Option<&str>) -> Result<Vec<StoredWatermark>>;

    /// The stored value and whether it was found, defaulting to [`EPOCH_SENTINEL`]
    async fn last_value_or_epoch(&self, source: &str, table: &str) -> Result<(String, bool)> {
        let value = self
            .get(source, table)
            .await?
            .and_then(|record| record.latest_updated_value);
        Ok(match value {
            Some(value) => (value, true),
            None => (EPOCH_SENTINEL.to_string(), false),
        })
    }
}

/// Open a watermark store from a URL
///
/// - `file:///var/lib/landing/watermarks.json`
/// - `https://<account>.table.core.windows.net/<table>` (SAS token in the URL
///   query or passed as `sas_token`)
/// - `memory://`
pub fn open_store(url: &Url, sas_token: Option<String>) -> Result<Arc<dyn WatermarkStore>> {
    match url.scheme() {
        "file" => {
            let path = url.to_file_path().map_err(|_| {
                ExtractError::Config(format!("invalid watermark file URL: {}", url))
            })?;
            Ok(Arc::new(FileWatermarkStore::new(path)))
        }
        "http" | "https" => Ok(Arc::new(TableWatermarkStore::try_new(
            url.clone(),
            sas_token,
        )?)),
        "memory" => Ok(Arc::new(MemoryWatermarkStore::new())),
        other => Err(ExtractError::Config(format!(
            "unsupported watermark store scheme '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_preserves_unset_fields() {
        let mut record = WatermarkRecord::method(ExtractMethod::Incremental);
        record.merge(&WatermarkRecord::committed("2024-01-15T10:00:00", "updated_at"));

        assert_eq!(record.extract_method.as_deref(), Some("incremental"));
        assert_eq!(
            record.latest_updated_value.as_deref(),
            Some("2024-01-15T10:00:00")
        );
        assert_eq!(record.incremental_key.as_deref(), Some("updated_at"));
    }

    #[test]
    fn test_value_for_other_column_is_ignored() {
        let record = WatermarkRecord::committed("42", "id");
        assert_eq!(record.value_for("id"), Some("42"));
        assert_eq!(record.value_for("updated_at"), None);

        let unkeyed = WatermarkRecord {
            latest_updated_value: Some("2024-01-01".into()),
            ..Default::default()
        };
        assert_eq!(unkeyed.value_for("updated_at"), Some("2024-01-01"));
        assert_eq!(WatermarkRecord::default().value_for("id"), None);
    }

    #[test]
    fn test_record_wire_names() {
        let json = serde_json::to_value(WatermarkRecord::committed("5", "id")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"LatestUpdatedValue": "5", "IncrementalKey": "id"})
        );
    }

    #[test]
    fn test_open_store_schemes() {
        assert!(open_store(&Url::parse("memory://").unwrap(), None).is_ok());
        assert!(open_store(&Url::parse("file:///tmp/watermarks.json").unwrap(), None).is_ok());
        assert!(open_store(&Url::parse("ftp://host/x").unwrap(), None).is_err());
    }

    #[tokio::test]
    async fn test_last_value_or_epoch() {
        let store = MemoryWatermarkStore::new();
        assert_eq!(
            store.last_value_or_epoch("s", "t").await.unwrap(),
            (EPOCH_SENTINEL.to_string(), false)
        );

        // A method-only row still has no value
        store
            .create("s", "t", &WatermarkRecord::method(ExtractMethod::Incremental))
            .await
            .unwrap();
        assert_eq!(store.last_value_or_epoch("s", "t").await.unwrap().1, false);

        store
            .update("s", "t", &WatermarkRecord::committed("42", "id"))
            .await
            .unwrap();
        assert_eq!(
            store.last_value_or_epoch("s", "t").await.unwrap(),
            ("42".to_string(), true)
        );
    }
}
