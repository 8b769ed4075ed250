//! JSON file watermark store
//!
//! Layout on disk:
//! ```json
//! {
//!   "adventure_works": {
//!     "sales.orders": {
//!       "ExtractMethod": "incremental",
//!       "LatestUpdatedValue": "2024-01-15T10:00:00",
//!       "IncrementalKey": "updated_at"
//!     }
//!   }
//! }
//! ```

use super::{CreateOutcome, StoredWatermark, WatermarkRecord, WatermarkStore};
use crate::error::{ExtractError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

type Document = BTreeMap<String, BTreeMap<String, WatermarkRecord>>;

/// Watermarks persisted as a single JSON document
///
/// Every mutation is a read-modify-write of the whole document, serialized by
/// an in-process lock and published with a rename so a crash mid-write leaves
/// the previous document intact.
pub struct FileWatermarkStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileWatermarkStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, action: &str, e: impl std::fmt::Display) -> ExtractError {
        ExtractError::StoreUnavailable(format!(
            "failed to {} {}: {}",
            action,
            self.path.display(),
            e
        ))
    }

    async fn read(&self) -> Result<Document> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(Document::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| self.unavailable("parse", e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Document::new()),
            Err(e) => Err(self.unavailable("read", e)),
        }
    }

    async fn write(&self, document: &Document) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.unavailable("create directory for", e))?;
        }

        let json = serde_json::to_string_pretty(document)
            .map_err(|e| self.unavailable("serialize", e))?;

        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        tokio::fs::write(&temp, format!("{}\n", json))
            .await
            .map_err(|e| self.unavailable("write", e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| self.unavailable("replace", e))?;
        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    async fn get(&self, source: &str, table: &str) -> Result<Option<WatermarkRecord>> {
        let _guard = self.lock.lock().await;
        let document = self.read().await?;
        Ok(document
            .get(source)
            .and_then(|tables| tables.get(table))
            .cloned())
    }

    async fn create(
        &self,
        source: &str,
        table: &str,
        attrs: &WatermarkRecord,
    ) -> Result<CreateOutcome> {
        let _guard = self.lock.lock().await;
        let mut document = self.read().await?;
        let tables = document.entry(source.to_string()).or_default();
        if tables.contains_key(table) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        tables.insert(table.to_string(), attrs.clone());
        self.write(&document).await?;
        Ok(CreateOutcome::Created)
    }

    async fn update(&self, source: &str, table: &str, attrs: &WatermarkRecord) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.read().await?;
        document
            .entry(source.to_string())
            .or_default()
            .entry(table.to_string())
            .or_default()
            .merge(attrs);
        self.write(&document).await
    }

    async fn list(&self, source: Option<&str>) -> Result<Vec<StoredWatermark>> {
        let _guard = self.lock.lock().await;
        let document = self.read().await?;
        Ok(document
            .into_iter()
            .filter(|(s, _)| source.is_none_or(|wanted| wanted == s.as_str()))
            .flat_map(|(s, tables)| {
                tables.into_iter().map(move |(t, record)| StoredWatermark {
                    source: s.clone(),
                    table: t,
                    record,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractMethod;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = FileWatermarkStore::new(temp.path().join("watermarks.json"));

        let outcome = store
            .create("src", "orders", &WatermarkRecord::method(ExtractMethod::Incremental))
            .await
            .unwrap();
        assert_eq!(outcome, CreateOutcome::Created);

        store
            .update("src", "orders", &WatermarkRecord::committed("7", "id"))
            .await
            .unwrap();

        // A second create must not clobber the committed value
        let outcome = store
            .create("src", "orders", &WatermarkRecord::method(ExtractMethod::Full))
            .await
            .unwrap();
        assert_eq!(outcome, CreateOutcome::AlreadyExists);

        let record = store.get("src", "orders").await.unwrap().unwrap();
        assert_eq!(record.extract_method.as_deref(), Some("incremental"));
        assert_eq!(record.latest_updated_value.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_keys_are_independent_and_persisted() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state").join("watermarks.json");

        {
            let store = FileWatermarkStore::new(&path);
            store
                .update("a", "t", &WatermarkRecord::committed("1", "id"))
                .await
                .unwrap();
            store
                .update("b", "t", &WatermarkRecord::committed("2", "id"))
                .await
                .unwrap();
        }

        let reopened = FileWatermarkStore::new(&path);
        assert_eq!(
            reopened
                .get("a", "t")
                .await
                .unwrap()
                .and_then(|r| r.latest_updated_value),
            Some("1".to_string())
        );
        assert_eq!(reopened.get("a", "missing").await.unwrap(), None);
        assert_eq!(reopened.list(None).await.unwrap().len(), 2);
        assert_eq!(reopened.list(Some("b")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_document_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("watermarks.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = FileWatermarkStore::new(&path);
        let err = store.get("a", "t").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    }
}
