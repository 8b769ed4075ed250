//! Process-local watermark store

use super::{CreateOutcome, StoredWatermark, WatermarkRecord, WatermarkStore};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// Watermarks held in memory for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    rows: Mutex<BTreeMap<(String, String), WatermarkRecord>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn get(&self, source: &str, table: &str) -> Result<Option<WatermarkRecord>> {
        let rows = self.rows.lock().await;
        Ok(rows.get(&(source.to_string(), table.to_string())).cloned())
    }

    async fn create(
        &self,
        source: &str,
        table: &str,
        attrs: &WatermarkRecord,
    ) -> Result<CreateOutcome> {
        let mut rows = self.rows.lock().await;
        let key = (source.to_string(), table.to_string());
        if rows.contains_key(&key) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        rows.insert(key, attrs.clone());
        Ok(CreateOutcome::Created)
    }

    async fn update(&self, source: &str, table: &str, attrs: &WatermarkRecord) -> Result<()> {
        let mut rows = self.rows.lock().await;
        rows.entry((source.to_string(), table.to_string()))
            .or_default()
            .merge(attrs);
        Ok(())
    }

    async fn list(&self, source: Option<&str>) -> Result<Vec<StoredWatermark>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|((s, _), _)| source.is_none_or(|wanted| wanted == s.as_str()))
            .map(|((s, t), record)| StoredWatermark {
                source: s.clone(),
                table: t.clone(),
                record: record.clone(),
            })
            .collect())
    }
}
