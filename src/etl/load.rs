//! Delivery of extraction results to the landing zone

use crate::data::ExtractionResult;
use crate::error::{ExtractError, Result};
use crate::format::Format;
use crate::storage::{DeliveryTarget, Landing};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Durable destination for encoded payloads
///
/// A successful `put` means the object is readable at `target`.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Write `payload` at `target`
    ///
    /// # Errors
    /// [`ExtractError::Delivery`] if the write did not complete
    async fn put(
        &self,
        target: &DeliveryTarget,
        payload: Vec<u8>,
        content_type: &'static str,
    ) -> Result<()>;
}

#[async_trait]
impl Sink for Landing {
    async fn put(
        &self,
        target: &DeliveryTarget,
        payload: Vec<u8>,
        content_type: &'static str,
    ) -> Result<()> {
        Landing::put(self, target, payload, content_type).await
    }
}

/// Summary of one completed delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub target: DeliveryTarget,
    pub rows: usize,
    pub bytes: usize,
}

/// Encodes results and hands them to a [`Sink`]
#[derive(Clone)]
pub struct SinkWriter {
    sink: Arc<dyn Sink>,
    timeout: Option<Duration>,
}

impl SinkWriter {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self {
            sink,
            timeout: None,
        }
    }

    /// Fail deliveries that take longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Serialize `result` as `format` and deliver it to `target`
    ///
    /// # Errors
    /// - [`ExtractError::Serialization`] if encoding fails
    /// - [`ExtractError::Delivery`] if the write fails or times out
    pub async fn write(
        &self,
        result: &ExtractionResult,
        target: &DeliveryTarget,
        format: Format,
    ) -> Result<Delivery> {
        let payload = format.encode(result)?;
        let bytes = payload.len();
        log::debug!("Encoded {} row(s) as {} ({} bytes)", result.len(), format, bytes);

        let put = self.sink.put(target, payload, format.content_type());
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, put).await.map_err(|_| {
                ExtractError::Delivery(format!("{}: timed out after {:?}", target, limit))
            })??,
            None => put.await?,
        }

        Ok(Delivery {
            target: target.clone(),
            rows: result.len(),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Cell, Column, ColumnKind};
    use crate::error::ErrorKind;

    fn one_row() -> ExtractionResult {
        let mut result = ExtractionResult::new(vec![Column::new("id", ColumnKind::Int)]);
        result.push_row(vec![Cell::Int(1)]).unwrap();
        result
    }

    #[tokio::test]
    async fn test_write_to_memory_landing() {
        let landing = Landing::memory();
        let writer = SinkWriter::new(Arc::new(landing.clone()));
        let target = landing.target("src", "orders", Format::Csv);

        let delivery = writer.write(&one_row(), &target, Format::Csv).await.unwrap();
        assert_eq!(delivery.rows, 1);
        assert_eq!(delivery.bytes, "id\n1\n".len());

        let stored = landing
            .store()
            .get(target.path())
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(&stored[..], b"id\n1\n");
    }

    struct StuckSink;

    #[async_trait]
    impl Sink for StuckSink {
        async fn put(&self, _: &DeliveryTarget, _: Vec<u8>, _: &'static str) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_delivery_error() {
        let writer = SinkWriter::new(Arc::new(StuckSink)).with_timeout(Some(Duration::from_secs(5)));
        let target = Landing::memory().target("src", "orders", Format::Json);

        let err = writer
            .write(&one_row(), &target, Format::Json)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Delivery);
    }
}
