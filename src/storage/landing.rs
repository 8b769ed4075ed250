//! Object-store backed landing zone

use super::DeliveryTarget;
use crate::error::{ExtractError, Result};
use crate::format::Format;
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Where delivered files are written
///
/// Supported locations:
/// - `file:///data/landing`: local directory (created if missing)
/// - `az://<container>/<prefix>`: Azure Blob Storage, credentials from `AZURE_STORAGE_*`
/// - `s3://<bucket>/<prefix>`: Amazon S3 or compatible, credentials from `AWS_*`
/// - `memory://`: process-local, for tests
#[derive(Clone, Debug)]
pub struct Landing {
    store: Arc<dyn ObjectStore>,
    prefix: ObjectPath,
    /// Whether the backend accepts object attributes such as a content type
    attributes: bool,
    location: String,
}

fn config_error(url: &Url, e: impl fmt::Display) -> ExtractError {
    ExtractError::Config(format!("invalid landing location {}: {}", url, e))
}

impl Landing {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: ObjectPath, attributes: bool) -> Self {
        let location = format!("{}", store);
        Self {
            store,
            prefix,
            attributes,
            location,
        }
    }

    /// Process-local landing zone
    pub fn memory() -> Self {
        Self::new(Arc::new(InMemory::new()), ObjectPath::default(), true)
    }

    /// Open the landing zone described by `url`
    ///
    /// # Errors
    /// Returns a config error for unknown schemes or unusable locations
    pub fn from_url(url: &Url) -> Result<Self> {
        let prefix = || ObjectPath::from(url.path().trim_matches('/'));

        let landing = match url.scheme() {
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| config_error(url, "not a local path"))?;
                std::fs::create_dir_all(&path).map_err(|e| config_error(url, e))?;
                let store =
                    LocalFileSystem::new_with_prefix(&path).map_err(|e| config_error(url, e))?;
                Self::new(Arc::new(store), ObjectPath::default(), false)
            }
            "memory" => Self::memory(),
            "az" | "azure" | "abfs" | "abfss" => {
                let store = MicrosoftAzureBuilder::from_env()
                    .with_url(url.as_str())
                    .build()
                    .map_err(|e| config_error(url, e))?;
                Self::new(Arc::new(store), prefix(), true)
            }
            "s3" | "s3a" => {
                let store = AmazonS3Builder::from_env()
                    .with_url(url.as_str())
                    .build()
                    .map_err(|e| config_error(url, e))?;
                Self::new(Arc::new(store), prefix(), true)
            }
            other => {
                return Err(config_error(
                    url,
                    format!("unsupported scheme '{}'", other),
                ));
            }
        };

        log::debug!("Landing zone: {}", landing);
        Ok(landing)
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    pub fn prefix(&self) -> &ObjectPath {
        &self.prefix
    }

    /// Generate a unique target for one delivery
    pub fn target(&self, source: &str, table: &str, format: Format) -> DeliveryTarget {
        DeliveryTarget::generate(&self.prefix, source, table, format)
    }

    /// Durably write `payload` at `target`
    ///
    /// Targets are unique, so the write overwrites nothing in practice.
    pub async fn put(
        &self,
        target: &DeliveryTarget,
        payload: Vec<u8>,
        content_type: &'static str,
    ) -> Result<()> {
        let mut options = PutOptions::default();
        if self.attributes {
            let mut attributes = Attributes::new();
            attributes.insert(Attribute::ContentType, content_type.into());
            options.attributes = attributes;
        }

        self.store
            .put_opts(target.path(), PutPayload::from(payload), options)
            .await
            .map_err(|e| ExtractError::Delivery(format!("{}: {}", target, e)))?;
        Ok(())
    }
}

impl fmt::Display for Landing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefix.as_ref().is_empty() {
            write!(f, "{}", self.location)
        } else {
            write!(f, "{} ({})", self.location, self.prefix)
        }
    }
}
