//! CLI helper functions

use crate::{
    config::{SourceConfig, load_sources},
    etl::{Pipeline, PlannedQuery, RunSummary},
    format::Format,
    source::PostgresConnector,
    storage::Landing,
    watermark::{StoredWatermark, WatermarkStore, open_store},
};
use eyre::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Options of the `run` command
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub format: Format,
    pub parallel: usize,
    pub query_timeout: Option<Duration>,
    pub delivery_timeout: Option<Duration>,
}

fn env_url(name: &str) -> Result<Url> {
    let value =
        std::env::var(name).with_context(|| format!("{} environment variable not set", name))?;
    Url::parse(&value).with_context(|| format!("Invalid {}: {}", name, value))
}

/// Load the landing zone from environment variables
///
/// Expected environment variables:
/// - LANDING_URL: landing location, e.g. `file:///data/landing` or `az://raw/landing` (required)
/// - AZURE_STORAGE_*/AWS_*: object store credentials for remote locations
pub fn load_landing() -> Result<Landing> {
    let url = env_url("LANDING_URL")?;
    Landing::from_url(&url).context("Failed to open landing zone")
}

/// Load the watermark store from environment variables
///
/// Expected environment variables:
/// - WATERMARK_URL: `file:///path/watermarks.json` or an Azure Table URL (required)
/// - AZURE_TABLE_SAS_TOKEN: SAS token for the Azure Table (optional)
pub fn load_watermark_store() -> Result<Arc<dyn WatermarkStore>> {
    let url = env_url("WATERMARK_URL")?;
    let sas_token = std::env::var("AZURE_TABLE_SAS_TOKEN").ok();
    open_store(&url, sas_token).context("Failed to open watermark store")
}

fn read_sources<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<SourceConfig>> {
    let sources = load_sources(paths).context("Failed to load sources")?;
    log::info!(
        "Loaded {} source(s) with {} table(s)",
        sources.len(),
        sources.iter().map(|s| s.tables.len()).sum::<usize>()
    );
    Ok(sources)
}

fn pipeline(
    store: Arc<dyn WatermarkStore>,
    landing: Landing,
    options: &RunOptions,
) -> Pipeline<PostgresConnector> {
    Pipeline::new(PostgresConnector::default(), store, landing)
        .format(options.format)
        .parallelism(options.parallel)
        .query_timeout(options.query_timeout)
        .delivery_timeout(options.delivery_timeout)
}

/// Extract every table of the given sources files into the landing zone
pub async fn run_extraction<P: AsRef<Path>>(paths: &[P], options: &RunOptions) -> Result<RunSummary> {
    let sources = read_sources(paths)?;
    let store = load_watermark_store()?;
    let landing = load_landing()?;
    log::info!("Delivering {} files to {}", options.format, landing);

    pipeline(store, landing, options)
        .run(&sources)
        .await
        .context("Extraction aborted")
}

/// Queries a run would execute, without touching any source
pub async fn plan_extraction<P: AsRef<Path>>(
    paths: &[P],
    options: &RunOptions,
) -> Result<Vec<PlannedQuery>> {
    let sources = read_sources(paths)?;
    let store = load_watermark_store()?;

    pipeline(store, Landing::memory(), options)
        .plan(&sources)
        .await
        .context("Failed to plan extraction")
}

/// Parse and validate sources files, returning the number of tables
pub fn validate_files<P: AsRef<Path>>(paths: &[P]) -> Result<usize> {
    let sources = read_sources(paths)?;
    Ok(sources.iter().map(|s| s.tables.len()).sum())
}

/// Stored watermarks, optionally for one source
pub async fn list_watermarks(source: Option<&str>) -> Result<Vec<StoredWatermark>> {
    let store = load_watermark_store()?;
    store
        .list(source)
        .await
        .context("Failed to list watermarks")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_missing_landing_url() {
        unsafe { std::env::remove_var("LANDING_URL") };
        let err = load_landing().unwrap_err();
        assert!(err.to_string().contains("LANDING_URL"));
    }

    #[tokio::test]
    #[serial]
    async fn test_plan_reads_stored_watermark() {
        let temp = TempDir::new().unwrap();
        let watermarks = temp.path().join("watermarks.json");
        let sources = temp.path().join("sources.yml");
        std::fs::write(
            &sources,
            r#"
extractors:
  - name: shop
    config: { host: localhost }
    tables:
      - name: orders
        method: incremental
        incremental_column: updated_at
      - name: customers
        method: full
"#,
        )
        .unwrap();

        let url = Url::from_file_path(&watermarks).unwrap();
        unsafe { std::env::set_var("WATERMARK_URL", url.as_str()) };

        let store = load_watermark_store().unwrap();
        store
            .update(
                "shop",
                "orders",
                &crate::watermark::WatermarkRecord::committed("2024-01-15T10:00:00", "updated_at"),
            )
            .await
            .unwrap();

        let options = RunOptions {
            format: Format::Csv,
            parallel: 1,
            query_timeout: None,
            delivery_timeout: None,
        };
        let planned = plan_extraction(&[&sources], &options).await.unwrap();
        unsafe { std::env::remove_var("WATERMARK_URL") };

        assert_eq!(planned.len(), 2);
        assert_eq!(
            planned[0].query.to_string(),
            "SELECT * FROM orders WHERE updated_at > '2024-01-15T10:00:00'"
        );
        assert_eq!(planned[1].query.to_string(), "SELECT * FROM customers");
    }
}
