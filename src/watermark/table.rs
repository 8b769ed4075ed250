//! Azure Table Storage watermark store
//!
//! Talks to the Table service REST API directly. Authentication is a SAS
//! token carried in the URL query, so no request signing is needed.
//!
//! | operation | request                                             |
//! |-----------|-----------------------------------------------------|
//! | get       | `GET {table}(PartitionKey='s',RowKey='t')`          |
//! | create    | `POST {table}` (409 means the entity exists)        |
//! | update    | `MERGE {table}(PartitionKey='s',RowKey='t')`        |
//! | list      | `GET {table}()` following continuation headers      |

use super::{CreateOutcome, StoredWatermark, WatermarkRecord, WatermarkStore};
use crate::error::{ExtractError, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const API_VERSION: &str = "2019-02-02";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Watermarks stored as entities of one Azure table
///
/// Partition key is the source name, row key the table name.
#[derive(Clone, Debug)]
pub struct TableWatermarkStore {
    client: Client,
    /// Service endpoint with the table segment removed
    endpoint: Url,
    table: String,
    sas_token: Option<String>,
}

#[derive(Serialize)]
struct EntityBody<'a> {
    #[serde(rename = "PartitionKey")]
    partition_key: &'a str,
    #[serde(rename = "RowKey")]
    row_key: &'a str,
    #[serde(flatten)]
    record: &'a WatermarkRecord,
}

#[derive(Deserialize)]
struct Entity {
    #[serde(rename = "PartitionKey")]
    partition_key: String,
    #[serde(rename = "RowKey")]
    row_key: String,
    #[serde(flatten)]
    record: WatermarkRecord,
}

#[derive(Deserialize)]
struct EntityPage {
    #[serde(default)]
    value: Vec<Entity>,
}

/// Quote a key for use inside an entity address
fn quote_key(key: &str) -> String {
    format!("'{}'", key.replace('\'', "''"))
}

fn unavailable(action: &str, e: impl std::fmt::Display) -> ExtractError {
    ExtractError::StoreUnavailable(format!("table storage {} failed: {}", action, e))
}

impl TableWatermarkStore {
    /// Create a store from the table URL, e.g.
    /// `https://account.table.core.windows.net/pipelinesources`
    ///
    /// A SAS token may be part of `table_url` or passed separately; an
    /// explicit `sas_token` wins.
    ///
    /// # Errors
    /// Returns a config error if the URL has no table segment or the HTTP
    /// client cannot be built
    pub fn try_new(table_url: Url, sas_token: Option<String>) -> Result<Self> {
        let table = table_url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            .map(str::to_string)
            .ok_or_else(|| {
                ExtractError::Config(format!("no table name in watermark URL {}", table_url))
            })?;

        let sas_token = sas_token
            .or_else(|| table_url.query().map(str::to_string))
            .map(|token| token.trim_start_matches('?').to_string())
            .filter(|token| !token.is_empty());

        let mut endpoint = table_url.clone();
        endpoint.set_query(None);
        endpoint
            .path_segments_mut()
            .map_err(|_| ExtractError::Config(format!("invalid table URL {}", table_url)))?
            .pop_if_empty()
            .pop();

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-ms-version", API_VERSION.parse().map_err(config_error)?);
        headers.insert(
            reqwest::header::ACCEPT,
            "application/json;odata=nometadata"
                .parse()
                .map_err(config_error)?,
        );
        headers.insert("dataserviceversion", "3.0;NetFx".parse().map_err(config_error)?);
        let client = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(config_error)?;

        Ok(Self {
            client,
            endpoint,
            table,
            sas_token,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn url_for(&self, segment: &str) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ExtractError::Config(format!("invalid table URL {}", self.endpoint)))?
            .pop_if_empty()
            .push(segment);
        url.set_query(self.sas_token.as_deref());
        Ok(url)
    }

    fn entity_url(&self, source: &str, table: &str) -> Result<Url> {
        self.url_for(&format!(
            "{}(PartitionKey={},RowKey={})",
            self.table,
            quote_key(source),
            quote_key(table)
        ))
    }

    async fn send(&self, action: &str, request: RequestBuilder) -> Result<Response> {
        request.send().await.map_err(|e| unavailable(action, e))
    }

    async fn fail(action: &str, response: Response) -> ExtractError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        unavailable(action, format!("{}: {}", status, body))
    }
}

fn config_error(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Config(format!("failed to build table storage client: {}", e))
}

#[async_trait]
impl WatermarkStore for TableWatermarkStore {
    async fn get(&self, source: &str, table: &str) -> Result<Option<WatermarkRecord>> {
        let url = self.entity_url(source, table)?;
        log::debug!("Reading watermark {}/{}", source, table);

        let response = self.send("get", self.client.get(url)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let entity: Entity = response.json().await.map_err(|e| unavailable("get", e))?;
                Ok(Some(entity.record))
            }
            _ => Err(Self::fail("get", response).await),
        }
    }

    async fn create(
        &self,
        source: &str,
        table: &str,
        attrs: &WatermarkRecord,
    ) -> Result<CreateOutcome> {
        let url = self.url_for(&self.table)?;
        let body = EntityBody {
            partition_key: source,
            row_key: table,
            record: attrs,
        };

        let request = self
            .client
            .post(url)
            .header("Prefer", "return-no-content")
            .json(&body);
        let response = self.send("create", request).await?;
        match response.status() {
            StatusCode::CONFLICT => Ok(CreateOutcome::AlreadyExists),
            status if status.is_success() => Ok(CreateOutcome::Created),
            _ => Err(Self::fail("create", response).await),
        }
    }

    async fn update(&self, source: &str, table: &str, attrs: &WatermarkRecord) -> Result<()> {
        let url = self.entity_url(source, table)?;
        let body = EntityBody {
            partition_key: source,
            row_key: table,
            record: attrs,
        };

        // MERGE without If-Match is insert-or-merge
        let merge = Method::from_bytes(b"MERGE").map_err(|e| unavailable("update", e))?;
        let response = self
            .send("update", self.client.request(merge, url).json(&body))
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::fail("update", response).await)
        }
    }

    async fn list(&self, source: Option<&str>) -> Result<Vec<StoredWatermark>> {
        let url = self.url_for(&format!("{}()", self.table))?;
        let filter = source.map(|s| format!("PartitionKey eq {}", quote_key(s)));

        let mut rows = Vec::new();
        let mut continuation: Option<(String, Option<String>)> = None;
        loop {
            let mut query: Vec<(&str, String)> = Vec::new();
            if let Some(filter) = &filter {
                query.push(("$filter", filter.clone()));
            }
            if let Some((partition, row)) = &continuation {
                query.push(("NextPartitionKey", partition.clone()));
                if let Some(row) = row {
                    query.push(("NextRowKey", row.clone()));
                }
            }

            let response = self
                .send("list", self.client.get(url.clone()).query(&query))
                .await?;
            if !response.status().is_success() {
                return Err(Self::fail("list", response).await);
            }

            let (next_partition, next_row) = {
                let header = |name: &str| {
                    response
                        .headers()
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                };
                (
                    header("x-ms-continuation-NextPartitionKey"),
                    header("x-ms-continuation-NextRowKey"),
                )
            };

            let page: EntityPage = response.json().await.map_err(|e| unavailable("list", e))?;
            rows.extend(page.value.into_iter().map(|entity| StoredWatermark {
                source: entity.partition_key,
                table: entity.row_key,
                record: entity.record,
            }));

            match next_partition {
                Some(partition) => continuation = Some((partition, next_row)),
                None => break,
            }
        }
        Ok(rows)
    }
}
