//! Extraction from connected data sources

use super::Query;
use crate::config::SourceConfig;
use crate::data::ExtractionResult;
use crate::error::{ExtractError, Result};
use async_trait::async_trait;
use std::time::Duration;

/// An open connection to a data source
///
/// A session is owned by exactly one unit of work at a time and released by
/// dropping it.
///
/// # Example
/// ```no_run
/// use landing_zone::data::{Column, ColumnKind, ExtractionResult};
/// use landing_zone::error::Result;
/// use landing_zone::etl::{Query, Session};
/// use async_trait::async_trait;
///
/// struct EmptySession;
///
/// #[async_trait]
/// impl Session for EmptySession {
///     async fn query(&self, _query: &Query) -> Result<ExtractionResult> {
///         Ok(ExtractionResult::new(vec![Column::new("id", ColumnKind::Int)]))
///     }
/// }
/// ```
#[async_trait]
pub trait Session: Send + Sync {
    /// Run `query`, binding its parameters, and materialize every row
    ///
    /// # Errors
    /// [`ExtractError::Query`] on malformed SQL, connectivity loss or
    /// unsupported column types
    async fn query(&self, query: &Query) -> Result<ExtractionResult>;
}

/// Opens sessions for a configured source
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: Session;

    /// Connect using the source's connection parameters
    ///
    /// # Errors
    /// [`ExtractError::Connection`] if the source cannot be reached
    async fn connect(&self, source: &SourceConfig) -> Result<Self::Session>;
}

/// Execute `query` on `session`, failing with a query error after `timeout`
pub async fn execute<S>(
    session: &S,
    query: &Query,
    timeout: Option<Duration>,
) -> Result<ExtractionResult>
where
    S: Session + ?Sized,
{
    log::debug!("Executing: {}", query);

    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, session.query(query))
            .await
            .map_err(|_| {
                ExtractError::Query(format!(
                    "query on {} timed out after {:?}",
                    query.table(),
                    limit
                ))
            })??,
        None => session.query(query).await?,
    };

    log::debug!("Extracted {} row(s) from {}", result.len(), query.table());
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableConfig;
    use crate::error::ErrorKind;

    struct SlowSession;

    #[async_trait]
    impl Session for SlowSession {
        async fn query(&self, _query: &Query) -> Result<ExtractionResult> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ExtractionResult::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_query_error() {
        let query = super::super::query::build(&TableConfig::full("orders"), None);
        let err = execute(&SlowSession, &query, Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Query);
        assert!(err.to_string().contains("timed out"));
    }
}
