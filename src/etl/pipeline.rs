//! Run orchestration
//!
//! Every configured table moves through the same state machine:
//!
//! ```text
//! Init -> WatermarkRead -> QueryBuilt -> Executed -> EmptySkip
//!                                                 -> Delivered -> Done
//!                                                              -> WatermarkCommitted
//! ```
//!
//! Full tables skip `WatermarkRead` and always finish in `Done`. The
//! watermark is only committed after the delivery is durable, so a crash in
//! between redelivers the same rows on the next run rather than losing them.

use super::report::{RunSummary, Step, TableOutcome, TableReport};
use super::{Connector, Query, Session, Sink, SinkWriter, build, execute};
use crate::config::{SourceConfig, TableConfig, validate_sources};
use crate::data::Cell;
use crate::error::{ExtractError, Result};
use crate::format::Format;
use crate::storage::{DeliveryTarget, Landing};
use crate::watermark::{CreateOutcome, WatermarkRecord, WatermarkStore};
use futures::stream::{self, StreamExt};
use object_store::path::Path as ObjectPath;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(120);

/// States of one table's extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Init,
    WatermarkRead,
    QueryBuilt,
    Executed,
    EmptySkip,
    Delivered,
    Done,
    WatermarkCommitted,
}

/// Logs each transition of one table
struct Progress<'a> {
    source: &'a str,
    table: &'a str,
    state: TableState,
}

impl<'a> Progress<'a> {
    fn new(source: &'a str, table: &'a str) -> Self {
        Self {
            source,
            table,
            state: TableState::Init,
        }
    }

    fn advance(&mut self, next: TableState) {
        log::debug!(
            "{}.{}: {:?} -> {:?}",
            self.source,
            self.table,
            self.state,
            next
        );
        self.state = next;
    }
}

fn at(step: Step) -> impl FnOnce(ExtractError) -> (Step, ExtractError) {
    move |error| (step, error)
}

/// A query as it would run, for dry runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedQuery {
    pub source: String,
    pub table: String,
    pub query: Query,
}

/// Extracts configured tables into the landing zone
///
/// # Example
/// ```no_run
/// use landing_zone::config::{SourceConfig, TableConfig};
/// use landing_zone::etl::Pipeline;
/// use landing_zone::source::PostgresConnector;
/// use landing_zone::storage::Landing;
/// use landing_zone::watermark::MemoryWatermarkStore;
/// use std::sync::Arc;
///
/// # async fn example() -> landing_zone::error::Result<()> {
/// let sources = vec![SourceConfig::new(
///     "shop",
///     vec![TableConfig::incremental("orders", "updated_at")],
/// )
/// .with_param("host", "localhost")];
///
/// let pipeline = Pipeline::new(
///     PostgresConnector::default(),
///     Arc::new(MemoryWatermarkStore::new()),
///     Landing::memory(),
/// );
/// let summary = pipeline.run(&sources).await?;
/// println!("{}", summary);
/// # Ok(())
/// # }
/// ```
pub struct Pipeline<C> {
    connector: C,
    store: Arc<dyn WatermarkStore>,
    writer: SinkWriter,
    prefix: ObjectPath,
    format: Format,
    parallelism: usize,
    query_timeout: Option<Duration>,
}

impl<C> Pipeline<C>
where
    C: Connector,
{
    /// Create a pipeline delivering into `landing`
    pub fn new(connector: C, store: Arc<dyn WatermarkStore>, landing: Landing) -> Self {
        let prefix = landing.prefix().clone();
        Self::with_sink(connector, store, Arc::new(landing), prefix)
    }

    /// Create a pipeline delivering to any [`Sink`], targets rooted at `prefix`
    pub fn with_sink(
        connector: C,
        store: Arc<dyn WatermarkStore>,
        sink: Arc<dyn Sink>,
        prefix: ObjectPath,
    ) -> Self {
        Self {
            connector,
            store,
            writer: SinkWriter::new(sink).with_timeout(Some(DEFAULT_DELIVERY_TIMEOUT)),
            prefix,
            format: Format::default(),
            parallelism: 1,
            query_timeout: Some(DEFAULT_QUERY_TIMEOUT),
        }
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Number of tables extracted concurrently, each on its own connection
    ///
    /// `1` (the default) extracts sequentially over one connection per source.
    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn delivery_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.writer = self.writer.with_timeout(timeout);
        self
    }

    /// Extract every configured table once
    ///
    /// Table failures are reported in the summary and never abort the run.
    ///
    /// # Errors
    /// [`ExtractError::Config`] if the configuration is invalid, before any
    /// source is contacted
    pub async fn run(&self, sources: &[SourceConfig]) -> Result<RunSummary> {
        validate_sources(sources)?;
        let started = tokio::time::Instant::now();

        let reports = if self.parallelism > 1 {
            let units = sources
                .iter()
                .flat_map(|source| source.tables.iter().map(move |table| (source, table)));
            stream::iter(units)
                .map(|(source, table)| self.extract_isolated(source, table))
                .buffered(self.parallelism)
                .collect::<Vec<_>>()
                .await
        } else {
            let mut reports = Vec::new();
            for source in sources {
                reports.extend(self.extract_source(source).await);
            }
            reports
        };

        let summary = RunSummary {
            reports,
            elapsed: started.elapsed(),
        };
        log::info!("Run finished: {}", summary);
        Ok(summary)
    }

    /// Queries the next run would execute, reading but never writing watermarks
    ///
    /// # Errors
    /// Config errors, or [`ExtractError::StoreUnavailable`] if a watermark
    /// cannot be read
    pub async fn plan(&self, sources: &[SourceConfig]) -> Result<Vec<PlannedQuery>> {
        validate_sources(sources)?;

        let mut planned = Vec::new();
        for source in sources {
            for table in &source.tables {
                let watermark = match &table.incremental_column {
                    Some(column) if table.is_incremental() => self
                        .store
                        .get(&source.name, &table.name)
                        .await?
                        .and_then(|record| record.value_for(column).map(str::to_string)),
                    _ => None,
                };
                planned.push(PlannedQuery {
                    source: source.name.clone(),
                    table: table.name.clone(),
                    query: build(table, watermark.as_deref()),
                });
            }
        }
        Ok(planned)
    }

    /// All tables of one source over a single session
    async fn extract_source(&self, source: &SourceConfig) -> Vec<TableReport> {
        log::info!(
            "Extracting source '{}' ({} table(s))",
            source.name,
            source.tables.len()
        );

        let session = match self.connector.connect(source).await {
            Ok(session) => session,
            Err(error) => {
                log::error!("Could not connect to source '{}': {}", source.name, error);
                return source
                    .tables
                    .iter()
                    .map(|table| report(source, table, TableOutcome::failed(Step::Connect, &error)))
                    .collect();
            }
        };

        let mut reports = Vec::with_capacity(source.tables.len());
        for table in &source.tables {
            reports.push(self.extract_table(source, table, &session).await);
        }
        reports
    }

    /// One table over a connection of its own
    async fn extract_isolated(&self, source: &SourceConfig, table: &TableConfig) -> TableReport {
        match self.connector.connect(source).await {
            Ok(session) => self.extract_table(source, table, &session).await,
            Err(error) => {
                log::error!(
                    "{}.{}: could not connect: {}",
                    source.name,
                    table.name,
                    error
                );
                report(source, table, TableOutcome::failed(Step::Connect, &error))
            }
        }
    }

    async fn extract_table<S>(
        &self,
        source: &SourceConfig,
        table: &TableConfig,
        session: &S,
    ) -> TableReport
    where
        S: Session + ?Sized,
    {
        let outcome = match self.advance_table(source, table, session).await {
            Ok(outcome) => outcome,
            Err((step, error)) => {
                log::error!(
                    "{}.{}: failed during {} ({}): {}",
                    source.name,
                    table.name,
                    step,
                    error.kind(),
                    error
                );
                TableOutcome::failed(step, &error)
            }
        };
        report(source, table, outcome)
    }

    async fn advance_table<S>(
        &self,
        source: &SourceConfig,
        table: &TableConfig,
        session: &S,
    ) -> std::result::Result<TableOutcome, (Step, ExtractError)>
    where
        S: Session + ?Sized,
    {
        let mut progress = Progress::new(&source.name, &table.name);

        let created = self
            .store
            .create(&source.name, &table.name, &WatermarkRecord::method(table.method))
            .await
            .map_err(at(Step::Init))?;
        if created == CreateOutcome::Created {
            log::debug!("{}.{}: registered as {}", source.name, table.name, table.method);
        }

        let previous = match &table.incremental_column {
            Some(column) if table.is_incremental() => {
                let record = self
                    .store
                    .get(&source.name, &table.name)
                    .await
                    .map_err(at(Step::WatermarkRead))?;
                progress.advance(TableState::WatermarkRead);
                record.and_then(|record| {
                    let value = record.value_for(column).map(str::to_string);
                    if value.is_none()
                        && let Some(stored) = &record.incremental_key
                        && record.latest_updated_value.is_some()
                    {
                        log::warn!(
                            "{}.{}: watermark was taken from '{}', reloading in full on '{}'",
                            source.name,
                            table.name,
                            stored,
                            column
                        );
                    }
                    value
                })
            }
            _ => None,
        };

        let query = build(table, previous.as_deref());
        progress.advance(TableState::QueryBuilt);
        log::info!("{}.{}: {}", source.name, table.name, query);

        let result = execute(session, &query, self.query_timeout)
            .await
            .map_err(at(Step::Execute))?;
        progress.advance(TableState::Executed);

        if result.is_empty() {
            progress.advance(TableState::EmptySkip);
            log::info!("{}.{}: no new rows", source.name, table.name);
            return Ok(TableOutcome::Empty);
        }

        let target = DeliveryTarget::generate(&self.prefix, &source.name, &table.name, self.format);
        let delivery = self
            .writer
            .write(&result, &target, self.format)
            .await
            .map_err(at(Step::Deliver))?;
        progress.advance(TableState::Delivered);
        log::info!(
            "{}.{}: delivered {} row(s) to {}",
            source.name,
            table.name,
            delivery.rows,
            delivery.target
        );

        let column = match &table.incremental_column {
            Some(column) if table.is_incremental() => column,
            _ => {
                progress.advance(TableState::Done);
                return Ok(TableOutcome::Delivered {
                    delivery,
                    watermark: None,
                });
            }
        };

        let max = result.max_of(column).map_err(at(Step::WatermarkCommit))?;
        let Some(max) = max.filter(|max| advances(max, previous.as_deref())) else {
            log::warn!(
                "{}.{}: no value of '{}' beyond the stored watermark, leaving it unchanged",
                source.name,
                table.name,
                column
            );
            progress.advance(TableState::Done);
            return Ok(TableOutcome::Delivered {
                delivery,
                watermark: None,
            });
        };

        let watermark = max.to_string();
        self.store
            .update(
                &source.name,
                &table.name,
                &WatermarkRecord::committed(&watermark, column),
            )
            .await
            .map_err(at(Step::WatermarkCommit))?;
        progress.advance(TableState::WatermarkCommitted);
        log::info!(
            "{}.{}: watermark {} = {}",
            source.name,
            table.name,
            column,
            watermark
        );

        Ok(TableOutcome::Delivered {
            delivery,
            watermark: Some(watermark),
        })
    }
}

/// Whether `max` lies strictly beyond the stored watermark
///
/// A stored value that does not parse as the column's kind cannot be compared
/// and does not block the commit.
fn advances(max: &Cell, previous: Option<&str>) -> bool {
    let (Some(previous), Some(kind)) = (previous, max.kind()) else {
        return true;
    };
    match Cell::parse_as(kind, previous) {
        Ok(previous) => max.compare(&previous) == Some(Ordering::Greater),
        Err(_) => true,
    }
}

fn report(source: &SourceConfig, table: &TableConfig, outcome: TableOutcome) -> TableReport {
    TableReport {
        source: source.name.clone(),
        table: table.name.clone(),
        method: table.method,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ColumnKind;

    #[test]
    fn test_advances_over_previous() {
        let max = Cell::parse_as(ColumnKind::Timestamp, "2024-01-15T10:00:00").unwrap();
        assert!(advances(&max, None));
        assert!(advances(&max, Some("2024-01-15T09:00:00")));
        assert!(!advances(&max, Some("2024-01-15T10:00:00")));
        assert!(!advances(&max, Some("2024-02-01")));
        assert!(advances(&max, Some("not a timestamp")));
    }

    #[test]
    fn test_advances_integers() {
        assert!(advances(&Cell::Int(11), Some("10")));
        assert!(!advances(&Cell::Int(9), Some("10")));
    }
}
