//! In-memory source for tests and dry runs
//!
//! Evaluates the same projection and boundary predicate a database would,
//! over rows seeded per (source, table).

use crate::config::SourceConfig;
use crate::data::{Cell, ExtractionResult};
use crate::error::{ExtractError, Result};
use crate::etl::{Connector, Query, Session};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Default)]
struct State {
    tables: HashMap<(String, String), ExtractionResult>,
    unreachable: HashSet<String>,
    failing: HashSet<(String, String)>,
    executed: Vec<String>,
}

/// Tables held in memory, keyed by (source, table)
#[derive(Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<State>>,
    connects: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the contents of a table
    pub fn insert_table(&self, source: &str, table: &str, result: ExtractionResult) {
        self.state()
            .tables
            .insert((source.to_string(), table.to_string()), result);
    }

    /// Append rows to an existing table
    pub fn append_rows(&self, source: &str, table: &str, rows: Vec<Vec<Cell>>) -> Result<()> {
        let mut state = self.state();
        let existing = state
            .tables
            .get_mut(&(source.to_string(), table.to_string()))
            .ok_or_else(|| ExtractError::Query(format!("relation \"{}\" does not exist", table)))?;
        rows.into_iter().try_for_each(|row| existing.push_row(row))
    }

    /// Make every connection attempt to `source` fail
    pub fn set_unreachable(&self, source: &str) {
        self.state().unreachable.insert(source.to_string());
    }

    /// Make every query against `table` fail
    pub fn fail_queries(&self, source: &str, table: &str) {
        self.state()
            .failing
            .insert((source.to_string(), table.to_string()));
    }

    /// Rendered form of every query executed so far
    pub fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    /// Number of sessions opened so far
    pub fn connects(&self) -> usize {
        self.connects.load(AtomicOrdering::SeqCst)
    }

    /// Number of sessions currently open
    pub fn open_sessions(&self) -> usize {
        self.open.load(AtomicOrdering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Session = MemorySession;

    async fn connect(&self, source: &SourceConfig) -> Result<MemorySession> {
        if self.state().unreachable.contains(&source.name) {
            return Err(ExtractError::Connection(format!(
                "source '{}' is unreachable",
                source.name
            )));
        }
        self.connects.fetch_add(1, AtomicOrdering::SeqCst);
        self.open.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(MemorySession {
            source: source.name.clone(),
            connector: self.clone(),
        })
    }
}

/// Session over a [`MemoryConnector`]
pub struct MemorySession {
    source: String,
    connector: MemoryConnector,
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.connector.open.fetch_sub(1, AtomicOrdering::SeqCst);
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn query(&self, query: &Query) -> Result<ExtractionResult> {
        let mut state = self.connector.state();
        state.executed.push(query.to_string());

        let key = (self.source.clone(), query.table().to_string());
        if state.failing.contains(&key) {
            return Err(ExtractError::Query(format!(
                "{}: canceling statement due to statement timeout",
                query.table()
            )));
        }

        let table = state.tables.get(&key).ok_or_else(|| {
            ExtractError::Query(format!("relation \"{}\" does not exist", query.table()))
        })?;
        evaluate(table, query)
    }
}

fn evaluate(table: &ExtractionResult, query: &Query) -> Result<ExtractionResult> {
    let missing = |name: &str| ExtractError::Query(format!("column \"{}\" does not exist", name));

    let projection = match query.columns() {
        Some(columns) => columns
            .iter()
            .map(|name| table.column_index(name).ok_or_else(|| missing(name)))
            .collect::<Result<Vec<_>>>()?,
        None => (0..table.columns().len()).collect(),
    };

    let predicate = match query.boundary() {
        Some(boundary) => {
            let index = table
                .column_index(&boundary.column)
                .ok_or_else(|| missing(&boundary.column))?;
            let bound = Cell::parse_as(table.columns()[index].kind, &boundary.value)
                .map_err(ExtractError::Query)?;
            Some((index, bound))
        }
        None => None,
    };

    let mut result = ExtractionResult::new(
        projection
            .iter()
            .map(|&i| table.columns()[i].clone())
            .collect(),
    );
    for row in table.rows() {
        if let Some((index, bound)) = &predicate
            && row[*index].compare(bound) != Some(Ordering::Greater)
        {
            continue;
        }
        result.push_row(projection.iter().map(|&i| row[i].clone()).collect())?;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableConfig;
    use crate::data::{Column, ColumnKind};
    use crate::etl::query;

    fn orders() -> ExtractionResult {
        let mut result = ExtractionResult::new(vec![
            Column::new("id", ColumnKind::Int),
            Column::new("updated_at", ColumnKind::Timestamp),
        ]);
        for (id, ts) in [(1, "2024-01-10T00:00:00"), (2, "2024-01-15T10:00:00")] {
            result
                .push_row(vec![
                    Cell::Int(id),
                    Cell::parse_as(ColumnKind::Timestamp, ts).unwrap(),
                ])
                .unwrap();
        }
        result.push_row(vec![Cell::Int(3), Cell::Null]).unwrap();
        result
    }

    #[tokio::test]
    async fn test_strict_boundary_excludes_equal_and_null() {
        let connector = MemoryConnector::new();
        connector.insert_table("src", "orders", orders());
        let session = connector
            .connect(&SourceConfig::new("src", vec![]))
            .await
            .unwrap();

        let table = TableConfig::incremental("orders", "updated_at");
        let all = session.query(&query::build(&table, None)).await.unwrap();
        assert_eq!(all.len(), 3);

        let newer = session
            .query(&query::build(&table, Some("2024-01-10T00:00:00")))
            .await
            .unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer.rows()[0][0], Cell::Int(2));

        let none = session
            .query(&query::build(&table, Some("2024-01-15T10:00:00")))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_projection_and_missing_column() {
        let connector = MemoryConnector::new();
        connector.insert_table("src", "orders", orders());
        let session = connector
            .connect(&SourceConfig::new("src", vec![]))
            .await
            .unwrap();

        let projected = session
            .query(&query::build(
                &TableConfig::full("orders").with_columns(["updated_at"]),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(projected.columns().len(), 1);
        assert_eq!(projected.columns()[0].name, "updated_at");

        let err = session
            .query(&query::build(
                &TableConfig::full("orders").with_columns(["nope"]),
                None,
            ))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_sessions_are_released_on_drop() {
        let connector = MemoryConnector::new();
        let session = connector
            .connect(&SourceConfig::new("src", vec![]))
            .await
            .unwrap();
        assert_eq!(connector.open_sessions(), 1);
        drop(session);
        assert_eq!(connector.open_sessions(), 0);
        assert_eq!(connector.connects(), 1);
    }
}
