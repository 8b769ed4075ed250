//! Per-table outcomes and the end-of-run summary

use super::Delivery;
use crate::config::ExtractMethod;
use crate::error::{ErrorKind, ExtractError};
use std::fmt;
use std::time::Duration;

/// Step of a table's extraction that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Connect,
    Init,
    WatermarkRead,
    Execute,
    Deliver,
    WatermarkCommit,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Init => "init",
            Self::WatermarkRead => "watermark read",
            Self::Execute => "query",
            Self::Deliver => "delivery",
            Self::WatermarkCommit => "watermark commit",
        };
        f.write_str(name)
    }
}

/// Terminal result of one table's extraction
#[derive(Debug, Clone, PartialEq)]
pub enum TableOutcome {
    /// Rows were delivered; `watermark` is the committed value, if any
    Delivered {
        delivery: Delivery,
        watermark: Option<String>,
    },
    /// The query returned no rows; nothing was delivered or committed
    Empty,
    Failed {
        step: Step,
        kind: ErrorKind,
        message: String,
    },
}

impl TableOutcome {
    pub fn failed(step: Step, error: &ExtractError) -> Self {
        Self::Failed {
            step,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableReport {
    pub source: String,
    pub table: String,
    pub method: ExtractMethod,
    pub outcome: TableOutcome,
}

impl TableReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TableOutcome::Delivered { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, TableOutcome::Empty)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, TableOutcome::Failed { .. })
    }
}

impl fmt::Display for TableReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} ({}): ", self.source, self.table, self.method)?;
        match &self.outcome {
            TableOutcome::Delivered {
                delivery,
                watermark,
            } => {
                write!(f, "delivered {} row(s) to {}", delivery.rows, delivery.target)?;
                if let Some(watermark) = watermark {
                    write!(f, ", watermark {}", watermark)?;
                }
                Ok(())
            }
            TableOutcome::Empty => f.write_str("no new rows"),
            TableOutcome::Failed {
                step,
                kind,
                message,
            } => write!(f, "failed during {} ({}): {}", step, kind, message),
        }
    }
}

/// Outcome of a whole run, in configuration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub reports: Vec<TableReport>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.is_success()).count()
    }

    pub fn skipped(&self) -> usize {
        self.reports.iter().filter(|r| r.is_skipped()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.iter().filter(|r| r.is_failure()).count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    pub fn rows_delivered(&self) -> usize {
        self.reports
            .iter()
            .map(|r| match &r.outcome {
                TableOutcome::Delivered { delivery, .. } => delivery.rows,
                _ => 0,
            })
            .sum()
    }

    /// Report for one table, if it was part of the run
    pub fn get(&self, source: &str, table: &str) -> Option<&TableReport> {
        self.reports
            .iter()
            .find(|r| r.source == source && r.table == table)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} skipped, {} failed ({} row(s) in {:.1?})",
            self.succeeded(),
            self.skipped(),
            self.failed(),
            self.rows_delivered(),
            self.elapsed
        )
    }
}
