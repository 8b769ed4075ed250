//! In-memory tabular results
//!
//! An [`ExtractionResult`] is produced by a source session and consumed by the
//! sink writer and the watermark computation. It never outlives one table's
//! extraction.

use crate::error::{ExtractError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;

/// Logical type of a result column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Bool,
    Int,
    Float,
    /// Exact decimal, the scale may differ between values
    Decimal,
    Text,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Bytes,
    Json,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::Text => "text",
            Self::Date => "date",
            Self::Time => "time",
            Self::Timestamp => "timestamp",
            Self::TimestampTz => "timestamptz",
            Self::Bytes => "bytes",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}

/// A single value in a result row
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const TIME_FORMATS: [&str; 2] = ["%H:%M:%S%.f", "%H:%M"];

impl Cell {
    /// Kind of a non-null cell
    pub fn kind(&self) -> Option<ColumnKind> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ColumnKind::Bool),
            Self::Int(_) => Some(ColumnKind::Int),
            Self::Float(_) => Some(ColumnKind::Float),
            Self::Decimal(_) => Some(ColumnKind::Decimal),
            Self::Text(_) => Some(ColumnKind::Text),
            Self::Date(_) => Some(ColumnKind::Date),
            Self::Time(_) => Some(ColumnKind::Time),
            Self::Timestamp(_) => Some(ColumnKind::Timestamp),
            Self::TimestampTz(_) => Some(ColumnKind::TimestampTz),
            Self::Bytes(_) => Some(ColumnKind::Bytes),
            Self::Json(_) => Some(ColumnKind::Json),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Parse the textual form of a value (as stored in a watermark) into a cell of `kind`
    ///
    /// Accepts everything [`Cell`]'s `Display` produces, plus a bare date for
    /// timestamp kinds so the `1970-01-01` epoch sentinel binds against any
    /// temporal column.
    pub fn parse_as(kind: ColumnKind, value: &str) -> std::result::Result<Cell, String> {
        let value = value.trim();
        let invalid = || format!("'{}' is not a valid {} value", value, kind);

        match kind {
            ColumnKind::Text => Ok(Cell::Text(value.to_string())),
            ColumnKind::Int => value.parse().map(Cell::Int).map_err(|_| invalid()),
            ColumnKind::Float => value.parse().map(Cell::Float).map_err(|_| invalid()),
            ColumnKind::Bool => value.parse().map(Cell::Bool).map_err(|_| invalid()),
            ColumnKind::Decimal => value
                .parse::<Decimal>()
                .or_else(|_| Decimal::from_scientific(value))
                .map(Cell::Decimal)
                .map_err(|_| invalid()),
            ColumnKind::Time => TIME_FORMATS
                .iter()
                .find_map(|format| NaiveTime::parse_from_str(value, format).ok())
                .map(Cell::Time)
                .ok_or_else(invalid),
            ColumnKind::Date => NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .or_else(|| parse_naive_timestamp(value).map(|ts| ts.date()))
                .map(Cell::Date)
                .ok_or_else(invalid),
            ColumnKind::Timestamp => parse_naive_timestamp(value)
                .or_else(|| {
                    DateTime::parse_from_rfc3339(value)
                        .ok()
                        .map(|ts| ts.naive_utc())
                })
                .map(Cell::Timestamp)
                .ok_or_else(invalid),
            ColumnKind::TimestampTz => DateTime::parse_from_rfc3339(value)
                .map(|ts| ts.with_timezone(&Utc))
                .ok()
                .or_else(|| parse_naive_timestamp(value).map(|ts| ts.and_utc()))
                .map(Cell::TimestampTz)
                .ok_or_else(invalid),
            ColumnKind::Bytes | ColumnKind::Json => {
                Err(format!("{} values cannot be used as a boundary", kind))
            }
        }
    }

    /// Total order between two non-null cells of the same kind
    ///
    /// Returns `None` when either side is null or the kinds are not comparable.
    pub fn compare(&self, other: &Cell) -> Option<Ordering> {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Int(a), Self::Float(b)) => (*a as f64).partial_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Decimal(a), Self::Decimal(b)) => Some(a.cmp(b)),
            (Self::Decimal(a), Self::Int(b)) => Some(a.cmp(&Decimal::from(*b))),
            (Self::Int(a), Self::Decimal(b)) => Some(Decimal::from(*a).cmp(b)),
            (Self::Time(a), Self::Time(b)) => Some(a.cmp(b)),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (Self::TimestampTz(a), Self::TimestampTz(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

fn parse_naive_timestamp(value: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .map(|date| date.and_time(NaiveTime::MIN))
        })
}

/// Text coercion used by CSV output and by watermark persistence
impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Decimal(v) => write!(f, "{}", v),
            Self::Text(v) => f.write_str(v),
            Self::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Self::Time(v) => write!(f, "{}", v.format("%H:%M:%S%.f")),
            Self::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%dT%H:%M:%S%.f")),
            Self::TimestampTz(v) => f.write_str(&v.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Self::Bytes(v) => {
                f.write_str("\\x")?;
                v.iter().try_for_each(|b| write!(f, "{:02x}", b))
            }
            Self::Json(v) => write!(f, "{}", v),
        }
    }
}

/// A named, typed result column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Ordered columns plus rows aligned to them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionResult {
    columns: Vec<Column>,
    rows: Vec<Vec<Cell>>,
}

impl ExtractionResult {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row, rejecting rows whose arity does not match the columns
    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(ExtractError::Query(format!(
                "row has {} values but the result has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Largest non-null value of `column`, `None` when every value is null
    pub fn max_of(&self, column: &str) -> Result<Option<&Cell>> {
        let index = self.column_index(column).ok_or_else(|| {
            ExtractError::Query(format!("column '{}' is not part of the result", column))
        })?;

        let mut max: Option<&Cell> = None;
        for cell in self.rows.iter().map(|row| &row[index]) {
            if cell.is_null() {
                continue;
            }
            max = match max {
                None => Some(cell),
                Some(current) => match cell.compare(current) {
                    Some(Ordering::Greater) => Some(cell),
                    Some(_) => Some(current),
                    None => {
                        return Err(ExtractError::Query(format!(
                            "column '{}' holds values that cannot be ordered",
                            column
                        )));
                    }
                },
            };
        }
        Ok(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(value: &str) -> Cell {
        Cell::parse_as(ColumnKind::Timestamp, value).unwrap()
    }

    #[test]
    fn test_timestamp_text_form() {
        let cell = ts("2024-01-15 10:00:00");
        assert_eq!(cell.to_string(), "2024-01-15T10:00:00");

        let fractional = ts("2024-01-15T10:00:00.250");
        assert_eq!(fractional.to_string(), "2024-01-15T10:00:00.250");
    }

    #[test]
    fn test_epoch_sentinel_parses_for_temporal_kinds() {
        assert!(Cell::parse_as(ColumnKind::Timestamp, "1970-01-01").is_ok());
        assert!(Cell::parse_as(ColumnKind::TimestampTz, "1970-01-01").is_ok());
        assert!(Cell::parse_as(ColumnKind::Date, "1970-01-01").is_ok());
        assert!(Cell::parse_as(ColumnKind::Int, "1970-01-01").is_err());
    }

    #[test]
    fn test_timestamptz_round_trip_text() {
        let cell = Cell::parse_as(ColumnKind::TimestampTz, "2024-01-15T10:00:00+02:00").unwrap();
        assert_eq!(cell.to_string(), "2024-01-15T08:00:00Z");
        assert_eq!(
            Cell::parse_as(ColumnKind::TimestampTz, &cell.to_string()).unwrap(),
            cell
        );
    }

    #[test]
    fn test_max_of_skips_nulls_and_uses_typed_order() {
        let mut result = ExtractionResult::new(vec![
            Column::new("id", ColumnKind::Int),
            Column::new("updated_at", ColumnKind::Timestamp),
        ]);
        result
            .push_row(vec![Cell::Int(9), ts("2024-01-02T00:00:00")])
            .unwrap();
        result.push_row(vec![Cell::Int(10), Cell::Null]).unwrap();
        result
            .push_row(vec![Cell::Int(2), ts("2024-01-15T10:00:00")])
            .unwrap();

        let max = result.max_of("updated_at").unwrap().unwrap();
        assert_eq!(max.to_string(), "2024-01-15T10:00:00");

        // Numeric order, not lexical ("9" > "10" as text)
        assert_eq!(result.max_of("id").unwrap(), Some(&Cell::Int(10)));
        assert!(result.max_of("missing").is_err());
    }

    #[test]
    fn test_decimal_keeps_scale_and_orders_numerically() {
        let price = Cell::parse_as(ColumnKind::Decimal, "1234.50").unwrap();
        assert_eq!(price.to_string(), "1234.50");
        assert_eq!(Cell::parse_as(ColumnKind::Decimal, &price.to_string()).unwrap(), price);

        let small = Cell::parse_as(ColumnKind::Decimal, "999.999").unwrap();
        assert_eq!(price.compare(&small), Some(Ordering::Greater));
        assert_eq!(price.compare(&Cell::Int(1234)), Some(Ordering::Greater));
        assert!(Cell::parse_as(ColumnKind::Decimal, "12,5").is_err());
    }

    #[test]
    fn test_time_text_form() {
        let cell = Cell::parse_as(ColumnKind::Time, "08:30:00.5").unwrap();
        assert_eq!(cell.to_string(), "08:30:00.500");
        assert_eq!(Cell::parse_as(ColumnKind::Time, "08:30").unwrap().to_string(), "08:30:00");
        assert_eq!(
            cell.compare(&Cell::parse_as(ColumnKind::Time, "08:29:59").unwrap()),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_max_of_all_null() {
        let mut result = ExtractionResult::new(vec![Column::new("v", ColumnKind::Int)]);
        result.push_row(vec![Cell::Null]).unwrap();
        assert_eq!(result.max_of("v").unwrap(), None);
    }

    #[test]
    fn test_push_row_arity() {
        let mut result = ExtractionResult::new(vec![Column::new("v", ColumnKind::Int)]);
        assert!(result.push_row(vec![Cell::Int(1), Cell::Int(2)]).is_err());
        assert!(result.is_empty());
    }
}
