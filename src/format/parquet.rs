use crate::data::{Cell, ColumnKind, ExtractionResult};
use crate::error::{ExtractError, Result};
use ::parquet::arrow::ArrowWriter;
use ::parquet::basic::Compression;
use ::parquet::file::properties::WriterProperties;
use arrow_array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Date32Array, Decimal128Array, Float64Array,
    Int64Array, RecordBatch, StringArray, Time64MicrosecondArray, TimestampMicrosecondArray,
};
use arrow_schema::{Field, Schema};
use chrono::{Datelike, Timelike};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Days from 0001-01-01 to 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

const DECIMAL_PRECISION: u8 = 38;

fn serialization_error(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Serialization(format!("parquet: {}", e))
}

/// Collect one column's values, rejecting cells of another kind
fn collect<'a, T>(
    name: &str,
    kind: ColumnKind,
    cells: impl Iterator<Item = &'a Cell>,
    convert: impl Fn(&'a Cell) -> Option<T>,
) -> Result<Vec<Option<T>>> {
    cells
        .map(|cell| {
            if cell.is_null() {
                return Ok(None);
            }
            convert(cell).map(Some).ok_or_else(|| {
                serialization_error(format!(
                    "column '{}' declared {} holds {:?}",
                    name, kind, cell
                ))
            })
        })
        .collect()
}

/// Unscaled value of `value` at `scale`, which is at least its own scale
fn rescaled(column: &str, value: Decimal, scale: u32) -> Result<i128> {
    let limit = 10i128.pow(DECIMAL_PRECISION as u32);
    10i128
        .checked_pow(scale - value.scale())
        .and_then(|factor| value.mantissa().checked_mul(factor))
        .filter(|units| units.abs() < limit)
        .ok_or_else(|| {
            serialization_error(format!(
                "column '{}': {} does not fit decimal({}, {})",
                column, value, DECIMAL_PRECISION, scale
            ))
        })
}

fn build_array(result: &ExtractionResult, index: usize) -> Result<ArrayRef> {
    let column = &result.columns()[index];
    let (name, kind) = (column.name.as_str(), column.kind);
    let cells = || result.rows().iter().map(move |row| &row[index]);

    let array: ArrayRef = match kind {
        ColumnKind::Bool => Arc::new(BooleanArray::from(collect(name, kind, cells(), |c| {
            match c {
                Cell::Bool(v) => Some(*v),
                _ => None,
            }
        })?)),
        ColumnKind::Int => Arc::new(Int64Array::from(collect(name, kind, cells(), |c| {
            match c {
                Cell::Int(v) => Some(*v),
                _ => None,
            }
        })?)),
        ColumnKind::Float => Arc::new(Float64Array::from(collect(name, kind, cells(), |c| {
            match c {
                Cell::Float(v) => Some(*v),
                Cell::Int(v) => Some(*v as f64),
                _ => None,
            }
        })?)),
        ColumnKind::Decimal => {
            let values = collect(name, kind, cells(), |c| match c {
                Cell::Decimal(v) => Some(*v),
                Cell::Int(v) => Some(Decimal::from(*v)),
                _ => None,
            })?;
            // one scale per column, wide enough for every value
            let scale = values.iter().flatten().map(Decimal::scale).max().unwrap_or(0);
            let units = values
                .into_iter()
                .map(|v| v.map(|v| rescaled(name, v, scale)).transpose())
                .collect::<Result<Vec<_>>>()?;
            Arc::new(
                Decimal128Array::from(units)
                    .with_precision_and_scale(DECIMAL_PRECISION, scale as i8)
                    .map_err(serialization_error)?,
            )
        }
        ColumnKind::Time => Arc::new(Time64MicrosecondArray::from(collect(
            name,
            kind,
            cells(),
            |c| match c {
                Cell::Time(v) => Some(
                    i64::from(v.num_seconds_from_midnight()) * 1_000_000
                        + i64::from(v.nanosecond()) / 1_000,
                ),
                _ => None,
            },
        )?)),
        ColumnKind::Text => Arc::new(StringArray::from(collect(name, kind, cells(), |c| {
            match c {
                Cell::Text(v) => Some(v.clone()),
                _ => None,
            }
        })?)),
        ColumnKind::Json => Arc::new(StringArray::from(collect(name, kind, cells(), |c| {
            match c {
                Cell::Json(v) => Some(v.to_string()),
                _ => None,
            }
        })?)),
        ColumnKind::Date => Arc::new(Date32Array::from(collect(name, kind, cells(), |c| {
            match c {
                Cell::Date(v) => Some(v.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE),
                _ => None,
            }
        })?)),
        ColumnKind::Timestamp => Arc::new(TimestampMicrosecondArray::from(collect(
            name,
            kind,
            cells(),
            |c| match c {
                Cell::Timestamp(v) => Some(v.and_utc().timestamp_micros()),
                _ => None,
            },
        )?)),
        ColumnKind::TimestampTz => Arc::new(
            TimestampMicrosecondArray::from(collect(name, kind, cells(), |c| match c {
                Cell::TimestampTz(v) => Some(v.timestamp_micros()),
                _ => None,
            })?)
            .with_timezone("UTC"),
        ),
        ColumnKind::Bytes => Arc::new(BinaryArray::from(collect(name, kind, cells(), |c| {
            match c {
                Cell::Bytes(v) => Some(v.as_slice()),
                _ => None,
            }
        })?)),
    };
    Ok(array)
}

/// Single row group, Snappy-compressed, schema taken from the built arrays
pub(super) fn encode(result: &ExtractionResult) -> Result<Vec<u8>> {
    let arrays = (0..result.columns().len())
        .map(|index| build_array(result, index))
        .collect::<Result<Vec<_>>>()?;
    let fields: Vec<Field> = result
        .columns()
        .iter()
        .zip(&arrays)
        .map(|(c, array)| Field::new(&c.name, array.data_type().clone(), true))
        .collect();
    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), arrays).map_err(serialization_error)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut buffer = Vec::new();
    let mut writer =
        ArrowWriter::try_new(&mut buffer, schema, Some(props)).map_err(serialization_error)?;
    writer.write(&batch).map_err(serialization_error)?;
    writer.close().map_err(serialization_error)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Column;
    use crate::error::ErrorKind;
    use ::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use arrow_schema::{DataType, TimeUnit};
    use std::io::Write;

    fn read_back(bytes: &[u8]) -> RecordBatch {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(bytes).unwrap();
        let mut batches: Vec<RecordBatch> = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(batches.len(), 1);
        batches.remove(0)
    }

    fn sample() -> ExtractionResult {
        let mut result = ExtractionResult::new(vec![
            Column::new("id", ColumnKind::Int),
            Column::new("updated_at", ColumnKind::Timestamp),
            Column::new("day", ColumnKind::Date),
            Column::new("name", ColumnKind::Text),
        ]);
        result
            .push_row(vec![
                Cell::Int(1),
                Cell::parse_as(ColumnKind::Timestamp, "1970-01-01T00:00:01").unwrap(),
                Cell::parse_as(ColumnKind::Date, "1970-01-02").unwrap(),
                Cell::Text("a".into()),
            ])
            .unwrap();
        result
            .push_row(vec![Cell::Int(2), Cell::Null, Cell::Null, Cell::Null])
            .unwrap();
        result
    }

    #[test]
    fn test_schema_and_values_survive() {
        let bytes = encode(&sample()).unwrap();

        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&bytes).unwrap();

        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        let batches: Vec<RecordBatch> = reader.collect::<std::result::Result<_, _>>().unwrap();
        assert_eq!(batches.len(), 1);

        let batch = &batches[0];
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(
            batch.schema().field(1).data_type(),
            &DataType::Timestamp(TimeUnit::Microsecond, None)
        );

        let ts = batch
            .column(1)
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
            .unwrap();
        assert_eq!(ts.value(0), 1_000_000);
        assert!(ts.is_null(1));

        let day = batch
            .column(2)
            .as_any()
            .downcast_ref::<Date32Array>()
            .unwrap();
        assert_eq!(day.value(0), 1);
    }

    #[test]
    fn test_decimal_and_time_columns() {
        let mut result = ExtractionResult::new(vec![
            Column::new("total", ColumnKind::Decimal),
            Column::new("opens_at", ColumnKind::Time),
        ]);
        result
            .push_row(vec![
                Cell::parse_as(ColumnKind::Decimal, "12.5").unwrap(),
                Cell::parse_as(ColumnKind::Time, "00:00:01.5").unwrap(),
            ])
            .unwrap();
        result
            .push_row(vec![
                Cell::parse_as(ColumnKind::Decimal, "-0.125").unwrap(),
                Cell::Null,
            ])
            .unwrap();

        let batch = read_back(&encode(&result).unwrap());
        assert_eq!(
            batch.schema().field(0).data_type(),
            &DataType::Decimal128(38, 3)
        );
        let total = batch
            .column(0)
            .as_any()
            .downcast_ref::<Decimal128Array>()
            .unwrap();
        assert_eq!(total.value(0), 12_500);
        assert_eq!(total.value(1), -125);

        assert_eq!(
            batch.schema().field(1).data_type(),
            &DataType::Time64(TimeUnit::Microsecond)
        );
        let opens_at = batch
            .column(1)
            .as_any()
            .downcast_ref::<Time64MicrosecondArray>()
            .unwrap();
        assert_eq!(opens_at.value(0), 1_500_000);
        assert!(opens_at.is_null(1));
    }

    #[test]
    fn test_mismatched_cell_is_serialization_error() {
        let mut result = ExtractionResult::new(vec![Column::new("id", ColumnKind::Int)]);
        result.push_row(vec![Cell::Text("one".into())]).unwrap();

        let err = encode(&result).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Serialization);
    }
}
