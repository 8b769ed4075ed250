use crate::data::ExtractionResult;
use crate::error::{ExtractError, Result};

fn serialization_error(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Serialization(format!("csv: {}", e))
}

/// Header row of column names, then one record per row with every value as text
pub(super) fn encode(result: &ExtractionResult) -> Result<Vec<u8>> {
    let mut writer = ::csv::Writer::from_writer(Vec::new());

    writer
        .write_record(result.columns().iter().map(|c| c.name.as_str()))
        .map_err(serialization_error)?;
    for row in result.rows() {
        writer
            .write_record(row.iter().map(|cell| cell.to_string()))
            .map_err(serialization_error)?;
    }

    writer.into_inner().map_err(serialization_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Cell, Column, ColumnKind};

    #[test]
    fn test_header_and_text_coercion() {
        let mut result = ExtractionResult::new(vec![
            Column::new("id", ColumnKind::Int),
            Column::new("note", ColumnKind::Text),
            Column::new("active", ColumnKind::Bool),
        ]);
        result
            .push_row(vec![
                Cell::Int(1),
                Cell::Text("hello, world".into()),
                Cell::Bool(true),
            ])
            .unwrap();
        result
            .push_row(vec![Cell::Int(2), Cell::Null, Cell::Bool(false)])
            .unwrap();

        let csv = String::from_utf8(encode(&result).unwrap()).unwrap();
        assert_eq!(
            csv,
            "id,note,active\n1,\"hello, world\",true\n2,,false\n"
        );
    }

    #[test]
    fn test_decimal_keeps_scale() {
        let mut result = ExtractionResult::new(vec![
            Column::new("total", ColumnKind::Decimal),
            Column::new("opens_at", ColumnKind::Time),
        ]);
        result
            .push_row(vec![
                Cell::parse_as(ColumnKind::Decimal, "10.50").unwrap(),
                Cell::parse_as(ColumnKind::Time, "23:59:59.25").unwrap(),
            ])
            .unwrap();

        let csv = String::from_utf8(encode(&result).unwrap()).unwrap();
        assert_eq!(csv, "total,opens_at\n10.50,23:59:59.250\n");
    }
}
