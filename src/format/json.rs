use crate::data::{Cell, ExtractionResult};
use crate::error::{ExtractError, Result};
use serde_json::{Map, Number, Value};

fn to_json(cell: &Cell) -> Result<Value> {
    Ok(match cell {
        Cell::Null => Value::Null,
        Cell::Bool(v) => Value::Bool(*v),
        Cell::Int(v) => Value::from(*v),
        Cell::Float(v) => Number::from_f64(*v).map(Value::Number).ok_or_else(|| {
            ExtractError::Serialization(format!("json: {} has no JSON representation", v))
        })?,
        Cell::Json(v) => v.clone(),
        // Decimals are strings so no digit is lost to a float
        Cell::Decimal(v) => Value::String(v.to_string()),
        // Temporal and binary values use their text form
        other => Value::String(other.to_string()),
    })
}

/// Row-oriented array of objects, keys in column order
pub(super) fn encode(result: &ExtractionResult) -> Result<Vec<u8>> {
    let rows = result
        .rows()
        .iter()
        .map(|row| {
            result
                .columns()
                .iter()
                .zip(row)
                .map(|(column, cell)| Ok((column.name.clone(), to_json(cell)?)))
                .collect::<Result<Map<String, Value>>>()
                .map(Value::Object)
        })
        .collect::<Result<Vec<_>>>()?;

    serde_json::to_vec(&rows).map_err(|e| ExtractError::Serialization(format!("json: {}", e)))
}
