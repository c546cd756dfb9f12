// ABOUTME: Oracle row to JSON conversion for emitted documents
// ABOUTME: Numbers keep full precision, timestamps become RFC 3339, binary values base64

use base64::Engine;
use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use oracle::sql_type::OracleType;
use oracle::Row;
use serde_json::{Map, Number, Value};

use crate::error::CaptureError;
use crate::flashback::types::Column;

/// Broad kind of value a column holds. Changes within a family (a longer
/// VARCHAR2, a different NUMBER scale) do not alter emitted documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Numeric,
    BinaryFloat,
    Text,
    DateTime,
    ZonedTimestamp,
    Binary,
    Boolean,
}

/// Family of a catalog `DATA_TYPE`, `None` for types not checked.
pub fn catalog_family(data_type: &str) -> Option<TypeFamily> {
    let data_type = data_type.trim().to_uppercase();
    if data_type.starts_with("TIMESTAMP") {
        return Some(if data_type.ends_with("TIME ZONE") {
            TypeFamily::ZonedTimestamp
        } else {
            TypeFamily::DateTime
        });
    }
    let base = data_type.split('(').next().unwrap_or_default();
    match base {
        "NUMBER" | "FLOAT" | "INTEGER" => Some(TypeFamily::Numeric),
        "BINARY_FLOAT" | "BINARY_DOUBLE" => Some(TypeFamily::BinaryFloat),
        "VARCHAR2" | "NVARCHAR2" | "CHAR" | "NCHAR" | "CLOB" | "NCLOB" | "LONG" => {
            Some(TypeFamily::Text)
        }
        "DATE" => Some(TypeFamily::DateTime),
        "RAW" | "LONG RAW" | "BLOB" => Some(TypeFamily::Binary),
        "BOOLEAN" => Some(TypeFamily::Boolean),
        _ => None,
    }
}

/// Family of a result column type, `None` for types not checked.
pub fn result_family(ty: &OracleType) -> Option<TypeFamily> {
    match ty {
        OracleType::Number(_, _)
        | OracleType::Float(_)
        | OracleType::Int64
        | OracleType::UInt64 => Some(TypeFamily::Numeric),
        OracleType::BinaryFloat | OracleType::BinaryDouble => Some(TypeFamily::BinaryFloat),
        OracleType::Varchar2(_)
        | OracleType::NVarchar2(_)
        | OracleType::Char(_)
        | OracleType::NChar(_)
        | OracleType::CLOB
        | OracleType::NCLOB
        | OracleType::Long => Some(TypeFamily::Text),
        OracleType::Date | OracleType::Timestamp(_) => Some(TypeFamily::DateTime),
        OracleType::TimestampTZ(_) | OracleType::TimestampLTZ(_) => {
            Some(TypeFamily::ZonedTimestamp)
        }
        OracleType::Raw(_) | OracleType::LongRaw | OracleType::BLOB => Some(TypeFamily::Binary),
        OracleType::Boolean => Some(TypeFamily::Boolean),
        _ => None,
    }
}

/// Fail with schema drift when a result column no longer holds the family of
/// values its descriptor was discovered with.
///
/// `types` starts at the first table column of the result.
pub fn check_types(
    table: &str,
    columns: &[Column],
    types: &[OracleType],
) -> Result<(), CaptureError> {
    for (column, ty) in columns.iter().zip(types) {
        let (Some(expected), Some(actual)) = (catalog_family(&column.data_type), result_family(ty))
        else {
            continue;
        };
        if expected != actual {
            return Err(CaptureError::schema_drift(
                table,
                format!(
                    "column {} changed type from {} to {}",
                    column.name, column.data_type, ty
                ),
            ));
        }
    }
    Ok(())
}

/// Convert the table's columns of `row`, starting at result column `offset`.
///
/// Columns are keyed by their catalog names, in the descriptor's order.
pub fn row_values(
    row: &Row,
    offset: usize,
    columns: &[Column],
    types: &[OracleType],
) -> oracle::Result<Map<String, Value>> {
    let mut values = Map::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        let idx = offset + i;
        let value = match types.get(idx) {
            Some(ty) => column_to_json(row, idx, ty)?,
            None => Value::Null,
        };
        values.insert(column.name.clone(), value);
    }
    Ok(values)
}

/// Convert one result column to JSON based on its Oracle type.
pub fn column_to_json(row: &Row, idx: usize, ty: &OracleType) -> oracle::Result<Value> {
    let value = match ty {
        OracleType::Number(_, _) | OracleType::Float(_) => row
            .get::<usize, Option<String>>(idx)?
            .map_or(Value::Null, |s| number_to_json(&s)),
        OracleType::Int64 => row
            .get::<usize, Option<i64>>(idx)?
            .map_or(Value::Null, Value::from),
        OracleType::UInt64 => row
            .get::<usize, Option<u64>>(idx)?
            .map_or(Value::Null, Value::from),
        OracleType::BinaryFloat | OracleType::BinaryDouble => row
            .get::<usize, Option<f64>>(idx)?
            .map_or(Value::Null, float_to_json),
        OracleType::Date | OracleType::Timestamp(_) => row
            .get::<usize, Option<NaiveDateTime>>(idx)?
            .map_or(Value::Null, |ts| naive_to_json(&ts)),
        OracleType::TimestampTZ(_) | OracleType::TimestampLTZ(_) => row
            .get::<usize, Option<DateTime<FixedOffset>>>(idx)?
            .map_or(Value::Null, |ts| {
                Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }),
        OracleType::Raw(_) | OracleType::LongRaw | OracleType::BLOB => row
            .get::<usize, Option<Vec<u8>>>(idx)?
            .map_or(Value::Null, |b| bytes_to_json(&b)),
        OracleType::Boolean => row
            .get::<usize, Option<bool>>(idx)?
            .map_or(Value::Null, Value::Bool),
        _ => row
            .get::<usize, Option<String>>(idx)?
            .map_or(Value::Null, Value::String),
    };
    Ok(value)
}

/// NUMBER as text: integral values within `i64` become JSON integers,
/// everything else stays a string so no precision is lost.
pub fn number_to_json(text: &str) -> Value {
    match text.trim().parse::<i64>() {
        Ok(n) => Value::from(n),
        Err(_) => Value::String(text.trim().to_string()),
    }
}

pub fn float_to_json(f: f64) -> Value {
    if f.is_finite() {
        Number::from_f64(f).map_or_else(|| Value::String(f.to_string()), Value::Number)
    } else {
        // JSON has no NaN or Infinity
        Value::String(f.to_string())
    }
}

/// DATE and TIMESTAMP carry no zone; they are reported as UTC.
pub fn naive_to_json(ts: &NaiveDateTime) -> Value {
    Value::String(
        Utc.from_utc_datetime(ts)
            .to_rfc3339_opts(SecondsFormat::AutoSi, true),
    )
}

pub fn bytes_to_json(bytes: &[u8]) -> Value {
    Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
}
