use crate::last_error;
use dredge_core::{AsValue, DataType, Error, Result, Value};
use libsqlite3_sys::*;
use rust_decimal::{Decimal, prelude::FromPrimitive};
use std::{
    ffi::{CStr, c_int},
    slice,
};
use uuid::Uuid;

/// Column type from the declared type, following the SQLite affinity rules.
pub(crate) fn data_type_from_declared(declared: &str) -> DataType {
    let declared = declared.to_ascii_uppercase();
    let has = |s: &str| declared.contains(s);
    if declared.is_empty() {
        DataType::Unknown
    } else if has("BOOL") {
        DataType::Boolean
    } else if has("INT") {
        DataType::Int64
    } else if has("UUID") {
        DataType::Uuid
    } else if has("CHAR") || has("CLOB") || has("TEXT") {
        DataType::Varchar
    } else if has("BLOB") {
        DataType::Blob
    } else if has("REAL") || has("FLOA") || has("DOUB") {
        DataType::Float64
    } else if has("DATETIME") || has("TIMESTAMP") {
        DataType::Timestamp
    } else if has("DATE") {
        DataType::Date
    } else if has("TIME") {
        DataType::Time
    } else if has("DEC") || has("NUMERIC") {
        DataType::Decimal
    } else {
        DataType::Unknown
    }
}

pub(crate) fn extract_name(statement: *mut sqlite3_stmt, index: c_int) -> Result<String> {
    unsafe {
        let name = sqlite3_column_name(statement, index);
        if name.is_null() {
            return Err(Error::msg(format!(
                "Could not read the name of the column {index}"
            )));
        }
        Ok(CStr::from_ptr(name).to_string_lossy().into_owned())
    }
}

pub(crate) fn extract_declared_type(statement: *mut sqlite3_stmt, index: c_int) -> DataType {
    unsafe {
        let declared = sqlite3_column_decltype(statement, index);
        if declared.is_null() {
            return DataType::Unknown;
        }
        data_type_from_declared(&CStr::from_ptr(declared).to_string_lossy())
    }
}

/// Cell `index` of the current row.
///
/// SQLite stores only five storage classes, the declared type refines them
/// when the stored text or number converts cleanly.
pub(crate) fn extract_value(
    statement: *mut sqlite3_stmt,
    index: c_int,
    declared: DataType,
) -> Result<Value> {
    unsafe {
        let value = match sqlite3_column_type(statement, index) {
            SQLITE_NULL => return Ok(Value::Null),
            SQLITE_INTEGER => {
                let v = sqlite3_column_int64(statement, index);
                match declared {
                    DataType::Boolean => Value::Boolean(Some(v != 0)),
                    DataType::Decimal => Value::Decimal(Some(Decimal::from(v)), 0, 0),
                    _ => Value::Int64(Some(v)),
                }
            }
            SQLITE_FLOAT => {
                let v = sqlite3_column_double(statement, index);
                match declared {
                    DataType::Decimal => match v
                        .to_string()
                        .parse::<Decimal>()
                        .ok()
                        .or_else(|| Decimal::from_f64(v))
                    {
                        Some(d) => Value::Decimal(Some(d), 0, d.scale() as _),
                        None => Value::Float64(Some(v)),
                    },
                    _ => Value::Float64(Some(v)),
                }
            }
            SQLITE_TEXT => {
                let ptr = sqlite3_column_text(statement, index);
                if ptr.is_null() {
                    return Err(last_error(sqlite3_db_handle(statement)));
                }
                let len = sqlite3_column_bytes(statement, index) as usize;
                let text = String::from_utf8_lossy(slice::from_raw_parts(ptr, len)).into_owned();
                refine_text(text, declared)
            }
            SQLITE_BLOB => {
                let len = sqlite3_column_bytes(statement, index) as usize;
                let ptr = sqlite3_column_blob(statement, index);
                let bytes = if len > 0 && !ptr.is_null() {
                    slice::from_raw_parts(ptr as *const u8, len).into()
                } else {
                    Box::default()
                };
                Value::Blob(Some(bytes))
            }
            other => {
                return Err(Error::msg(format!(
                    "Unexpected SQLite column type {other} for the column {index}"
                )));
            }
        };
        Ok(value)
    }
}

fn refine_text(text: String, declared: DataType) -> Value {
    let refined = match declared {
        DataType::Uuid => Uuid::parse_str(text.trim()).ok().map(|v| v.as_value()),
        DataType::Date => time::Date::try_from_value(Value::Varchar(Some(text.clone())))
            .ok()
            .map(AsValue::as_value),
        DataType::Time => time::Time::try_from_value(Value::Varchar(Some(text.clone())))
            .ok()
            .map(AsValue::as_value),
        DataType::Timestamp => {
            time::PrimitiveDateTime::try_from_value(Value::Varchar(Some(text.clone())))
                .ok()
                .map(AsValue::as_value)
        }
        DataType::Decimal => Decimal::try_from_value(Value::Varchar(Some(text.clone())))
            .ok()
            .map(AsValue::as_value),
        _ => None,
    };
    refined.unwrap_or(Value::Varchar(Some(text)))
}

#[cfg(test)]
mod tests {
    use super::{data_type_from_declared, refine_text};
    use dredge_core::{DataType, Value};
    use time::macros::date;

    #[test]
    fn affinity() {
        assert_eq!(data_type_from_declared("INTEGER"), DataType::Int64);
        assert_eq!(data_type_from_declared("bigint"), DataType::Int64);
        assert_eq!(data_type_from_declared("VARCHAR(40)"), DataType::Varchar);
        assert_eq!(data_type_from_declared("BOOLEAN"), DataType::Boolean);
        assert_eq!(data_type_from_declared("DOUBLE PRECISION"), DataType::Float64);
        assert_eq!(data_type_from_declared("DECIMAL(10, 2)"), DataType::Decimal);
        assert_eq!(data_type_from_declared("DATETIME"), DataType::Timestamp);
        assert_eq!(data_type_from_declared("TIMESTAMP"), DataType::Timestamp);
        assert_eq!(data_type_from_declared("DATE"), DataType::Date);
        assert_eq!(data_type_from_declared("TIME"), DataType::Time);
        assert_eq!(data_type_from_declared("UUID"), DataType::Uuid);
        assert_eq!(data_type_from_declared(""), DataType::Unknown);
    }

    #[test]
    fn text_refinement() {
        assert_eq!(
            refine_text("2025-03-01".into(), DataType::Date),
            Value::Date(Some(date!(2025 - 03 - 01)))
        );
        assert_eq!(
            refine_text("not a date".into(), DataType::Date),
            Value::Varchar(Some("not a date".into()))
        );
        assert_eq!(
            refine_text("abc".into(), DataType::Varchar),
            Value::Varchar(Some("abc".into()))
        );
    }
}
