use crate::last_error;
use dredge_core::{Error, Result, Value, truncate_long};
use libsqlite3_sys::*;
use std::ffi::{c_int, c_void};
use time::{format_description::BorrowedFormatItem, macros::format_description};

// Same text layouts SQLite date and time functions produce.
const DATE: &[BorrowedFormatItem<'_>] = format_description!("[year]-[month]-[day]");
const TIME: &[BorrowedFormatItem<'_>] = format_description!("[hour]:[minute]:[second].[subsecond]");
const TIMESTAMP: &[BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]");
const TIMESTAMP_WITH_TIMEZONE: &[BorrowedFormatItem<'_>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond][offset_hour sign:mandatory]:[offset_minute]"
);

/// Binds `value` to the 1-based parameter `index` of `statement`.
pub(crate) fn bind_value(statement: *mut sqlite3_stmt, index: u64, value: &Value) -> Result<()> {
    let index = index as c_int;
    unsafe {
        let rc = match value {
            v if v.is_null() => sqlite3_bind_null(statement, index),
            Value::Boolean(Some(v)) => sqlite3_bind_int(statement, index, *v as c_int),
            Value::Int8(Some(v)) => sqlite3_bind_int(statement, index, *v as c_int),
            Value::Int16(Some(v)) => sqlite3_bind_int(statement, index, *v as c_int),
            Value::Int32(Some(v)) => sqlite3_bind_int(statement, index, *v),
            Value::Int64(Some(v)) => sqlite3_bind_int64(statement, index, *v),
            Value::Int128(Some(v)) => match i64::try_from(*v) {
                Ok(v) => sqlite3_bind_int64(statement, index, v),
                Err(..) => bind_text(statement, index, &v.to_string()),
            },
            Value::UInt8(Some(v)) => sqlite3_bind_int(statement, index, *v as c_int),
            Value::UInt16(Some(v)) => sqlite3_bind_int(statement, index, *v as c_int),
            Value::UInt32(Some(v)) => sqlite3_bind_int64(statement, index, *v as i64),
            Value::UInt64(Some(v)) => match i64::try_from(*v) {
                Ok(v) => sqlite3_bind_int64(statement, index, v),
                Err(..) => bind_text(statement, index, &v.to_string()),
            },
            Value::UInt128(Some(v)) => match i64::try_from(*v) {
                Ok(v) => sqlite3_bind_int64(statement, index, v),
                Err(..) => bind_text(statement, index, &v.to_string()),
            },
            Value::Float32(Some(v)) => sqlite3_bind_double(statement, index, *v as f64),
            Value::Float64(Some(v)) => sqlite3_bind_double(statement, index, *v),
            // Text keeps every digit, NUMERIC affinity converts it back on insert.
            Value::Decimal(Some(v), ..) => bind_text(statement, index, &v.to_string()),
            Value::Varchar(Some(v)) => bind_text(statement, index, v),
            Value::Blob(Some(v)) => sqlite3_bind_blob(
                statement,
                index,
                v.as_ptr() as *const c_void,
                v.len() as c_int,
                SQLITE_TRANSIENT(),
            ),
            Value::Date(Some(v)) => bind_text(statement, index, &v.format(DATE)?),
            Value::Time(Some(v)) => bind_text(statement, index, &v.format(TIME)?),
            Value::Timestamp(Some(v)) => bind_text(statement, index, &v.format(TIMESTAMP)?),
            Value::TimestampWithTimezone(Some(v)) => {
                bind_text(statement, index, &v.format(TIMESTAMP_WITH_TIMEZONE)?)
            }
            Value::Uuid(Some(v)) => bind_text(statement, index, &v.to_string()),
            _ => {
                return Err(Error::msg(format!(
                    "Cannot bind {} to a SQLite parameter",
                    truncate_long!(format!("{value:?}"))
                )));
            }
        };
        if rc != SQLITE_OK {
            let error = last_error(sqlite3_db_handle(statement));
            return Err(error.context(format!("Could not bind the parameter {index}")));
        }
    }
    Ok(())
}

unsafe fn bind_text(statement: *mut sqlite3_stmt, index: c_int, text: &str) -> c_int {
    unsafe {
        sqlite3_bind_text(
            statement,
            index,
            text.as_ptr() as *const _,
            text.len() as c_int,
            SQLITE_TRANSIENT(),
        )
    }
}
