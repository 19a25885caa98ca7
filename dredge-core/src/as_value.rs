use crate::{DataType, Error, Result, Value, truncate_long};
use anyhow::Context;
use rust_decimal::{
    Decimal,
    prelude::{FromPrimitive, ToPrimitive},
};
use std::any;
use time::format_description::parse_borrowed;
use uuid::Uuid;

/// Conversion between native Rust types and the dynamically typed [`Value`].
///
/// It is used in both directions: `as_value` binds command parameters and
/// `from_column` materializes record members and scalars from row cells.
///
/// # Conversion contract
/// - `try_from_value` accepts the canonical variant of the type and the
///   alternate variants listed by `accepts`, with range checks for numbers.
///   Out of range values return an error naming the value and the target type.
/// - `from_column` is the lenient entry point used by the mapping compiler:
///   `Ok(None)` means the destination must be left untouched (null cells,
///   unparsable enum names, malformed identifiers).
/// - `accepts` is evaluated once per compiled plan against the declared column
///   type, a `false` there becomes a type mismatch error before any row is read.
///
/// # Examples
/// ```rust
/// use dredge_core::{AsValue, Value};
/// let v = 42i32.as_value();
/// assert!(matches!(v, Value::Int32(Some(42))));
/// let n: i64 = AsValue::try_from_value(v).unwrap();
/// assert_eq!(n, 42);
/// ```
pub trait AsValue {
    /// Null value of the variant backing this type. Also describes its type.
    fn as_empty_value() -> Value;
    /// Owned [`Value`] representation of `self`.
    fn as_value(self) -> Value;
    /// Strict conversion from a [`Value`].
    fn try_from_value(value: Value) -> Result<Self>
    where
        Self: Sized;
    /// Whether a column declared as `column` can be converted into this type.
    fn accepts(column: DataType) -> bool {
        column == DataType::Unknown || column == Self::as_empty_value().data_type()
    }
    /// Lenient conversion of a row cell, `Ok(None)` leaves the destination untouched.
    fn from_column(value: Value) -> Result<Option<Self>>
    where
        Self: Sized,
    {
        if value.is_null() {
            return Ok(None);
        }
        Self::try_from_value(value).map(Some)
    }
}

fn cannot_convert<T>(value: &Value) -> Error {
    Error::msg(format!(
        "Cannot convert {value:?} to {}",
        any::type_name::<T>()
    ))
}

macro_rules! integer_from {
    ($target:ty, $v:expr, $from:literal) => {
        <$target>::try_from($v).map_err(|_| {
            Error::msg(format!(
                "Value {}: {} is out of range for {}",
                $v,
                $from,
                any::type_name::<$target>()
            ))
        })
    };
}

macro_rules! impl_as_value_integer {
    ($source:ty, $destination:path) => {
        impl AsValue for $source {
            fn as_empty_value() -> Value {
                $destination(None)
            }
            fn as_value(self) -> Value {
                $destination(Some(self as _))
            }
            fn try_from_value(value: Value) -> Result<Self> {
                match value {
                    Value::Int8(Some(v)) => integer_from!($source, v, "i8"),
                    Value::Int16(Some(v)) => integer_from!($source, v, "i16"),
                    Value::Int32(Some(v)) => integer_from!($source, v, "i32"),
                    Value::Int64(Some(v)) => integer_from!($source, v, "i64"),
                    Value::Int128(Some(v)) => integer_from!($source, v, "i128"),
                    Value::UInt8(Some(v)) => integer_from!($source, v, "u8"),
                    Value::UInt16(Some(v)) => integer_from!($source, v, "u16"),
                    Value::UInt32(Some(v)) => integer_from!($source, v, "u32"),
                    Value::UInt64(Some(v)) => integer_from!($source, v, "u64"),
                    Value::UInt128(Some(v)) => integer_from!($source, v, "u128"),
                    Value::Decimal(Some(v), ..) => {
                        let error = || {
                            Error::msg(format!(
                                "Value {v}: Decimal does not fit into {}",
                                any::type_name::<Self>()
                            ))
                        };
                        if !v.is_integer() {
                            return Err(error().context("The value is not a integer"));
                        }
                        let wide = v.to_i128().ok_or_else(error)?;
                        integer_from!($source, wide, "Decimal")
                    }
                    _ => Err(cannot_convert::<Self>(&value)),
                }
            }
            fn accepts(column: DataType) -> bool {
                column == DataType::Unknown
                    || column.is_integer()
                    || column == DataType::Decimal
            }
        }
    };
}
impl_as_value_integer!(i8, Value::Int8);
impl_as_value_integer!(i16, Value::Int16);
impl_as_value_integer!(i32, Value::Int32);
impl_as_value_integer!(i64, Value::Int64);
impl_as_value_integer!(i128, Value::Int128);
impl_as_value_integer!(isize, Value::Int64);
impl_as_value_integer!(u8, Value::UInt8);
impl_as_value_integer!(u16, Value::UInt16);
impl_as_value_integer!(u32, Value::UInt32);
impl_as_value_integer!(u64, Value::UInt64);
impl_as_value_integer!(u128, Value::UInt128);
impl_as_value_integer!(usize, Value::UInt64);

macro_rules! impl_as_value_float {
    ($source:ty, $destination:path, $to:ident) => {
        impl AsValue for $source {
            fn as_empty_value() -> Value {
                $destination(None)
            }
            fn as_value(self) -> Value {
                $destination(Some(self))
            }
            fn try_from_value(value: Value) -> Result<Self> {
                match value {
                    Value::Float32(Some(v)) => Ok(v as _),
                    Value::Float64(Some(v)) => Ok(v as _),
                    Value::Int8(Some(v)) => Ok(v as _),
                    Value::Int16(Some(v)) => Ok(v as _),
                    Value::Int32(Some(v)) => Ok(v as _),
                    Value::Int64(Some(v)) => Ok(v as _),
                    Value::Int128(Some(v)) => Ok(v as _),
                    Value::UInt8(Some(v)) => Ok(v as _),
                    Value::UInt16(Some(v)) => Ok(v as _),
                    Value::UInt32(Some(v)) => Ok(v as _),
                    Value::UInt64(Some(v)) => Ok(v as _),
                    Value::UInt128(Some(v)) => Ok(v as _),
                    Value::Decimal(Some(v), ..) => v.$to().ok_or_else(|| {
                        Error::msg(format!(
                            "Value {v}: Decimal does not fit into {}",
                            any::type_name::<Self>()
                        ))
                    }),
                    _ => Err(cannot_convert::<Self>(&value)),
                }
            }
            fn accepts(column: DataType) -> bool {
                column == DataType::Unknown || column.is_numeric()
            }
        }
    };
}
impl_as_value_float!(f32, Value::Float32, to_f32);
impl_as_value_float!(f64, Value::Float64, to_f64);

impl AsValue for bool {
    fn as_empty_value() -> Value {
        Value::Boolean(None)
    }
    fn as_value(self) -> Value {
        Value::Boolean(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Boolean(Some(v)) => Ok(v),
            Value::Int8(Some(v)) => Ok(v != 0),
            Value::Int16(Some(v)) => Ok(v != 0),
            Value::Int32(Some(v)) => Ok(v != 0),
            Value::Int64(Some(v)) => Ok(v != 0),
            Value::Int128(Some(v)) => Ok(v != 0),
            Value::UInt8(Some(v)) => Ok(v != 0),
            Value::UInt16(Some(v)) => Ok(v != 0),
            Value::UInt32(Some(v)) => Ok(v != 0),
            Value::UInt64(Some(v)) => Ok(v != 0),
            Value::UInt128(Some(v)) => Ok(v != 0),
            _ => Err(cannot_convert::<Self>(&value)),
        }
    }
    fn accepts(column: DataType) -> bool {
        column == DataType::Unknown || column == DataType::Boolean || column.is_integer()
    }
}

impl AsValue for String {
    fn as_empty_value() -> Value {
        Value::Varchar(None)
    }
    fn as_value(self) -> Value {
        Value::Varchar(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Varchar(Some(v)) => Ok(v),
            Value::Uuid(Some(v)) => Ok(v.to_string()),
            Value::Date(Some(v)) => Ok(v.to_string()),
            Value::Time(Some(v)) => Ok(v.to_string()),
            Value::Timestamp(Some(v)) => Ok(v.to_string()),
            Value::TimestampWithTimezone(Some(v)) => Ok(v.to_string()),
            _ => Err(cannot_convert::<Self>(&value)),
        }
    }
    fn accepts(column: DataType) -> bool {
        column == DataType::Unknown
            || column == DataType::Varchar
            || column == DataType::Uuid
            || column.is_temporal()
    }
}

impl AsValue for Box<[u8]> {
    fn as_empty_value() -> Value {
        Value::Blob(None)
    }
    fn as_value(self) -> Value {
        Value::Blob(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Blob(Some(v)) => Ok(v),
            Value::Varchar(Some(v)) => Ok(v.into_bytes().into_boxed_slice()),
            _ => Err(cannot_convert::<Self>(&value)),
        }
    }
    fn accepts(column: DataType) -> bool {
        matches!(
            column,
            DataType::Unknown | DataType::Blob | DataType::Varchar
        )
    }
}

impl AsValue for Decimal {
    fn as_empty_value() -> Value {
        Value::Decimal(None, 0, 0)
    }
    fn as_value(self) -> Value {
        Value::Decimal(Some(self), 0, self.scale() as _)
    }
    fn try_from_value(value: Value) -> Result<Self> {
        let error = || cannot_convert::<Self>(&value);
        match &value {
            Value::Decimal(Some(v), ..) => Ok(*v),
            Value::Int8(Some(v)) => Ok(Decimal::from(*v)),
            Value::Int16(Some(v)) => Ok(Decimal::from(*v)),
            Value::Int32(Some(v)) => Ok(Decimal::from(*v)),
            Value::Int64(Some(v)) => Ok(Decimal::from(*v)),
            Value::Int128(Some(v)) => Decimal::from_i128(*v).ok_or_else(error),
            Value::UInt8(Some(v)) => Ok(Decimal::from(*v)),
            Value::UInt16(Some(v)) => Ok(Decimal::from(*v)),
            Value::UInt32(Some(v)) => Ok(Decimal::from(*v)),
            Value::UInt64(Some(v)) => Ok(Decimal::from(*v)),
            Value::UInt128(Some(v)) => Decimal::from_u128(*v).ok_or_else(error),
            Value::Float32(Some(v)) => Decimal::from_f32(*v).ok_or_else(error),
            Value::Float64(Some(v)) => Decimal::from_f64(*v).ok_or_else(error),
            Value::Varchar(Some(v)) => v
                .trim()
                .parse::<Decimal>()
                .with_context(|| format!("Cannot parse `{}` as Decimal", truncate_long!(v))),
            _ => Err(error()),
        }
    }
    fn accepts(column: DataType) -> bool {
        column == DataType::Unknown || column.is_numeric() || column == DataType::Varchar
    }
}

impl AsValue for Uuid {
    fn as_empty_value() -> Value {
        Value::Uuid(None)
    }
    fn as_value(self) -> Value {
        Value::Uuid(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Uuid(Some(v)) => Ok(v),
            Value::Varchar(Some(v)) => Uuid::parse_str(v.trim())
                .with_context(|| format!("Cannot parse `{}` as uuid", truncate_long!(v))),
            Value::Blob(Some(v)) => Uuid::from_slice(&v).context("Cannot read a uuid from blob"),
            _ => Err(cannot_convert::<Self>(&value)),
        }
    }
    fn accepts(column: DataType) -> bool {
        matches!(
            column,
            DataType::Unknown | DataType::Uuid | DataType::Varchar | DataType::Blob
        )
    }
    fn from_column(value: Value) -> Result<Option<Self>> {
        match value {
            v if v.is_null() => Ok(None),
            Value::Varchar(Some(v)) => Ok(Uuid::parse_str(v.trim()).ok()),
            Value::Blob(Some(v)) => Ok(Uuid::from_slice(&v).ok()),
            v => Self::try_from_value(v).map(Some),
        }
    }
}

macro_rules! parse_time {
    ($input:expr, $target:ty, $($formats:literal),+ $(,)?) => {
        'value: {
            let input = $input.trim();
            for format in [$($formats,)+] {
                let format = parse_borrowed::<2>(format)?;
                let mut parsed = time::parsing::Parsed::new();
                if let Ok(remaining) = parsed.parse_items(input.as_bytes(), &format)
                    && remaining.is_empty()
                    && let Ok(result) = <$target>::try_from(parsed)
                {
                    break 'value Ok(result);
                }
            }
            Err(Error::msg(format!(
                "Cannot parse `{}` as {}",
                truncate_long!(input),
                any::type_name::<$target>()
            )))
        }
    };
}

macro_rules! impl_as_value_temporal {
    ($source:ty, $destination:path, $parse:expr $(, $pat_rest:pat => $expr_rest:expr)* $(,)?) => {
        impl AsValue for $source {
            fn as_empty_value() -> Value {
                $destination(None)
            }
            fn as_value(self) -> Value {
                $destination(Some(self))
            }
            fn try_from_value(value: Value) -> Result<Self> {
                match value {
                    $destination(Some(v)) => Ok(v),
                    Value::Varchar(Some(ref v)) => $parse(v.as_str()),
                    $($pat_rest => $expr_rest,)*
                    _ => Err(cannot_convert::<Self>(&value)),
                }
            }
            fn accepts(column: DataType) -> bool {
                column == DataType::Unknown
                    || column == DataType::Varchar
                    || column.is_temporal()
            }
        }
    };
}
impl_as_value_temporal!(time::Date, Value::Date, |v: &str| -> Result<time::Date> {
    parse_time!(v, time::Date, "[year]-[month]-[day]")
}, Value::Timestamp(Some(v)) => Ok(v.date()));
impl_as_value_temporal!(time::Time, Value::Time, |v: &str| -> Result<time::Time> {
    parse_time!(
        v,
        time::Time,
        "[hour]:[minute]:[second].[subsecond]",
        "[hour]:[minute]:[second]",
        "[hour]:[minute]",
    )
}, Value::Timestamp(Some(v)) => Ok(v.time()));
impl_as_value_temporal!(
    time::PrimitiveDateTime,
    Value::Timestamp,
    |v: &str| -> Result<time::PrimitiveDateTime> {
        parse_time!(
            v,
            time::PrimitiveDateTime,
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]",
            "[year]-[month]-[day]T[hour]:[minute]:[second]",
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]",
            "[year]-[month]-[day] [hour]:[minute]:[second]",
            "[year]-[month]-[day] [hour]:[minute]",
        )
    },
    Value::TimestampWithTimezone(Some(v)) => Ok(time::PrimitiveDateTime::new(v.date(), v.time())),
);
impl_as_value_temporal!(
    time::OffsetDateTime,
    Value::TimestampWithTimezone,
    |v: &str| -> Result<time::OffsetDateTime> {
        parse_time!(
            v,
            time::OffsetDateTime,
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond][offset_hour sign:mandatory]:[offset_minute]",
            "[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]",
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond][offset_hour sign:mandatory]:[offset_minute]",
            "[year]-[month]-[day] [hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]",
            "[year]-[month]-[day] [hour]:[minute]:[second][offset_hour sign:mandatory]",
        )
        .or_else(|_| {
            <time::PrimitiveDateTime as AsValue>::try_from_value(Value::Varchar(Some(v.into())))
                .map(|v| v.assume_utc())
        })
    },
    Value::Timestamp(Some(v)) => Ok(v.assume_utc()),
);

impl<T: AsValue> AsValue for Option<T> {
    fn as_empty_value() -> Value {
        T::as_empty_value()
    }
    fn as_value(self) -> Value {
        match self {
            Some(v) => v.as_value(),
            None => T::as_empty_value(),
        }
    }
    fn try_from_value(value: Value) -> Result<Self> {
        if value.is_null() {
            return Ok(None);
        }
        T::try_from_value(value).map(Some)
    }
    fn accepts(column: DataType) -> bool {
        T::accepts(column)
    }
    fn from_column(value: Value) -> Result<Option<Self>> {
        Ok(T::from_column(value)?.map(Some))
    }
}

impl<T: AsValue> AsValue for Box<T> {
    fn as_empty_value() -> Value {
        T::as_empty_value()
    }
    fn as_value(self) -> Value {
        (*self).as_value()
    }
    fn try_from_value(value: Value) -> Result<Self> {
        T::try_from_value(value).map(Box::new)
    }
    fn accepts(column: DataType) -> bool {
        T::accepts(column)
    }
    fn from_column(value: Value) -> Result<Option<Self>> {
        Ok(T::from_column(value)?.map(Box::new))
    }
}

impl AsValue for Value {
    fn as_empty_value() -> Value {
        Value::Null
    }
    fn as_value(self) -> Value {
        self
    }
    fn try_from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
    fn accepts(_column: DataType) -> bool {
        true
    }
}

/// Fieldless enums stored either by variant name or by discriminant.
///
/// Implemented by `#[derive(DbEnum)]`.
pub trait DbEnum: Sized + 'static {
    /// Variant matching `name`, ASCII case-insensitive.
    fn from_name(name: &str) -> Option<Self>;
    /// Variant whose discriminant is `value`.
    fn from_discriminant(value: i128) -> Option<Self>;
    fn name(&self) -> &'static str;
    fn discriminant(&self) -> i128;
}

pub fn enum_as_value<E: DbEnum>(value: &E) -> Value {
    Value::Int64(Some(value.discriminant() as i64))
}

fn enum_discriminant(value: &Value) -> Option<i128> {
    match *value {
        Value::Int8(Some(v)) => Some(v as _),
        Value::Int16(Some(v)) => Some(v as _),
        Value::Int32(Some(v)) => Some(v as _),
        Value::Int64(Some(v)) => Some(v as _),
        Value::Int128(Some(v)) => Some(v),
        Value::UInt8(Some(v)) => Some(v as _),
        Value::UInt16(Some(v)) => Some(v as _),
        Value::UInt32(Some(v)) => Some(v as _),
        Value::UInt64(Some(v)) => Some(v as _),
        Value::UInt128(Some(v)) => i128::try_from(v).ok(),
        _ => None,
    }
}

pub fn enum_try_from_value<E: DbEnum>(value: Value) -> Result<E> {
    let result = match &value {
        Value::Varchar(Some(v)) => E::from_name(v.trim()),
        v => enum_discriminant(v).and_then(E::from_discriminant),
    };
    result.ok_or_else(|| {
        Error::msg(format!(
            "{value} is not a defined member of {}",
            any::type_name::<E>()
        ))
    })
}

/// Unknown names and undefined discriminants leave the destination untouched.
pub fn enum_from_column<E: DbEnum>(value: Value) -> Result<Option<E>> {
    match &value {
        v if v.is_null() => Ok(None),
        Value::Varchar(Some(v)) => Ok(E::from_name(v.trim())),
        v => match enum_discriminant(v) {
            Some(d) => Ok(E::from_discriminant(d)),
            None => Err(cannot_convert::<E>(&value)),
        },
    }
}

pub fn enum_accepts(column: DataType) -> bool {
    column == DataType::Unknown || column == DataType::Varchar || column.is_integer()
}
