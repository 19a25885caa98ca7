use rust_decimal::Decimal;
use std::fmt::{self, Display};
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};
use uuid::Uuid;

/// Dynamically typed cell value.
///
/// Every typed variant carries an `Option`: `None` is the database null for a
/// column whose type is known, `Value::Null` is the null of an untyped column.
/// Both count as the null sentinel, see [`Value::is_null`].
#[derive(Default, Debug, Clone)]
pub enum Value {
    #[default]
    Null,
    Boolean(Option<bool>),
    Int8(Option<i8>),
    Int16(Option<i16>),
    Int32(Option<i32>),
    Int64(Option<i64>),
    Int128(Option<i128>),
    UInt8(Option<u8>),
    UInt16(Option<u16>),
    UInt32(Option<u32>),
    UInt64(Option<u64>),
    UInt128(Option<u128>),
    Float32(Option<f32>),
    Float64(Option<f64>),
    Decimal(Option<Decimal>, /* prec: */ u8, /* scale: */ u8),
    Varchar(Option<String>),
    Blob(Option<Box<[u8]>>),
    Date(Option<Date>),
    Time(Option<Time>),
    Timestamp(Option<PrimitiveDateTime>),
    TimestampWithTimezone(Option<OffsetDateTime>),
    Uuid(Option<Uuid>),
}

/// Declared type of a column or a member, without the value.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataType {
    /// The backend did not declare a type (expressions, untyped columns).
    #[default]
    Unknown,
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    Int128,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    UInt128,
    Float32,
    Float64,
    Decimal,
    Varchar,
    Blob,
    Date,
    Time,
    Timestamp,
    TimestampWithTimezone,
    Uuid,
}

impl DataType {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::Int128
                | DataType::UInt8
                | DataType::UInt16
                | DataType::UInt32
                | DataType::UInt64
                | DataType::UInt128
        )
    }
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }
    /// Integers, floats and decimals.
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float() || *self == DataType::Decimal
    }
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            DataType::Date | DataType::Time | DataType::Timestamp | DataType::TimestampWithTimezone
        )
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Boolean(l), Self::Boolean(r)) => l == r,
            (Self::Int8(l), Self::Int8(r)) => l == r,
            (Self::Int16(l), Self::Int16(r)) => l == r,
            (Self::Int32(l), Self::Int32(r)) => l == r,
            (Self::Int64(l), Self::Int64(r)) => l == r,
            (Self::Int128(l), Self::Int128(r)) => l == r,
            (Self::UInt8(l), Self::UInt8(r)) => l == r,
            (Self::UInt16(l), Self::UInt16(r)) => l == r,
            (Self::UInt32(l), Self::UInt32(r)) => l == r,
            (Self::UInt64(l), Self::UInt64(r)) => l == r,
            (Self::UInt128(l), Self::UInt128(r)) => l == r,
            (Self::Float32(l), Self::Float32(r)) => l == r,
            (Self::Float64(l), Self::Float64(r)) => l == r,
            (Self::Decimal(l, l_prec, l_scale), Self::Decimal(r, r_prec, r_scale)) => {
                l == r && l_prec == r_prec && l_scale == r_scale
            }
            (Self::Varchar(l), Self::Varchar(r)) => l == r,
            (Self::Blob(l), Self::Blob(r)) => l == r,
            (Self::Date(l), Self::Date(r)) => l == r,
            (Self::Time(l), Self::Time(r)) => l == r,
            (Self::Timestamp(l), Self::Timestamp(r)) => l == r,
            (Self::TimestampWithTimezone(l), Self::TimestampWithTimezone(r)) => l == r,
            (Self::Uuid(l), Self::Uuid(r)) => l == r,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

impl Value {
    /// True for `Value::Null` and for any typed variant holding `None`.
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Boolean(v) => v.is_none(),
            Value::Int8(v) => v.is_none(),
            Value::Int16(v) => v.is_none(),
            Value::Int32(v) => v.is_none(),
            Value::Int64(v) => v.is_none(),
            Value::Int128(v) => v.is_none(),
            Value::UInt8(v) => v.is_none(),
            Value::UInt16(v) => v.is_none(),
            Value::UInt32(v) => v.is_none(),
            Value::UInt64(v) => v.is_none(),
            Value::UInt128(v) => v.is_none(),
            Value::Float32(v) => v.is_none(),
            Value::Float64(v) => v.is_none(),
            Value::Decimal(v, ..) => v.is_none(),
            Value::Varchar(v) => v.is_none(),
            Value::Blob(v) => v.is_none(),
            Value::Date(v) => v.is_none(),
            Value::Time(v) => v.is_none(),
            Value::Timestamp(v) => v.is_none(),
            Value::TimestampWithTimezone(v) => v.is_none(),
            Value::Uuid(v) => v.is_none(),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Unknown,
            Value::Boolean(..) => DataType::Boolean,
            Value::Int8(..) => DataType::Int8,
            Value::Int16(..) => DataType::Int16,
            Value::Int32(..) => DataType::Int32,
            Value::Int64(..) => DataType::Int64,
            Value::Int128(..) => DataType::Int128,
            Value::UInt8(..) => DataType::UInt8,
            Value::UInt16(..) => DataType::UInt16,
            Value::UInt32(..) => DataType::UInt32,
            Value::UInt64(..) => DataType::UInt64,
            Value::UInt128(..) => DataType::UInt128,
            Value::Float32(..) => DataType::Float32,
            Value::Float64(..) => DataType::Float64,
            Value::Decimal(..) => DataType::Decimal,
            Value::Varchar(..) => DataType::Varchar,
            Value::Blob(..) => DataType::Blob,
            Value::Date(..) => DataType::Date,
            Value::Time(..) => DataType::Time,
            Value::Timestamp(..) => DataType::Timestamp,
            Value::TimestampWithTimezone(..) => DataType::TimestampWithTimezone,
            Value::Uuid(..) => DataType::Uuid,
        }
    }

    pub fn same_type(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Decimal(.., l_prec, l_scale), Self::Decimal(.., r_prec, r_scale)) => {
                l_prec == r_prec && l_scale == r_scale
            }
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        macro_rules! some_or_null {
            ($v:expr) => {
                match $v {
                    Some(v) => write!(f, "{}", v),
                    None => f.write_str("NULL"),
                }
            };
        }
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(v) => some_or_null!(v),
            Value::Int8(v) => some_or_null!(v),
            Value::Int16(v) => some_or_null!(v),
            Value::Int32(v) => some_or_null!(v),
            Value::Int64(v) => some_or_null!(v),
            Value::Int128(v) => some_or_null!(v),
            Value::UInt8(v) => some_or_null!(v),
            Value::UInt16(v) => some_or_null!(v),
            Value::UInt32(v) => some_or_null!(v),
            Value::UInt64(v) => some_or_null!(v),
            Value::UInt128(v) => some_or_null!(v),
            Value::Float32(v) => some_or_null!(v),
            Value::Float64(v) => some_or_null!(v),
            Value::Decimal(v, ..) => some_or_null!(v),
            Value::Varchar(Some(v)) => write!(f, "'{}'", v),
            Value::Varchar(None) => f.write_str("NULL"),
            Value::Blob(Some(v)) => write!(f, "<{} bytes>", v.len()),
            Value::Blob(None) => f.write_str("NULL"),
            Value::Date(v) => some_or_null!(v),
            Value::Time(v) => some_or_null!(v),
            Value::Timestamp(v) => some_or_null!(v),
            Value::TimestampWithTimezone(v) => some_or_null!(v),
            Value::Uuid(v) => some_or_null!(v),
        }
    }
}
