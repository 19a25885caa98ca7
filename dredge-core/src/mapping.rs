use crate::{
    AsValue, DataType, DredgeError, MappingSettings, Result, RowCursor, RowLabeled, Schema,
    ShapeId, Value, compile_scalar,
};
use rust_decimal::Decimal;
use std::{
    any,
    collections::{BTreeMap, BTreeSet, HashMap, HashSet, LinkedList, VecDeque},
    fmt::{self, Debug},
    sync::Arc,
};
use uuid::Uuid;

/// Compiled function turning the current row of a cursor into a `T`.
///
/// Built once per `(shape, schema, settings)` and shared through the
/// [`PlanCache`](crate::PlanCache). Cloning is cheap.
pub struct Materializer<T> {
    function: Arc<dyn Fn(&dyn RowCursor) -> Result<T> + Send + Sync>,
}

impl<T> Materializer<T> {
    pub fn new(function: impl Fn(&dyn RowCursor) -> Result<T> + Send + Sync + 'static) -> Self {
        Self {
            function: Arc::new(function),
        }
    }
    /// Materializes the row the cursor is positioned on.
    pub fn materialize(&self, cursor: &dyn RowCursor) -> Result<T> {
        (self.function)(cursor)
    }
}

impl<T> Clone for Materializer<T> {
    fn clone(&self) -> Self {
        Self {
            function: self.function.clone(),
        }
    }
}

impl<T> Debug for Materializer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Materializer<{}>", any::type_name::<T>())
    }
}

/// Types that can be produced from a row.
///
/// Scalars read the first column, records resolve their members by column
/// name, dictionaries take every column.
pub trait FromRow: Sized + Send + 'static {
    /// Builds the materializer of `Self` for rows shaped like `schema`.
    fn compile(schema: &Schema, settings: &MappingSettings) -> Result<Materializer<Self>>;
}

/// Structured record, usually implemented through `#[derive(FromRow)]`.
pub trait Record: Sized + Send + 'static {
    /// Fresh instance whose members get assigned, `None` when the type has no
    /// zero-argument constructor.
    fn construct() -> Option<Self>;
    /// Writable members in declaration order.
    fn members() -> &'static [Member<Self>];
}

/// Descriptor of a writable member of a record.
pub struct Member<T: 'static> {
    /// Rust field name.
    pub field: &'static str,
    /// Declared column name.
    pub column: &'static str,
    pub kind: MemberKind<T>,
}

pub enum MemberKind<T: 'static> {
    /// Read from a single column.
    Value(ValueMember<T>),
    /// Nested record with its own column range.
    Nested(NestedMember<T>),
}

pub struct ValueMember<T> {
    pub data_type: fn() -> DataType,
    /// Whether a column of the given declared type can be converted.
    pub accepts: fn(DataType) -> bool,
    /// Assigns a non null value, conversions failures are errors.
    pub assign: fn(&mut T, Value) -> Result<()>,
}

pub struct NestedMember<T> {
    pub shape: fn() -> ShapeId,
    pub compile: fn(&Schema, &MappingSettings, &mut CompileScope) -> Result<Option<Assigner<T>>>,
}

/// Compiled assignment of one member from the current row.
pub type Assigner<T> = Box<dyn Fn(&mut T, &dyn RowCursor) -> Result<()> + Send + Sync>;

/// Record types already visited along one compile path.
#[derive(Default, Debug)]
pub struct CompileScope {
    pub(crate) visited: Vec<ShapeId>,
}

impl CompileScope {
    pub fn visited(&self, shape: ShapeId) -> bool {
        self.visited.contains(&shape)
    }
}

/// Member types holding a nested record: the record itself, `Option<R>` or `Box<R>`.
pub trait Nested: Sized + Send + 'static {
    type Inner: Record;
    /// Value to assign given the materialized record, `None` when every
    /// column of the nested range is null. Returning `None` leaves the member
    /// untouched.
    fn wrap(inner: Option<Self::Inner>) -> Option<Self>;
}

impl<N: Nested> Nested for Option<N> {
    type Inner = N::Inner;
    fn wrap(inner: Option<Self::Inner>) -> Option<Self> {
        Some(N::wrap(inner))
    }
}

impl<N: Nested> Nested for Box<N> {
    type Inner = N::Inner;
    fn wrap(inner: Option<Self::Inner>) -> Option<Self> {
        N::wrap(inner).map(Box::new)
    }
}

/// Converts and assigns a column value, used by the derived member descriptors.
///
/// Nulls and values the lenient conversion rejects leave `target` untouched.
pub fn assign_member<V: AsValue>(target: &mut V, value: Value) -> Result<()> {
    if let Some(v) = V::from_column(value)? {
        *target = v;
    }
    Ok(())
}

/// Declared type of a member, used by the derived member descriptors.
pub fn member_data_type<V: AsValue>() -> DataType {
    V::as_empty_value().data_type()
}

macro_rules! impl_from_row_scalar {
    (@impl $ty:ty, []) => {
        impl_from_row_scalar!(@impl $ty, [Default::default]);
    };
    (@impl $ty:ty, [$fallback:expr]) => {
        impl FromRow for $ty {
            fn compile(schema: &Schema, _settings: &MappingSettings) -> Result<Materializer<Self>> {
                compile_scalar::<Self>(schema, $fallback)
            }
        }
    };
    ($($ty:ty $(=> $fallback:expr)?),+ $(,)?) => {
        $(impl_from_row_scalar!(@impl $ty, [$($fallback)?]);)+
    };
}
impl_from_row_scalar!(
    bool,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
    Box<[u8]>,
    Decimal,
    Uuid,
    Value,
    time::Date => || time::OffsetDateTime::UNIX_EPOCH.date(),
    time::Time => || time::Time::MIDNIGHT,
    time::PrimitiveDateTime => || {
        time::PrimitiveDateTime::new(time::OffsetDateTime::UNIX_EPOCH.date(), time::Time::MIDNIGHT)
    },
    time::OffsetDateTime => || time::OffsetDateTime::UNIX_EPOCH,
);

impl<T: AsValue + Send + 'static> FromRow for Option<T> {
    fn compile(schema: &Schema, _settings: &MappingSettings) -> Result<Materializer<Self>> {
        let column = scalar_column::<Self>(schema)?;
        Ok(Materializer::new(move |cursor| {
            Ok(T::from_column(cursor.value(column)?)?)
        }))
    }
}

/// Checks the first column against the scalar type `T`.
pub(crate) fn scalar_column<T: AsValue + 'static>(schema: &Schema) -> Result<usize> {
    let shape = any::type_name::<T>();
    let Some(column) = schema.get(0) else {
        return Err(DredgeError::UnsupportedShape {
            shape,
            reason: "the result set has no columns".into(),
        }
        .into());
    };
    if !T::accepts(column.data_type) {
        return Err(DredgeError::TypeMismatch {
            shape,
            member: "0".into(),
            column: column.name.clone(),
            expected: T::as_empty_value().data_type(),
            found: column.data_type,
        }
        .into());
    }
    Ok(0)
}

macro_rules! impl_from_row_collection {
    ($($ty:ident),+ $(,)?) => {
        $(
            impl<T: Send + 'static> FromRow for $ty<T> {
                fn compile(_schema: &Schema, _settings: &MappingSettings) -> Result<Materializer<Self>> {
                    Err(DredgeError::UnsupportedShape {
                        shape: any::type_name::<Self>(),
                        reason: "collections cannot be materialized from a single row".into(),
                    }
                    .into())
                }
            }
        )+
    };
}
impl_from_row_collection!(Vec, VecDeque, LinkedList, HashSet, BTreeSet);

impl FromRow for RowLabeled {
    fn compile(schema: &Schema, _settings: &MappingSettings) -> Result<Materializer<Self>> {
        let names = schema.names();
        Ok(Materializer::new(move |cursor| {
            let values = (0..names.len())
                .map(|i| cursor.value(i).map(null_to_null))
                .collect::<Result<_>>()?;
            Ok(RowLabeled::new(names.clone(), values))
        }))
    }
}

macro_rules! impl_from_row_dictionary {
    ($($ty:ident),+ $(,)?) => {
        $(
            impl FromRow for $ty<String, Value> {
                fn compile(schema: &Schema, _settings: &MappingSettings) -> Result<Materializer<Self>> {
                    let names = schema.names();
                    Ok(Materializer::new(move |cursor| {
                        let mut result = $ty::new();
                        for (i, name) in names.iter().enumerate() {
                            if !result.contains_key(name) {
                                result.insert(name.clone(), null_to_null(cursor.value(i)?));
                            }
                        }
                        Ok(result)
                    }))
                }
            }
        )+
    };
}
impl_from_row_dictionary!(HashMap, BTreeMap);

/// Typed nulls become `Value::Null` in schema-less rows.
fn null_to_null(value: Value) -> Value {
    if value.is_null() { Value::Null } else { value }
}
