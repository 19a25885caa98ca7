use crate::{
    AsValue, Assigner, CompileScope, Context, DredgeError, MappingSettings, Materializer, Member,
    MemberKind, Nested, Record, Result, Schema, ShapeId, mapping::scalar_column, util::same_name,
};
use log::debug;
use std::{any, ops::Range};

/// Materializer of a scalar shape reading the first column.
///
/// Null cells and values rejected by the lenient conversion produce `fallback()`.
pub fn compile_scalar<T: AsValue + Send + 'static>(
    schema: &Schema,
    fallback: fn() -> T,
) -> Result<Materializer<T>> {
    let column = scalar_column::<T>(schema)?;
    Ok(Materializer::new(move |cursor| {
        Ok(T::from_column(cursor.value(column)?)?.unwrap_or_else(fallback))
    }))
}

/// Materializer of a structured record.
pub fn compile_record<T: Record>(
    schema: &Schema,
    settings: &MappingSettings,
) -> Result<Materializer<T>> {
    let shape = ShapeId::of::<T>();
    ensure_constructible::<T>()?;
    let mut scope = CompileScope::default();
    scope.visited.push(shape);
    let range = 0..range_end(schema, settings, 0);
    let assigners = compile_members::<T>(schema, settings, range, None, &mut scope)?;
    debug!(
        "Compiled the plan of `{}` with {} assigned members over {} columns",
        shape,
        assigners.len(),
        schema.len()
    );
    Ok(Materializer::new(move |cursor| {
        let mut result = instance::<T>()?;
        for assign in &assigners {
            assign(&mut result, cursor)?;
        }
        Ok(result)
    }))
}

/// Assigner of a nested record member, `None` when its type has no split
/// (the member keeps its default).
pub fn compile_nested<P: Record, N: Nested>(
    schema: &Schema,
    settings: &MappingSettings,
    scope: &mut CompileScope,
    field: &'static str,
    column: &'static str,
    set: fn(&mut P, N),
) -> Result<Option<Assigner<P>>> {
    let shape = ShapeId::of::<N::Inner>();
    if scope.visited(shape) {
        debug!(
            "Skipping `{}::{}`, `{}` was already visited",
            ShapeId::of::<P>(),
            field,
            shape
        );
        return Ok(None);
    }
    let Some(split) = settings.split_of(shape) else {
        debug!(
            "Skipping `{}::{}`, no split column for `{}`",
            ShapeId::of::<P>(),
            field,
            shape
        );
        return Ok(None);
    };
    let Some(start) = schema.position(split) else {
        if settings.strict {
            return Err(DredgeError::UnmappedMember {
                shape: any::type_name::<P>(),
                member: field.into(),
            })
            .context(format!("The split column `{split}` is not in the result set"));
        }
        debug!(
            "Skipping `{}::{}`, the split column `{}` is not in the result set",
            ShapeId::of::<P>(),
            field,
            split
        );
        return Ok(None);
    };
    ensure_constructible::<N::Inner>()?;
    scope.visited.push(shape);
    let range = start..range_end(schema, settings, start);
    let prefix = if settings.use_declared_field_names {
        column
    } else {
        field
    };
    let assigners =
        compile_members::<N::Inner>(schema, settings, range.clone(), Some(prefix), scope)?;
    Ok(Some(Box::new(move |parent, cursor| {
        let mut all_null = true;
        for i in range.clone() {
            if !cursor.value(i)?.is_null() {
                all_null = false;
                break;
            }
        }
        let inner = if all_null {
            None
        } else {
            let mut inner = instance::<N::Inner>()?;
            for assign in &assigners {
                assign(&mut inner, cursor)?;
            }
            Some(inner)
        };
        if let Some(value) = N::wrap(inner) {
            set(parent, value);
        }
        Ok(())
    })))
}

fn compile_members<T: Record>(
    schema: &Schema,
    settings: &MappingSettings,
    range: Range<usize>,
    prefix: Option<&str>,
    scope: &mut CompileScope,
) -> Result<Vec<Assigner<T>>> {
    let shape = ShapeId::of::<T>();
    let mut result: Vec<Assigner<T>> = Vec::new();
    for member in T::members() {
        match &member.kind {
            MemberKind::Value(descriptor) => {
                let Some(column) = resolve(schema, settings, shape, member, range.clone(), prefix)
                else {
                    if settings.strict {
                        return Err(DredgeError::UnmappedMember {
                            shape: shape.name(),
                            member: member.field.into(),
                        }
                        .into());
                    }
                    debug!(
                        "Member `{}::{}` does not match any column, it is skipped",
                        shape, member.field
                    );
                    continue;
                };
                let column = &schema.columns()[column];
                if !(descriptor.accepts)(column.data_type) {
                    return Err(DredgeError::TypeMismatch {
                        shape: shape.name(),
                        member: member.field.into(),
                        column: column.name.clone(),
                        expected: (descriptor.data_type)(),
                        found: column.data_type,
                    }
                    .into());
                }
                let ordinal = column.ordinal;
                let name = column.name.clone();
                let field = member.field;
                let assign = descriptor.assign;
                result.push(Box::new(move |target, cursor| {
                    let value = cursor.value(ordinal)?;
                    if value.is_null() {
                        return Ok(());
                    }
                    assign(target, value.clone()).with_context(|| DredgeError::ValueOutOfRange {
                        shape: shape.name(),
                        member: field.into(),
                        column: name.clone(),
                        value: value.to_string(),
                    })
                }));
            }
            MemberKind::Nested(descriptor) => {
                if let Some(assign) = (descriptor.compile)(schema, settings, scope)? {
                    result.push(assign);
                }
            }
        }
    }
    Ok(result)
}

/// Ordinal of the column feeding `member` inside `range`.
fn resolve<T>(
    schema: &Schema,
    settings: &MappingSettings,
    shape: ShapeId,
    member: &Member<T>,
    range: Range<usize>,
    prefix: Option<&str>,
) -> Option<usize> {
    let name = if settings.use_declared_field_names {
        member.column
    } else {
        member.field
    };
    if let Some(alias) = settings
        .aliased_column(shape, member.field)
        .or_else(|| settings.aliased_column(shape, member.column))
    {
        return schema.find(alias, range).map(|c| c.ordinal);
    }
    schema
        .find(name, range.clone())
        .or_else(|| {
            let prefix = prefix?;
            schema.columns()[range.start.min(schema.len())..range.end.min(schema.len())]
                .iter()
                .find(|c| {
                    c.name.len() == prefix.len() + 1 + name.len()
                        && c.name.is_char_boundary(prefix.len())
                        && c.name.is_char_boundary(prefix.len() + 1)
                        && same_name(&c.name[..prefix.len()], prefix)
                        && c.name[prefix.len()..].starts_with('_')
                        && same_name(&c.name[prefix.len() + 1..], name)
                })
        })
        .map(|c| c.ordinal)
}

/// End of the column range starting at `start`: the next split column or the row end.
fn range_end(schema: &Schema, settings: &MappingSettings, start: usize) -> usize {
    settings
        .splits
        .values()
        .filter_map(|split| schema.position(split))
        .filter(|position| *position > start)
        .min()
        .unwrap_or(schema.len())
}

fn ensure_constructible<T: Record>() -> Result<()> {
    if T::construct().is_none() {
        return Err(DredgeError::UnsupportedShape {
            shape: any::type_name::<T>(),
            reason: "the record has no zero-argument constructor (implement `Default`)".into(),
        }
        .into());
    }
    Ok(())
}

fn instance<T: Record>() -> Result<T> {
    T::construct().ok_or_else(|| {
        DredgeError::UnsupportedShape {
            shape: any::type_name::<T>(),
            reason: "the record has no zero-argument constructor (implement `Default`)".into(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use crate::{
        DataType, DredgeError, FromRow, MappingSettings, Materializer, Member, MemoryCursor,
        Record, Result, RowCursor, Schema, Value, compile_record, error_kind,
        testing::{Address, Person, people},
    };
    use std::collections::VecDeque;

    fn read_one<T: FromRow>(mut cursor: MemoryCursor, settings: &MappingSettings) -> Result<T> {
        let materializer = T::compile(cursor.schema(), settings)?;
        assert!(cursor.read()?);
        materializer.materialize(&cursor)
    }

    fn with_address(street: Value, city: Value) -> MemoryCursor {
        MemoryCursor::new().result_set(
            [
                ("Id", DataType::Int64),
                ("Name", DataType::Varchar),
                ("Address_Street", DataType::Varchar),
                ("Address_City", DataType::Varchar),
            ],
            [vec![
                Value::Int64(Some(1)),
                Value::Varchar(Some("Ann".into())),
                street,
                city,
            ]],
        )
    }

    #[test]
    fn nested_record_after_split() {
        let settings = MappingSettings::new().split::<Address>("Address_Street");
        let person: Person = read_one(
            with_address(
                Value::Varchar(Some("Main St".into())),
                Value::Varchar(Some("Springfield".into())),
            ),
            &settings,
        )
        .unwrap();
        assert_eq!(
            person,
            Person {
                id: 1,
                name: "Ann".into(),
                address: Some(Address {
                    street: "Main St".into(),
                    city: "Springfield".into(),
                }),
            }
        );
    }

    #[test]
    fn null_nested_range_leaves_none() {
        let settings = MappingSettings::new().split::<Address>("Address_Street");
        let person: Person = read_one(
            with_address(Value::Varchar(None), Value::Null),
            &settings,
        )
        .unwrap();
        assert_eq!(person.name, "Ann");
        assert_eq!(person.address, None);
    }

    #[test]
    fn nested_without_split_is_skipped() {
        let person: Person = read_one(
            with_address(Value::Varchar(Some("Main St".into())), Value::Null),
            &MappingSettings::new(),
        )
        .unwrap();
        assert_eq!(person.id, 1);
        assert_eq!(person.address, None);
    }

    #[test]
    fn columns_match_ignoring_case() {
        let person: Person = read_one(people(&[(7, "Bob")]), &MappingSettings::new()).unwrap();
        assert_eq!(person.id, 7);
        assert_eq!(person.name, "Bob");
    }

    #[test]
    fn unmatched_members_keep_defaults() {
        let cursor = MemoryCursor::new().result_set(
            [("name", DataType::Varchar), ("extra", DataType::Int32)],
            [vec![Value::Varchar(Some("Eve".into())), Value::Int32(Some(3))]],
        );
        let person: Person = read_one(cursor, &MappingSettings::new()).unwrap();
        assert_eq!(person.id, 0);
        assert_eq!(person.name, "Eve");
    }

    #[test]
    fn strict_rejects_unmatched_members() {
        let cursor = MemoryCursor::new().result_set([("id", DataType::Int64)], [vec![
            Value::Int64(Some(1)),
        ]]);
        let error = read_one::<Person>(cursor, &MappingSettings::new().strict(true)).unwrap_err();
        assert!(matches!(
            error_kind(&error),
            Some(DredgeError::UnmappedMember { member, .. }) if member == "name"
        ));
    }

    #[test]
    fn strict_requires_the_split_column() {
        let settings = MappingSettings::new()
            .split::<Address>("Address_Street")
            .strict(true);
        let error = read_one::<Person>(people(&[(1, "Ann")]), &settings).unwrap_err();
        assert!(matches!(
            error_kind(&error),
            Some(DredgeError::UnmappedMember { member, .. }) if member == "address"
        ));
    }

    #[test]
    fn incompatible_column_type() {
        let schema = Schema::new([("id", DataType::Blob), ("name", DataType::Varchar)]);
        let error = Person::compile(&schema, &MappingSettings::new()).unwrap_err();
        let Some(DredgeError::TypeMismatch {
            member,
            expected,
            found,
            ..
        }) = error_kind(&error)
        else {
            panic!("Unexpected error: {error:#}");
        };
        assert_eq!(member, "id");
        assert_eq!(*expected, DataType::Int64);
        assert_eq!(*found, DataType::Blob);
    }

    #[test]
    fn out_of_range_value() {
        #[derive(Default, Debug)]
        struct Small {
            n: i8,
        }
        impl Record for Small {
            fn construct() -> Option<Self> {
                Some(Self::default())
            }
            fn members() -> &'static [Member<Self>] {
                static MEMBERS: [Member<Small>; 1] = [value_member!(Small, n: i8, "n")];
                &MEMBERS
            }
        }
        impl FromRow for Small {
            fn compile(schema: &Schema, settings: &MappingSettings) -> Result<Materializer<Self>> {
                compile_record(schema, settings)
            }
        }
        let cursor = MemoryCursor::new().result_set([("n", DataType::Int64)], [vec![
            Value::Int64(Some(1000)),
        ]]);
        let error = read_one::<Small>(cursor, &MappingSettings::new()).unwrap_err();
        assert!(matches!(
            error_kind(&error),
            Some(DredgeError::ValueOutOfRange { column, .. }) if column == "n"
        ));
    }

    #[test]
    fn alias_redirects_a_member() {
        let cursor = MemoryCursor::new().result_set(
            [("person_id", DataType::Int64), ("full_name", DataType::Varchar)],
            [vec![Value::Int64(Some(4)), Value::Varchar(Some("Zoe".into()))]],
        );
        let settings = MappingSettings::new()
            .alias::<Person>("person_id", "id")
            .alias::<Person>("full_name", "name");
        let person: Person = read_one(cursor, &settings).unwrap();
        assert_eq!(person.id, 4);
        assert_eq!(person.name, "Zoe");
    }

    #[test]
    fn records_need_a_constructor() {
        struct Opaque;
        impl Record for Opaque {
            fn construct() -> Option<Self> {
                None
            }
            fn members() -> &'static [Member<Self>] {
                &[]
            }
        }
        let error = compile_record::<Opaque>(&Schema::default(), &MappingSettings::new())
            .unwrap_err();
        assert!(matches!(
            error_kind(&error),
            Some(DredgeError::UnsupportedShape { .. })
        ));
    }

    #[test]
    fn collections_are_unsupported() {
        let schema = Schema::new([("n", DataType::Int64)]);
        for error in [
            Vec::<i64>::compile(&schema, &MappingSettings::new()).unwrap_err(),
            VecDeque::<String>::compile(&schema, &MappingSettings::new()).unwrap_err(),
        ] {
            assert!(matches!(
                error_kind(&error),
                Some(DredgeError::UnsupportedShape { .. })
            ));
        }
    }

    #[test]
    fn scalar_reads_the_first_column() {
        let cursor = MemoryCursor::new().result_set(
            [("a", DataType::Int32), ("b", DataType::Varchar)],
            [vec![Value::Int32(Some(5)), Value::Varchar(Some("x".into()))]],
        );
        let value: i64 = read_one(cursor, &MappingSettings::new()).unwrap();
        assert_eq!(value, 5);

        let cursor = MemoryCursor::new().result_set([("a", DataType::Int32)], [vec![
            Value::Int32(None),
        ]]);
        assert_eq!(read_one::<i32>(cursor.clone(), &MappingSettings::new()).unwrap(), 0);
        assert_eq!(
            read_one::<Option<i32>>(cursor, &MappingSettings::new()).unwrap(),
            None
        );

        let schema = Schema::new([("a", DataType::Varchar)]);
        assert!(i32::compile(&schema, &MappingSettings::new()).is_err());
    }
}
