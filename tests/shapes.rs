#[cfg(test)]
mod tests {
    use dredge::{
        DataType, DredgeError, FromRow, Mapper, MappingSettings, MemoryCursor, RowLabeled,
        Schema, Value, error_kind, first, single, single_or_default, to_list,
    };
    use rust_decimal::Decimal;
    use std::collections::{BTreeMap, HashMap, HashSet, LinkedList};
    use time::macros::{date, datetime};
    use uuid::Uuid;

    fn row(columns: &[(&str, DataType)], values: Vec<Value>) -> MemoryCursor {
        MemoryCursor::new().result_set(columns.iter().copied(), [values])
    }

    #[test]
    fn dictionaries_keep_every_column() {
        let cursor = || {
            row(
                &[
                    ("id", DataType::Int64),
                    ("name", DataType::Varchar),
                    ("id", DataType::Int32),
                    ("note", DataType::Varchar),
                ],
                vec![
                    Value::Int64(Some(1)),
                    Value::Varchar(Some("Ann".into())),
                    Value::Int32(Some(2)),
                    Value::Varchar(None),
                ],
            )
        };
        let mapper = Mapper::uncached();
        let map = first::<HashMap<String, Value>>(&mut cursor(), &mapper).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map["id"], Value::Int64(Some(1)));
        assert_eq!(map["note"], Value::Null);

        let map = first::<BTreeMap<String, Value>>(&mut cursor(), &mapper).unwrap();
        assert_eq!(
            map.keys().map(String::as_str).collect::<Vec<_>>(),
            ["id", "name", "note"]
        );

        let labeled = first::<RowLabeled>(&mut cursor(), &mapper).unwrap();
        assert_eq!(labeled.len(), 4);
        assert_eq!(labeled.names()[2], "id");
        assert_eq!(labeled.values()[3], Value::Null);
        assert_eq!(labeled.get_column("NAME"), Some(&Value::Varchar(Some("Ann".into()))));
    }

    #[test]
    fn scalars_convert_the_first_column() {
        let mapper = Mapper::uncached();
        let mut cursor = row(&[("n", DataType::Int16)], vec![Value::Int16(Some(300))]);
        assert_eq!(first::<u64>(&mut cursor, &mapper).unwrap(), 300);

        let mut cursor = row(&[("n", DataType::Int16)], vec![Value::Int16(Some(300))]);
        let error = first::<u8>(&mut cursor, &mapper).unwrap_err();
        assert!(format!("{error:#}").contains("out of range"));

        let mut cursor = row(&[("d", DataType::Varchar)], vec![Value::Varchar(Some("12.50".into()))]);
        assert_eq!(
            first::<Decimal>(&mut cursor, &mapper).unwrap(),
            Decimal::new(1250, 2)
        );

        let mut cursor = row(&[("d", DataType::Varchar)], vec![Value::Varchar(Some("2024-02-29".into()))]);
        assert_eq!(first::<time::Date>(&mut cursor, &mapper).unwrap(), date!(2024 - 02 - 29));

        let mut cursor = row(
            &[("t", DataType::Varchar)],
            vec![Value::Varchar(Some("2024-02-29 10:30:00".into()))],
        );
        assert_eq!(
            first::<time::PrimitiveDateTime>(&mut cursor, &mapper).unwrap(),
            datetime!(2024-02-29 10:30:00)
        );

        let id = Uuid::from_u128(0x0123_4567_89ab_cdef_0123_4567_89ab_cdef);
        let mut cursor = row(&[("u", DataType::Varchar)], vec![Value::Varchar(Some(id.to_string()))]);
        assert_eq!(first::<Uuid>(&mut cursor, &mapper).unwrap(), id);

        let mut cursor = row(&[("u", DataType::Varchar)], vec![Value::Varchar(Some("not an id".into()))]);
        assert_eq!(first::<Uuid>(&mut cursor, &mapper).unwrap(), Uuid::nil());

        let mut cursor = row(&[("b", DataType::Int32)], vec![Value::Int32(Some(2))]);
        assert!(first::<bool>(&mut cursor, &mapper).unwrap());

        let mut cursor = row(&[("s", DataType::Varchar)], vec![Value::Varchar(None)]);
        assert_eq!(first::<Option<String>>(&mut cursor, &mapper).unwrap(), None);
    }

    #[test]
    fn single_counts_every_result_set() {
        let mapper = Mapper::uncached();
        let cursor = || {
            MemoryCursor::new()
                .result_set([("n", DataType::Int64)], [vec![Value::Int64(Some(1))]])
                .result_set([("n", DataType::Int64)], [vec![Value::Int64(Some(2))]])
        };
        assert_eq!(first::<i64>(&mut cursor(), &mapper).unwrap(), 1);
        let error = single::<i64>(&mut cursor(), &mapper).unwrap_err();
        assert!(matches!(
            error_kind(&error),
            Some(DredgeError::MultipleResults { .. })
        ));
        let mut empty = MemoryCursor::new().result_set([("n", DataType::Int64)], Vec::new());
        assert_eq!(single_or_default::<i64>(&mut empty, &mapper).unwrap(), None);
        assert_eq!(
            to_list::<i64>(&mut cursor(), &mapper, &Default::default()).unwrap(),
            [1, 2]
        );
    }

    #[test]
    fn collections_are_not_row_shapes() {
        let schema = Schema::new([("n", DataType::Int64)]);
        let settings = MappingSettings::new();
        assert!(Vec::<i64>::compile(&schema, &settings).is_err());
        assert!(LinkedList::<i64>::compile(&schema, &settings).is_err());
        assert!(HashSet::<i64>::compile(&schema, &settings).is_err());
    }
}
