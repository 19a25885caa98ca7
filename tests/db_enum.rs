#[cfg(test)]
mod tests {
    use dredge::{
        AsValue, DataType, DbEnum, FromRow, Mapper, MemoryCursor, Value, first, to_list,
    };

    #[derive(Default, Debug, Clone, Copy, PartialEq, DbEnum)]
    enum Status {
        #[default]
        Pending,
        Active = 5,
        #[dredge(rename = "gone")]
        Deleted,
    }

    #[derive(Debug, PartialEq, DbEnum)]
    #[dredge(rename_all = "snake_case")]
    enum Plan {
        FreeTier,
        ProTier,
    }

    #[derive(Default, Debug, FromRow)]
    struct Account {
        id: i64,
        status: Status,
        plan: Option<Plan>,
    }

    #[test]
    fn names_and_discriminants() {
        assert_eq!(Status::Active.name(), "Active");
        assert_eq!(Status::Deleted.name(), "gone");
        assert_eq!(Status::Deleted.discriminant(), 6);
        assert_eq!(Status::from_name("ACTIVE"), Some(Status::Active));
        assert_eq!(Status::from_discriminant(0), Some(Status::Pending));
        assert_eq!(Status::from_discriminant(3), None);
        assert_eq!(Plan::ProTier.name(), "pro_tier");
        assert_eq!(Status::Active.as_value(), Value::Int64(Some(5)));
        assert_eq!(
            Status::try_from_value(Value::Varchar(Some("gone".into()))).unwrap(),
            Status::Deleted
        );
        assert!(Status::try_from_value(Value::Varchar(Some("unknown".into()))).is_err());
    }

    #[test]
    fn enum_members_from_text_and_integers() {
        let mut cursor = MemoryCursor::new().result_set(
            [
                ("id", DataType::Int64),
                ("status", DataType::Varchar),
                ("plan", DataType::Int32),
            ],
            [
                vec![
                    Value::Int64(Some(1)),
                    Value::Varchar(Some("active".into())),
                    Value::Int32(Some(1)),
                ],
                vec![
                    Value::Int64(Some(2)),
                    Value::Varchar(Some("archived".into())),
                    Value::Int32(Some(9)),
                ],
                vec![Value::Int64(Some(3)), Value::Varchar(None), Value::Int32(None)],
            ],
        );
        let accounts =
            to_list::<Account>(&mut cursor, &Mapper::uncached(), &Default::default()).unwrap();
        assert_eq!(accounts[0].status, Status::Active);
        assert_eq!(accounts[0].plan, Some(Plan::ProTier));
        // Unknown names and discriminants leave the default
        assert_eq!(accounts[1].status, Status::Pending);
        assert_eq!(accounts[1].plan, None);
        assert_eq!(accounts[2].status, Status::Pending);
        assert_eq!(accounts[2].plan, None);
    }

    #[test]
    fn enum_as_scalar() {
        let mut cursor = MemoryCursor::new().result_set(
            [("status", DataType::Unknown)],
            [vec![Value::Varchar(Some("Gone".into()))]],
        );
        assert_eq!(
            first::<Status>(&mut cursor, &Mapper::uncached()).unwrap(),
            Status::Deleted
        );

        let schema = dredge::Schema::new([("plan", DataType::Varchar)]);
        assert!(Plan::compile(&schema, &Default::default()).is_err());

        let schema = dredge::Schema::new([("plan", DataType::Float64)]);
        assert!(Status::compile(&schema, &Default::default()).is_err());
    }
}
