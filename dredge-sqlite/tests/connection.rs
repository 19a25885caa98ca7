#[cfg(test)]
mod tests {
    use dredge::{
        Command, Connection, CursorBehavior, DataType, DredgeError, FromRow, IsolationLevel,
        JobBuilder, RowCursor, Value, error_kind,
    };
    use dredge_sqlite::{SqliteConnection, SqliteDriver};
    use dredge_tests::{init_logs, silent_logs};
    use indoc::indoc;
    use rust_decimal::Decimal;
    use std::{path::Path, str::FromStr, sync::Mutex};
    use time::macros::{date, datetime};
    use tokio::fs;
    use uuid::Uuid;

    static MUTEX: Mutex<()> = Mutex::new(());

    #[derive(Default, Debug, PartialEq, FromRow)]
    struct Sample {
        id: i64,
        flag: bool,
        ratio: f64,
        payload: Option<Box<[u8]>>,
        stamp: Option<time::PrimitiveDateTime>,
        day: Option<time::Date>,
        code: Option<Uuid>,
        price: Option<Decimal>,
    }

    fn memory() -> SqliteConnection {
        let mut connection =
            SqliteConnection::connect("sqlite://:memory:").expect("Could not open the database");
        connection
            .execute_batch(indoc! {"
                CREATE TABLE sample (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    flag BOOLEAN NOT NULL,
                    ratio DOUBLE NOT NULL,
                    payload BLOB,
                    stamp DATETIME,
                    day DATE,
                    code UUID,
                    price DECIMAL(10, 2)
                );
            "})
            .expect("Could not create the table");
        connection
    }

    fn insert() -> Command {
        Command::new(
            "INSERT INTO sample (flag, ratio, payload, stamp, day, code, price) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
    }

    #[tokio::test]
    async fn create_database() {
        init_logs();
        const DB_PATH: &str = "../target/debug/creation.sqlite";
        let _guard = MUTEX.lock().unwrap();
        if Path::new(DB_PATH).exists() {
            fs::remove_file(DB_PATH).await.unwrap_or_else(|_| {
                panic!("Failed to remove test database file {DB_PATH}")
            });
        }
        assert!(
            !Path::new(DB_PATH).exists(),
            "Database file should not exist before test"
        );
        SqliteConnection::connect(&format!("sqlite://{DB_PATH}?mode=rwc"))
            .expect("Could not open the database");
        assert!(
            Path::new(DB_PATH).exists(),
            "Database file should be created after connection"
        );
        let mut connection = SqliteConnection::connect(&format!("sqlite://{DB_PATH}?mode=ro"))
            .expect("Could not open the database");
        silent_logs! {
            assert!(connection.execute_batch("CREATE TABLE t (id INTEGER)").is_err());
        }
        connection.close().expect("Could not close");
        assert!(!connection.is_open());
        connection.open().expect("Could not reopen");
        assert!(connection.is_open());
        drop(connection);
        fs::remove_file(DB_PATH).await.unwrap_or_else(|_| {
            panic!("Failed to remove existing test database file {DB_PATH}")
        });
        silent_logs! {
            assert!(
                SqliteConnection::connect(&format!("sqlite://{DB_PATH}?mode=ro")).is_err(),
                "Read only mode does not create the database"
            );
        }
    }

    #[test]
    fn connection_failures_are_typed() {
        init_logs();
        let job = JobBuilder::query("SELECT 1")
            .connect(
                SqliteDriver::new(),
                "sqlite://../target/debug/missing/dir/db.sqlite?mode=ro",
            )
            .scalar::<i64>();
        silent_logs! {
            let error = job.execute_owned().expect_err("The database does not exist");
            assert!(matches!(
                error_kind(&error),
                Some(DredgeError::ConnectionFailed { driver: "sqlite" })
            ));
        }
    }

    #[test]
    fn values_round_trip() {
        init_logs();
        let mut connection = memory();
        let stamp = datetime!(2024-02-29 13:45:07.250);
        let code = Uuid::parse_str("0e9b2e41-7a55-4c3f-8a43-25d0cbb40c51").unwrap();
        let job = JobBuilder::<SqliteDriver>::new("insert samples")
            .command(
                insert()
                    .bind(true)
                    .bind(0.5)
                    .bind(Box::<[u8]>::from([1u8, 2, 3].as_slice()))
                    .bind(stamp)
                    .bind(date!(2024 - 03 - 01))
                    .bind(code)
                    .bind(Decimal::from_str("19.99").unwrap()),
            )
            .command(
                insert()
                    .bind(false)
                    .bind(-2.0)
                    .bind(Option::<Box<[u8]>>::None)
                    .bind(Option::<time::PrimitiveDateTime>::None)
                    .bind(Option::<time::Date>::None)
                    .bind(Option::<Uuid>::None)
                    .bind(Option::<Decimal>::None),
            )
            .non_query();
        let affected = job.execute(&mut connection).expect("Could not insert");
        assert_eq!(affected.rows_affected, 2);
        assert_eq!(affected.last_affected_id, Some(2));

        let samples = JobBuilder::<SqliteDriver>::query("SELECT * FROM sample ORDER BY id")
            .to_list::<Sample>()
            .execute(&mut connection)
            .expect("Could not read the samples");
        assert_eq!(
            samples,
            [
                Sample {
                    id: 1,
                    flag: true,
                    ratio: 0.5,
                    payload: Some([1u8, 2, 3].into()),
                    stamp: Some(stamp),
                    day: Some(date!(2024 - 03 - 01)),
                    code: Some(code),
                    price: Some(Decimal::from_str("19.99").unwrap()),
                },
                Sample {
                    id: 2,
                    flag: false,
                    ratio: -2.0,
                    ..Default::default()
                },
            ]
        );
        assert!(connection.is_open());
    }

    #[test]
    fn cursor_over_statements() {
        init_logs();
        let mut connection = memory();
        let command = Command::new(indoc! {"
            INSERT INTO sample (flag, ratio) VALUES (?, ?);
            SELECT id, flag, ratio * 2 AS doubled FROM sample;
            -- trailing comment
            SELECT COUNT(*) AS total FROM sample WHERE flag = ?;
        "})
        .bind(true)
        .bind(1.5)
        .bind(false);
        let mut cursor = connection
            .execute_reader(&command, CursorBehavior::Default)
            .expect("Could not execute");
        let schema = cursor.schema().clone();
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.columns()[1].name, "flag");
        assert_eq!(schema.columns()[1].data_type, DataType::Boolean);
        assert_eq!(schema.columns()[2].data_type, DataType::Unknown);
        assert!(cursor.value(0).is_err(), "Not positioned on a row yet");
        assert!(cursor.read().unwrap());
        assert_eq!(cursor.value(0).unwrap(), Value::Int64(Some(1)));
        assert_eq!(cursor.value(1).unwrap(), Value::Boolean(Some(true)));
        assert_eq!(cursor.value(2).unwrap(), Value::Float64(Some(3.0)));
        assert!(cursor.value(3).is_err());
        assert!(!cursor.read().unwrap());
        assert!(cursor.next_result_set().unwrap());
        assert_eq!(cursor.schema().columns()[0].name, "total");
        assert!(cursor.read().unwrap());
        assert_eq!(cursor.value(0).unwrap(), Value::Int64(Some(0)));
        assert!(!cursor.next_result_set().unwrap());
        assert!(!cursor.read().unwrap());
        drop(cursor);

        let select = Command::new("SELECT id FROM sample; SELECT 42");
        let mut cursor = connection
            .execute_reader(&select, CursorBehavior::SingleResult)
            .expect("Could not execute");
        assert!(cursor.read().unwrap());
        assert!(!cursor.next_result_set().unwrap());
        drop(cursor);

        connection
            .execute_non_query(&insert().bind(false).bind(0.0).bind(Value::Null).bind(Value::Null).bind(Value::Null).bind(Value::Null).bind(Value::Null))
            .expect("Could not insert");
        let mut cursor = connection
            .execute_reader(&Command::new("SELECT id FROM sample"), CursorBehavior::SingleRow)
            .expect("Could not execute");
        assert!(cursor.read().unwrap());
        assert!(!cursor.read().unwrap());
        drop(cursor);

        assert_eq!(
            connection
                .execute_scalar(&Command::new("SELECT MAX(id) FROM sample"))
                .unwrap(),
            Value::Int64(Some(2))
        );
    }

    #[test]
    fn invalid_commands() {
        init_logs();
        let mut connection = memory();
        silent_logs! {
            let error = connection
                .execute_non_query(&Command::new("INSERT INTO sample (flag, ratio) VALUES (?, ?)").bind(true))
                .expect_err("A parameter is missing");
            assert!(format!("{error:#}").contains("parameters"));
            assert!(connection
                .execute_reader(&Command::procedure("refresh"), CursorBehavior::Default)
                .is_err());
            assert!(connection
                .execute_reader(&Command::new("SELEC 1"), CursorBehavior::Default)
                .is_err());
        }
        let empty = connection
            .execute_non_query(&Command::new("  -- nothing here\n"))
            .expect("Comments are not an error");
        assert_eq!(empty.rows_affected, 0);
        assert!(connection.is_open());
    }

    #[test]
    fn transactions() {
        init_logs();
        let mut connection = memory();
        assert!(!connection.in_transaction());
        connection
            .begin(IsolationLevel::Serializable)
            .expect("Could not begin");
        assert!(connection.in_transaction());
        connection
            .execute_non_query(&insert().bind(true).bind(1.0).bind(Value::Null).bind(Value::Null).bind(Value::Null).bind(Value::Null).bind(Value::Null))
            .expect("Could not insert");
        connection.rollback().expect("Could not roll back");
        assert!(!connection.in_transaction());

        let count = JobBuilder::<SqliteDriver>::query("SELECT COUNT(*) FROM sample")
            .isolation_level(IsolationLevel::ReadUncommitted)
            .scalar::<i64>();
        assert_eq!(count.execute(&mut connection).unwrap(), 0);
        assert!(!connection.in_transaction());
    }
}
