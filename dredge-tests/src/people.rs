use crate::silent_logs;
use dredge::{
    CancellationToken, Command, ConnectionSource, DbEnum, DredgeError, Driver, FromRow,
    JobBuilder, RowLabeled, Value, error_kind,
};
use indoc::indoc;
use rust_decimal::Decimal;
use std::{collections::BTreeMap, str::FromStr, sync::Arc};
use time::{Date, macros::date};
use uuid::Uuid;

#[derive(Default, Debug, Clone, Copy, PartialEq, DbEnum)]
pub enum Status {
    #[default]
    Pending,
    Active,
    Suspended,
}

#[derive(Default, Debug, Clone, PartialEq, FromRow)]
pub struct Address {
    pub street: String,
    pub city: String,
}

#[derive(Default, Debug, Clone, PartialEq, FromRow)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub status: Status,
    pub born: Option<Date>,
    pub balance: Decimal,
    pub token: Option<Uuid>,
    #[dredge(nested)]
    pub address: Option<Address>,
}

pub(crate) const SELECT_PEOPLE: &str =
    "SELECT id, name, status, born, balance, token, street, city FROM dredge_person";

pub(crate) fn expected_people() -> Vec<Person> {
    vec![
        Person {
            id: 1,
            name: "Ann".into(),
            status: Status::Active,
            born: Some(date!(1990 - 05 - 17)),
            balance: Decimal::from_str("12.5").unwrap(),
            token: Some(Uuid::from_str("6f3b8f2e-2f4e-4d9b-9a7a-3c1d2b4e5f60").unwrap()),
            address: Some(Address {
                street: "Main St 1".into(),
                city: "Springfield".into(),
            }),
        },
        Person {
            id: 2,
            name: "Bob".into(),
            status: Status::Suspended,
            born: None,
            balance: Decimal::from(100),
            token: None,
            address: Some(Address {
                street: "Elm St 7".into(),
                city: "Shelbyville".into(),
            }),
        },
        Person {
            id: 3,
            name: "Carla".into(),
            status: Status::Pending,
            born: Some(date!(2001 - 12 - 03)),
            balance: Decimal::from_str("7.25").unwrap(),
            token: None,
            address: None,
        },
    ]
}

pub(crate) fn insert_person(person: &Person) -> Command {
    let address = person.address.clone();
    Command::new(
        "INSERT INTO dredge_person (id, name, status, born, balance, token, street, city) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(person.id)
    .bind(person.name.clone())
    .bind(person.status)
    .bind(person.born)
    .bind(person.balance)
    .bind(person.token)
    .bind(address.as_ref().map(|v| v.street.clone()))
    .bind(address.map(|v| v.city))
}

pub(crate) fn count_people<D: Driver>(source: &ConnectionSource<D>) -> i64 {
    JobBuilder::query("SELECT COUNT(*) FROM dredge_person")
        .name("count people")
        .source(source.clone())
        .scalar::<i64>()
        .execute_owned()
        .expect("Could not count the people")
}

pub(crate) fn setup_people<D: Driver>(source: &ConnectionSource<D>) {
    let mut setup = JobBuilder::new("setup people")
        .source(source.clone())
        .command("DROP TABLE IF EXISTS dredge_person")
        .command(indoc! {"
            CREATE TABLE dredge_person (
                id INTEGER PRIMARY KEY,
                name VARCHAR(60) NOT NULL,
                status INTEGER NOT NULL,
                born DATE,
                balance DECIMAL(12, 2) NOT NULL,
                token UUID,
                street VARCHAR(80),
                city VARCHAR(80)
            )
        "});
    for person in expected_people() {
        setup = setup.command(insert_person(&person));
    }
    let affected = setup
        .non_query()
        .execute_owned()
        .expect("Could not create the people");
    assert_eq!(affected.rows_affected, 3);
}

pub(crate) async fn people<D: Driver>(source: &ConnectionSource<D>) {
    let expected = expected_people();

    // Record with a nested address after the split column
    let job = JobBuilder::query(format!("{SELECT_PEOPLE} WHERE id = ?"))
        .name("person by id")
        .source(source.clone())
        .bind(1i64)
        .split::<Address>("street")
        .first::<Person>();
    let ann = job.execute_owned().expect("Could not read Ann");
    assert_eq!(ann, expected[0]);

    // Every row, a null address range leaves the member empty
    let everybody = JobBuilder::query(format!("{SELECT_PEOPLE} ORDER BY id"))
        .source(source.clone())
        .split::<Address>("street")
        .to_list::<Person>()
        .execute_owned()
        .expect("Could not read the people");
    assert_eq!(everybody, expected);

    // Without the split the address is not read
    let everybody = JobBuilder::query(format!("{SELECT_PEOPLE} ORDER BY id"))
        .source(source.clone())
        .to_list::<Person>()
        .execute_owned()
        .expect("Could not read the people");
    assert!(everybody.iter().all(|v| v.address.is_none()));
    assert_eq!(everybody[1].name, "Bob");

    // Aliased column
    let bob = JobBuilder::query("SELECT id, name AS full_name FROM dredge_person WHERE id = ?")
        .source(source.clone())
        .bind(2i64)
        .alias::<Person>("full_name", "name")
        .single::<Person>()
        .execute_owned()
        .expect("Could not read Bob");
    assert_eq!(bob.id, 2);
    assert_eq!(bob.name, "Bob");
    assert_eq!(bob.status, Status::Pending);

    // Scalars
    assert_eq!(count_people(source), 3);
    let total = JobBuilder::query("SELECT SUM(balance) FROM dredge_person")
        .source(source.clone())
        .scalar::<f64>()
        .execute_owned()
        .expect("Could not sum the balances");
    assert_eq!(total, 119.75);
    let missing = JobBuilder::query("SELECT name FROM dredge_person WHERE id = ?")
        .source(source.clone())
        .bind(42i64)
        .scalar::<String>()
        .execute_owned()
        .expect("Could not read a missing name");
    assert_eq!(missing, "");
    let names = JobBuilder::query("SELECT name FROM dredge_person ORDER BY name DESC")
        .source(source.clone())
        .to_list::<String>()
        .execute_owned()
        .expect("Could not read the names");
    assert_eq!(names, ["Carla", "Bob", "Ann"]);
    let statuses = JobBuilder::query("SELECT status FROM dredge_person ORDER BY id")
        .source(source.clone())
        .to_list::<Status>()
        .execute_owned()
        .expect("Could not read the statuses");
    assert_eq!(
        statuses,
        [Status::Active, Status::Suspended, Status::Pending]
    );

    // Schema less rows
    let rows = JobBuilder::query("SELECT id, name FROM dredge_person ORDER BY id")
        .source(source.clone())
        .to_list::<RowLabeled>()
        .execute_owned()
        .expect("Could not read the labeled rows");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2].names(), ["id", "name"]);
    assert_eq!(
        rows[2].get_column("NAME"),
        Some(&Value::Varchar(Some("Carla".into())))
    );
    let maps = JobBuilder::query("SELECT id, city FROM dredge_person WHERE id = ?")
        .source(source.clone())
        .bind(3i64)
        .to_list::<BTreeMap<String, Value>>()
        .execute_owned()
        .expect("Could not read the dictionaries");
    assert_eq!(maps.len(), 1);
    assert!(maps[0].get("city").is_some_and(Value::is_null));

    // Cardinality
    let nobody = JobBuilder::query(format!("{SELECT_PEOPLE} WHERE id > ?"))
        .source(source.clone())
        .bind(100i64)
        .first_or_default::<Person>()
        .execute_owned()
        .expect("Could not read nobody");
    assert_eq!(nobody, None);
    silent_logs! {
        let error = JobBuilder::query(format!("{SELECT_PEOPLE} WHERE id > ?"))
            .source(source.clone())
            .bind(100i64)
            .first::<Person>()
            .execute_owned()
            .expect_err("Expected no rows");
        assert!(matches!(error_kind(&error), Some(DredgeError::EmptyResult { .. })));
        let error = JobBuilder::query(SELECT_PEOPLE)
            .source(source.clone())
            .single::<Person>()
            .execute_owned()
            .expect_err("Expected several rows");
        assert!(matches!(error_kind(&error), Some(DredgeError::MultipleResults { .. })));
        let error = JobBuilder::query("SELECT id FROM dredge_person")
            .source(source.clone())
            .strict(true)
            .to_list::<Person>()
            .execute_owned()
            .expect_err("Expected unmapped members");
        assert!(matches!(error_kind(&error), Some(DredgeError::UnmappedMember { .. })));
        let error = JobBuilder::query("SELECT name FROM dredge_person")
            .source(source.clone())
            .to_list::<i64>()
            .execute_owned()
            .expect_err("Expected a type mismatch");
        assert!(matches!(error_kind(&error), Some(DredgeError::TypeMismatch { .. })));
        let error = JobBuilder::query("SELECT * FROM dredge_missing_table")
            .source(source.clone())
            .to_list::<Person>()
            .execute_owned()
            .expect_err("Expected the command to fail");
        assert!(matches!(error_kind(&error), Some(DredgeError::CommandExecution { .. })));
    }

    // Off the calling thread
    let job = Arc::new(
        JobBuilder::query(format!("{SELECT_PEOPLE} WHERE status = ?"))
            .source(source.clone())
            .bind(Status::Suspended)
            .to_list::<Person>(),
    );
    let suspended = job
        .clone()
        .execute_async(CancellationToken::new())
        .await
        .expect("Could not read the suspended people");
    assert_eq!(suspended.len(), 1);
    assert_eq!(suspended[0].id, 2);
    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let nothing = job
        .execute_async(cancelled)
        .await
        .expect("A cancelled job returns its seed");
    assert!(nothing.is_empty());
}
