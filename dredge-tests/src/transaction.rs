use crate::{
    people::{count_people, expected_people, insert_person},
    silent_logs, Person, Status,
};
use dredge::{
    Connection, ConnectionSource, DredgeError, Driver, IsolationLevel, JobBuilder, error_kind,
};

fn newcomer(id: i64) -> Person {
    Person {
        id,
        name: format!("Newcomer {id}"),
        status: Status::Pending,
        ..expected_people()[2].clone()
    }
}

pub(crate) fn transaction<D: Driver>(source: &ConnectionSource<D>) {
    // A failing command undoes the ones before it
    let job = JobBuilder::new("insert twice")
        .source(source.clone())
        .isolation_level(IsolationLevel::Serializable)
        .command(insert_person(&newcomer(10)))
        .command(insert_person(&expected_people()[0]))
        .non_query();
    silent_logs! {
        let error = job.execute_owned().expect_err("The primary key is duplicated");
        assert!(matches!(error_kind(&error), Some(DredgeError::CommandExecution { .. })));
    }
    assert_eq!(count_people(source), 3);

    // Committed on success
    let affected = JobBuilder::new("insert one")
        .source(source.clone())
        .isolation_level(IsolationLevel::ReadCommitted)
        .command(insert_person(&newcomer(11)))
        .non_query()
        .execute_owned()
        .expect("Could not insert the newcomer");
    assert_eq!(affected.rows_affected, 1);
    assert_eq!(count_people(source), 4);

    // The job joins the transaction of the caller, which decides its fate
    let mut connection = source.connect().expect("Could not connect");
    connection
        .begin(IsolationLevel::Unspecified)
        .expect("Could not begin");
    let job = JobBuilder::<D>::new("delete newcomers")
        .isolation_level(IsolationLevel::Serializable)
        .command("DELETE FROM dredge_person WHERE id >= ?")
        .bind(10i64)
        .non_query();
    let affected = job
        .execute(&mut connection)
        .expect("Could not delete the newcomers");
    assert_eq!(affected.rows_affected, 1);
    assert!(connection.in_transaction());
    connection.rollback().expect("Could not roll back");
    assert!(connection.is_open());
    assert_eq!(count_people(source), 4);

    let affected = job
        .execute(&mut connection)
        .expect("Could not delete the newcomers");
    assert_eq!(affected.rows_affected, 1);
    assert!(!connection.in_transaction());
    connection.close().expect("Could not close the connection");
    assert_eq!(count_people(source), 3);
}
