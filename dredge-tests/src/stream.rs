use crate::{
    people::{SELECT_PEOPLE, expected_people},
    Address, Person,
};
use dredge::{CancellationToken, ConnectionSource, Driver, IsolationLevel, JobBuilder, Result};

pub(crate) fn stream<D: Driver>(source: &ConnectionSource<D>) {
    let expected = expected_people();

    // Read upfront, the connection is already released
    let job = JobBuilder::query(format!("{SELECT_PEOPLE} ORDER BY id"))
        .source(source.clone())
        .split::<Address>("street")
        .to_enumerable::<Person>();
    let stream = job.execute_owned().expect("Could not open the stream");
    assert!(stream.is_buffered());
    let people = stream
        .collect::<Result<Vec<_>>>()
        .expect("Could not read the stream");
    assert_eq!(people, expected);

    // Read lazily, the stream owns connection and transaction until drained
    let job = JobBuilder::query(format!("{SELECT_PEOPLE} ORDER BY id"))
        .source(source.clone())
        .isolation_level(IsolationLevel::ReadCommitted)
        .buffered(false)
        .to_enumerable::<Person>();
    let mut stream = job.execute_owned().expect("Could not open the stream");
    assert!(!stream.is_buffered());
    let first = stream
        .next()
        .expect("The stream has rows")
        .expect("Could not read the first row");
    assert_eq!(first.name, "Ann");
    assert!(!stream.is_finished());
    let rest = stream
        .by_ref()
        .collect::<Result<Vec<_>>>()
        .expect("Could not read the rest of the stream");
    assert_eq!(rest.len(), 2);
    assert!(stream.is_finished());

    // Closed early
    let mut stream = job.execute_owned().expect("Could not open the stream");
    assert!(stream.next().is_some());
    stream.close().expect("Could not close the stream");

    // Cancelled before opening
    let cancellation = CancellationToken::new();
    cancellation.cancel();
    let stream = job
        .execute_with(None, &cancellation)
        .expect("Cancelled streams are empty");
    assert_eq!(stream.count(), 0);
}
