use crate::{
    people::{count_people, expected_people, insert_person},
    silent_logs, Person,
};
use dredge::{
    BatchJob, BatchOutput, CancellationToken, ConnectionSource, Driver, JobBuilder, RowsAffected,
    execute_all,
};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

pub(crate) fn batch<D: Driver>(source: &ConnectionSource<D>) {
    let mut newcomer = expected_people()[1].clone();
    newcomer.id = 20;
    let insert = JobBuilder::new("insert newcomer")
        .source(source.clone())
        .command(insert_person(&newcomer))
        .non_query();
    let count = JobBuilder::<D>::query("SELECT COUNT(*) FROM dredge_person")
        .name("count")
        .scalar::<i64>();
    let newest = JobBuilder::<D>::query("SELECT id, name FROM dredge_person ORDER BY id DESC")
        .name("newest")
        .first::<Person>();

    // Later jobs see the changes of the earlier ones, nothing leaks on failure
    let failures = Arc::new(AtomicUsize::new(0));
    let failing = JobBuilder::<D>::query("INSERT INTO dredge_missing_table VALUES (1)")
        .name("failing")
        .non_query()
        .on_error({
            let failures = failures.clone();
            move |_| {
                failures.fetch_add(1, Ordering::Relaxed);
                None
            }
        });
    let jobs: [&dyn BatchJob<D>; 4] = [&insert, &count, &newest, &failing];
    let entries;
    silent_logs! {
        entries = execute_all(&jobs, None, None, &CancellationToken::new(), false)
            .expect("The entries are returned when not throwing");
    }
    assert_eq!(entries.len(), 4);
    assert!(entries[..3].iter().all(|v| v.completed));
    assert!(!entries[3].completed);
    assert_eq!(entries[3].name, "failing");
    assert_eq!(failures.load(Ordering::Relaxed), 1);
    assert_eq!(count_people(source), 3);

    // Committed together
    let jobs: [&dyn BatchJob<D>; 3] = [&insert, &count, &newest];
    let mut entries = execute_all(&jobs, None, None, &CancellationToken::new(), true)
        .expect("Could not run the batch");
    assert!(entries.iter().all(|v| v.completed));
    assert!(matches!(
        entries[0].output,
        BatchOutput::Affected(RowsAffected {
            rows_affected: 1,
            ..
        })
    ));
    let newest = entries
        .pop()
        .and_then(|v| v.output.downcast::<Person>())
        .expect("The last output is a person");
    assert_eq!(newest.id, 20);
    assert_eq!(newest.name, "Bob");
    let counted = entries
        .pop()
        .and_then(|v| v.output.downcast::<i64>())
        .expect("The second output is the count");
    assert_eq!(counted, 4);
    assert_eq!(count_people(source), 4);

    let removed = JobBuilder::query("DELETE FROM dredge_person WHERE id = ?")
        .source(source.clone())
        .bind(20i64)
        .non_query()
        .execute_owned()
        .expect("Could not remove the newcomer");
    assert_eq!(removed.rows_affected, 1);

    // Cancelled before starting, nothing runs
    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let entries = execute_all(&[&insert as &dyn BatchJob<D>], None, None, &cancelled, true)
        .expect("A cancelled batch is not an error");
    assert!(entries.is_empty());
    assert_eq!(count_people(source), 3);
}
