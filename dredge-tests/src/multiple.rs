use crate::{
    people::{SELECT_PEOPLE, expected_people},
    Address, Person,
};
#[cfg(not(feature = "disable-concurrent-cursors"))]
use dredge::ConnectionMode;
use dredge::{Branch, Command, ConnectionSource, Driver, JobBuilder, Outcome};

pub(crate) fn multiple<D: Driver>(source: &ConnectionSource<D>) {
    let expected = expected_people();

    // Lists extend across the commands of a job
    let people = JobBuilder::new("two reads")
        .source(source.clone())
        .command(Command::new(format!("{SELECT_PEOPLE} WHERE id = ?")).bind(3i64))
        .command(Command::new(format!("{SELECT_PEOPLE} WHERE id = ?")).bind(1i64))
        .split::<Address>("street")
        .to_list::<Person>()
        .on_executed(|metadata, result| {
            assert_eq!(metadata.rows, 1);
            assert_eq!(result.len(), metadata.index + 1);
            Ok(result)
        })
        .execute_owned()
        .expect("Could not read two people");
    assert_eq!(people, [expected[2].clone(), expected[0].clone()]);

    // Several statements in one command are several result sets
    #[cfg(not(feature = "disable-multiple-statements"))]
    {
        let numbers = JobBuilder::query("SELECT 1 AS n; SELECT 2 AS n UNION ALL SELECT 3")
            .source(source.clone())
            .to_list::<i64>()
            .execute_owned()
            .expect("Could not read the numbers");
        assert_eq!(numbers, [1, 2, 3]);
    }

    // Branches in declaration order, each on its own connection
    let job = JobBuilder::new("dashboard")
        .source(source.clone())
        .split::<Address>("street")
        .branches::<(Person, i64, String)>(|| {
            Ok(vec![
                Branch::new(format!("{SELECT_PEOPLE} WHERE id = ?")).bind(2i64),
                Branch::new("SELECT COUNT(*) FROM dredge_person"),
                Branch::new("SELECT name FROM dredge_person ORDER BY id"),
            ])
        })
        .first()
        .on_branch(|metadata, result| {
            assert_eq!(metadata.len(), 3);
            assert!(metadata.iter().all(|v| v.outcome == Outcome::Completed));
            Ok(result)
        });
    let (bob, count, first) = job.execute_owned().expect("Could not read the dashboard");
    assert_eq!(bob, expected[1]);
    assert_eq!(count, 3);
    assert_eq!(first, "Ann");

    let job = JobBuilder::new("parallel dashboard")
        .source(source.clone())
        .branches::<(i64, String)>(|| {
            Ok(vec![
                Branch::new("SELECT id FROM dredge_person ORDER BY id DESC"),
                Branch::new("SELECT city FROM dredge_person WHERE city IS NOT NULL ORDER BY city"),
            ])
        })
        .parallel(true)
        .to_list();
    let (ids, cities) = job.execute_owned().expect("Could not read in parallel");
    assert_eq!(ids, [3, 2, 1]);
    assert_eq!(cities, ["Shelbyville", "Springfield"]);

    // One connection and one transaction for every branch
    #[cfg(not(feature = "disable-concurrent-cursors"))]
    {
        let job = JobBuilder::new("shared dashboard")
            .source(source.clone())
            .branches::<(Person, i64)>(|| {
                Ok(vec![
                    Branch::new(format!("{SELECT_PEOPLE} WHERE id = ?")).bind(42i64),
                    Branch::new("SELECT MAX(id) FROM dredge_person"),
                ])
            })
            .mode(ConnectionMode::Shared)
            .single_or_default();
        let (nobody, max) = job
            .execute_owned()
            .expect("Could not read the shared dashboard");
        assert_eq!(nobody, None);
        assert_eq!(max, Some(3));
    }
}
