use crate::{
    CancellationToken, CommandMetadata, ConnectionSource, Driver, Error,
    IsolationLevel, Job, Outcome, Result, RowLabeled, RowsAffected, Value, engine::Session,
};
use log::{debug, error};
use std::{
    any::Any,
    fmt::{self, Debug},
    sync::PoisonError,
};

/// Result of one job of a batch.
pub enum BatchOutput {
    Rows(Vec<RowLabeled>),
    Scalar(Value),
    Affected(RowsAffected),
    /// Any other result type, recover it with `downcast`.
    Value(Box<dyn Any + Send>),
    Empty,
}

impl BatchOutput {
    fn from_any(value: Box<dyn Any + Send>) -> Self {
        let value = match value.downcast::<Vec<RowLabeled>>() {
            Ok(v) => return BatchOutput::Rows(*v),
            Err(v) => v,
        };
        let value = match value.downcast::<Value>() {
            Ok(v) => return BatchOutput::Scalar(*v),
            Err(v) => v,
        };
        let value = match value.downcast::<RowsAffected>() {
            Ok(v) => return BatchOutput::Affected(*v),
            Err(v) => v,
        };
        if value.is::<()>() {
            return BatchOutput::Empty;
        }
        BatchOutput::Value(value)
    }
    /// The result of a job whose output is not one of the tagged cases.
    pub fn downcast<T: 'static>(self) -> Option<T> {
        match self {
            BatchOutput::Value(v) => v.downcast::<T>().ok().map(|v| *v),
            _ => None,
        }
    }
}

impl Debug for BatchOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchOutput::Rows(v) => f.debug_tuple("Rows").field(v).finish(),
            BatchOutput::Scalar(v) => f.debug_tuple("Scalar").field(v).finish(),
            BatchOutput::Affected(v) => f.debug_tuple("Affected").field(v).finish(),
            BatchOutput::Value(..) => f.write_str("Value(..)"),
            BatchOutput::Empty => f.write_str("Empty"),
        }
    }
}

/// What a batch returns for each attempted job.
#[derive(Debug)]
pub struct BatchEntry {
    pub name: String,
    pub metadata: Vec<CommandMetadata>,
    pub output: BatchOutput,
    /// False for the job that failed or was cancelled.
    pub completed: bool,
}

/// Type erased job runnable inside [`execute_all`].
pub trait BatchJob<D: Driver>: Send + Sync {
    fn name(&self) -> &str;
    fn source(&self) -> Option<&ConnectionSource<D>>;
    fn isolation_level(&self) -> Option<IsolationLevel>;
    /// Runs the job on a connection already inside the batch transaction.
    fn run_in_batch(
        &self,
        connection: &mut D::Connection,
        cancellation: &CancellationToken,
        metadata: &mut Vec<CommandMetadata>,
    ) -> Result<(BatchOutput, Outcome)>;
    /// Tells the job the batch failed. The returned output, if any, replaces
    /// the output of the job that failed when the batch does not throw.
    fn notify_error(&self, error: &Error) -> Option<BatchOutput>;
}

impl<D: Driver, R: Send + 'static> BatchJob<D> for Job<D, R> {
    fn name(&self) -> &str {
        &self.config.name
    }
    fn source(&self) -> Option<&ConnectionSource<D>> {
        self.config.source.as_ref()
    }
    fn isolation_level(&self) -> Option<IsolationLevel> {
        self.config.isolation
    }
    fn run_in_batch(
        &self,
        connection: &mut D::Connection,
        cancellation: &CancellationToken,
        metadata: &mut Vec<CommandMetadata>,
    ) -> Result<(BatchOutput, Outcome)> {
        let _lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let seed = (self.init)();
        if cancellation.is_cancelled() {
            return Ok((BatchOutput::from_any(Box::new(seed)), Outcome::Cancelled));
        }
        let (value, outcome) = self.run_commands(connection, seed, cancellation, metadata)?;
        Ok((BatchOutput::from_any(Box::new(value)), outcome))
    }
    fn notify_error(&self, error: &Error) -> Option<BatchOutput> {
        let hook = self.error.as_ref()?;
        hook(error).map(|value| BatchOutput::from_any(Box::new(value)))
    }
}

/// Runs `jobs` in order on one connection inside one transaction.
///
/// Without a `connection` one is created from the first job's source and
/// closed at the end. The transaction uses `isolation_level`, else the first
/// job's level; a transaction already open on the connection is joined. On
/// failure the transaction is rolled back and every attempted job sees the
/// error through `on_error`; then the error is returned, or with
/// `throw_on_error = false` the entries collected so far are. In that case a
/// value returned by the failed job's `on_error` becomes its output.
pub fn execute_all<D: Driver>(
    jobs: &[&dyn BatchJob<D>],
    connection: Option<&mut D::Connection>,
    isolation_level: Option<IsolationLevel>,
    cancellation: &CancellationToken,
    throw_on_error: bool,
) -> Result<Vec<BatchEntry>> {
    let Some(first) = jobs.first() else {
        return Ok(Vec::new());
    };
    let mut session = Session::acquire(connection, first.source(), first.name())?;
    let isolation = isolation_level
        .or(first.isolation_level())
        .unwrap_or_default();
    if let Err(e) = session.begin(Some(isolation)) {
        session.finish(false)?;
        return Err(e);
    }
    let mut entries = Vec::with_capacity(jobs.len());
    let mut failure = None;
    let mut cancelled = false;
    for job in jobs {
        if cancellation.is_cancelled() {
            cancelled = true;
            break;
        }
        let mut metadata = Vec::new();
        match job.run_in_batch(session.connection(), cancellation, &mut metadata) {
            Ok((output, outcome)) => {
                cancelled |= outcome == Outcome::Cancelled;
                entries.push(BatchEntry {
                    name: job.name().into(),
                    metadata,
                    output,
                    completed: outcome == Outcome::Completed,
                });
                if cancelled {
                    break;
                }
            }
            Err(e) => {
                entries.push(BatchEntry {
                    name: job.name().into(),
                    metadata,
                    output: BatchOutput::Empty,
                    completed: false,
                });
                failure = Some(e);
                break;
            }
        }
    }
    match failure {
        None => {
            if cancelled {
                debug!("The batch was cancelled, rolling back");
            }
            session.finish(!cancelled)?;
            Ok(entries)
        }
        Some(e) => {
            error!("The batch failed and was rolled back: {e:#}");
            session.finish(false)?;
            let mut substitute = None;
            for job in &jobs[..entries.len()] {
                substitute = job.notify_error(&e);
            }
            if throw_on_error {
                return Err(e);
            }
            if let (Some(output), Some(entry)) = (substitute, entries.last_mut()) {
                entry.output = output;
            }
            Ok(entries)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BatchJob, BatchOutput, execute_all};
    use crate::{
        CancellationToken, JobBuilder, Value,
        testing::Script,
    };
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    fn script() -> Script {
        Script::new().numbers("a", &[1, 2])
    }

    #[test]
    fn jobs_share_one_transaction() {
        let script = script();
        let insert = JobBuilder::query("INSERT")
            .name("insert")
            .connect(script.clone(), "memory")
            .non_query();
        let read = JobBuilder::<Script>::query("a").to_list::<i64>();
        let count = JobBuilder::<Script>::query("a").scalar::<Value>();
        let jobs: [&dyn BatchJob<Script>; 3] = [&insert, &read, &count];
        let entries = execute_all(&jobs, None, None, &CancellationToken::new(), true).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|v| v.completed));
        assert_eq!(entries[0].name, "insert");
        assert!(matches!(
            entries[0].output,
            BatchOutput::Affected(v) if v.rows_affected == 1
        ));
        assert_eq!(entries[1].metadata.len(), 1);
        assert!(matches!(
            &entries[2].output,
            BatchOutput::Scalar(Value::Int64(Some(1)))
        ));
        let mut entries = entries;
        let list = entries.swap_remove(1).output.downcast::<Vec<i64>>();
        assert_eq!(list, Some(vec![1, 2]));
        assert_eq!(
            script.log(),
            [
                "connect",
                "begin Unspecified",
                "execute INSERT",
                "read a",
                "read a",
                "commit",
                "close",
            ]
        );
    }

    #[test]
    fn failure_rolls_back_everything() {
        let script = script();
        let notified = Arc::new(AtomicUsize::new(0));
        let insert = JobBuilder::query("INSERT")
            .connect(script.clone(), "memory")
            .non_query()
            .on_error({
                let notified = notified.clone();
                move |_| {
                    notified.fetch_add(1, Ordering::Relaxed);
                    None
                }
            });
        let broken = JobBuilder::<Script>::query("FAIL")
            .to_list::<i64>()
            .on_error({
                let notified = notified.clone();
                move |_| {
                    notified.fetch_add(1, Ordering::Relaxed);
                    None
                }
            });
        let never = JobBuilder::<Script>::query("a").to_list::<i64>();
        let jobs: [&dyn BatchJob<Script>; 3] = [&insert, &broken, &never];

        let entries = execute_all(&jobs, None, None, &CancellationToken::new(), false).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].completed);
        assert!(!entries[1].completed);
        assert!(matches!(entries[1].output, BatchOutput::Empty));
        assert_eq!(notified.load(Ordering::Relaxed), 2);
        let log = script.log();
        assert!(log.contains(&"rollback".to_string()));
        assert!(!log.contains(&"commit".to_string()));
        assert!(!log.contains(&"read a".to_string()));

        assert!(execute_all(&jobs, None, None, &CancellationToken::new(), true).is_err());
        assert_eq!(notified.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn error_hook_replaces_failed_output() {
        let script = script();
        let insert = JobBuilder::query("INSERT")
            .connect(script.clone(), "memory")
            .non_query()
            .on_error(|_| Some(Default::default()));
        let broken = JobBuilder::<Script>::query("FAIL")
            .to_list::<i64>()
            .on_error(|_| Some(vec![-1]));
        let jobs: [&dyn BatchJob<Script>; 2] = [&insert, &broken];

        let mut entries =
            execute_all(&jobs, None, None, &CancellationToken::new(), false).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(
            entries[0].output,
            BatchOutput::Affected(v) if v.rows_affected == 1
        ));
        assert!(!entries[1].completed);
        let output = entries.pop().unwrap().output;
        assert_eq!(output.downcast::<Vec<i64>>(), Some(vec![-1]));

        assert!(execute_all(&jobs, None, None, &CancellationToken::new(), true).is_err());
    }

    #[test]
    fn cancelled_batch_is_rolled_back() {
        let script = script();
        let mut connection = crate::Driver::connect(&script, "memory").unwrap();
        let read = JobBuilder::<Script>::query("a").to_list::<i64>();
        let jobs: [&dyn BatchJob<Script>; 1] = [&read];
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let entries = execute_all(&jobs, Some(&mut connection), None, &cancellation, true).unwrap();
        assert!(entries.is_empty());
        assert_eq!(script.log(), ["connect", "begin Unspecified", "rollback"]);
    }

    #[test]
    fn empty_batch() {
        let jobs: [&dyn BatchJob<Script>; 0] = [];
        assert!(
            execute_all(&jobs, None, None, &CancellationToken::new(), true)
                .unwrap()
                .is_empty()
        );
    }
}
