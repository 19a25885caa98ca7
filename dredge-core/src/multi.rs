use crate::{
    AsValue, CancellationToken, Command, Connection, Context, Driver, DredgeError, Error,
    ErrorFn, ExecutionContext, FromRow, Handled, JobBuilder, JobConfig, Mapper, Outcome,
    Projection, Result, RowCursor, engine::Session, error_kind, projection::project,
};
use log::{debug, warn};
use std::{
    any::Any,
    marker::PhantomData,
    sync::{Arc, Mutex, PoisonError},
    thread,
    time::{Duration, Instant},
};

/// One sub-read of a multi-reader job.
///
/// Every command but the last runs as a non query, the last one is projected.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Branch {
    commands: Vec<Command>,
}

impl Branch {
    pub fn new(command: impl Into<Command>) -> Self {
        Self {
            commands: vec![command.into()],
        }
    }
    /// Appends a command, it becomes the projected one.
    pub fn then(mut self, command: impl Into<Command>) -> Self {
        self.commands.push(command.into());
        self
    }
    /// Binds the next positional parameter of the last command.
    pub fn bind(mut self, value: impl AsValue) -> Self {
        if let Some(command) = self.commands.last_mut() {
            command.bind_mut(value);
        }
        self
    }
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}

impl From<Command> for Branch {
    fn from(value: Command) -> Self {
        Branch::new(value)
    }
}

/// How the branches of a multi-reader job get their connection.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Each branch opens its own connection (and transaction) from the job source.
    #[default]
    Isolated,
    /// Every branch runs on one connection inside one transaction.
    Shared,
}

/// What the engine records about each branch.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct BranchMetadata {
    pub index: usize,
    pub commands: usize,
    pub rows: u64,
    pub elapsed: Duration,
    pub outcome: Outcome,
}

/// Output of a branch before being assembled into the tuple, `None` when it did not run.
pub type Part = Option<Box<dyn Any + Send>>;

type ProjectFn = fn(
    usize,
    Projection,
    &mut dyn RowCursor,
    &Mapper,
    &CancellationToken,
) -> Result<(Box<dyn Any + Send>, u64)>;

/// Tuples of row types read by a multi-reader job, one per branch.
pub trait Branches: Send + 'static {
    const ARITY: usize;
    /// `(Option<A>, Option<B>, ..)`
    type Optional: Send + 'static;
    /// `(Vec<A>, Vec<B>, ..)`
    type List: Send + 'static;

    /// Projects the cursor of branch `index` into its element type.
    fn project(
        index: usize,
        projection: Projection,
        cursor: &mut dyn RowCursor,
        mapper: &Mapper,
        cancellation: &CancellationToken,
    ) -> Result<(Box<dyn Any + Send>, u64)>;
    fn optional(parts: Vec<Part>) -> Self::Optional;
    fn list(parts: Vec<Part>) -> Self::List;
}

/// Branch tuples whose elements have a default, needed by the projections
/// that fill a missing part with it.
pub trait DefaultBranches: Branches + Sized {
    fn first(parts: Vec<Part>) -> Self;
}

/// The value of a part, the default when it is missing.
fn take<T: Default + 'static>(part: Part) -> T {
    part.and_then(|v| v.downcast::<T>().ok())
        .map(|v| *v)
        .unwrap_or_default()
}

macro_rules! impl_branches {
    ($arity:literal; $($t:ident $i:tt),+) => {
        impl<$($t: FromRow),+> Branches for ($($t,)+) {
            const ARITY: usize = $arity;
            type Optional = ($(Option<$t>,)+);
            type List = ($(Vec<$t>,)+);

            fn project(
                index: usize,
                projection: Projection,
                cursor: &mut dyn RowCursor,
                mapper: &Mapper,
                cancellation: &CancellationToken,
            ) -> Result<(Box<dyn Any + Send>, u64)> {
                match index {
                    $($i => project::<$t>(projection, cursor, mapper, cancellation),)+
                    _ => Err(DredgeError::BranchCount {
                        expected: $arity,
                        found: index + 1,
                    }
                    .into()),
                }
            }
            fn optional(parts: Vec<Part>) -> Self::Optional {
                let mut parts = parts.into_iter();
                ($(take::<Option<$t>>(parts.next().flatten()),)+)
            }
            fn list(parts: Vec<Part>) -> Self::List {
                let mut parts = parts.into_iter();
                ($(take::<Vec<$t>>(parts.next().flatten()),)+)
            }
        }

        impl<$($t: FromRow + Default),+> DefaultBranches for ($($t,)+) {
            fn first(parts: Vec<Part>) -> Self {
                let mut parts = parts.into_iter();
                ($(take::<$t>(parts.next().flatten()),)+)
            }
        }
    };
}
impl_branches!(2; A 0, B 1);
impl_branches!(3; A 0, B 1, C 2);
impl_branches!(4; A 0, B 1, C 2, D 3);
impl_branches!(5; A 0, B 1, C 2, D 3, E 4);
impl_branches!(6; A 0, B 1, C 2, D 3, E 4, F 5);
impl_branches!(7; A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_branches!(8; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

type ConfigureFn = Arc<dyn Fn() -> Result<Vec<Branch>> + Send + Sync>;
type BranchHookFn<O> = Arc<dyn Fn(&[BranchMetadata], O) -> Result<O> + Send + Sync>;

impl<D: Driver> JobBuilder<D> {
    /// A job made of independent sub-reads, `configure` returns one branch per
    /// element of `B`.
    pub fn branches<B: Branches>(
        self,
        configure: impl Fn() -> Result<Vec<Branch>> + Send + Sync + 'static,
    ) -> MultiBuilder<D, B> {
        MultiBuilder {
            config: self.config(),
            configure: Arc::new(configure),
            mode: Default::default(),
            parallel: false,
            _branches: PhantomData,
        }
    }
}

/// Chooses the connection strategy and the projection of a multi-reader job.
pub struct MultiBuilder<D: Driver, B: Branches> {
    config: JobConfig<D>,
    configure: ConfigureFn,
    mode: ConnectionMode,
    parallel: bool,
    _branches: PhantomData<fn() -> B>,
}

impl<D: Driver, B: Branches> MultiBuilder<D, B> {
    pub fn mode(mut self, mode: ConnectionMode) -> Self {
        self.mode = mode;
        self
    }
    /// Run isolated branches on their own threads.
    pub fn parallel(mut self, value: bool) -> Self {
        self.parallel = value;
        self
    }
    fn build<O: Send + 'static>(
        self,
        projection: Projection,
        assemble: fn(Vec<Part>) -> O,
    ) -> MultiJob<D, O> {
        MultiJob {
            config: self.config,
            configure: self.configure,
            mode: self.mode,
            parallel: self.parallel,
            arity: B::ARITY,
            projection,
            project: B::project,
            assemble,
            on_branch: None,
            on_error: None,
            lock: Mutex::new(()),
        }
    }
    pub fn first(self) -> MultiJob<D, B>
    where
        B: DefaultBranches,
    {
        self.build(Projection::First, B::first)
    }
    pub fn first_or_default(self) -> MultiJob<D, B::Optional> {
        self.build(Projection::FirstOrDefault, B::optional)
    }
    pub fn single(self) -> MultiJob<D, B>
    where
        B: DefaultBranches,
    {
        self.build(Projection::Single, B::first)
    }
    pub fn single_or_default(self) -> MultiJob<D, B::Optional> {
        self.build(Projection::SingleOrDefault, B::optional)
    }
    pub fn to_list(self) -> MultiJob<D, B::List> {
        self.build(Projection::List, B::list)
    }
}

/// A job assembling a tuple from several sub-reads, in declaration order.
pub struct MultiJob<D: Driver, O> {
    config: JobConfig<D>,
    configure: ConfigureFn,
    mode: ConnectionMode,
    parallel: bool,
    arity: usize,
    projection: Projection,
    project: ProjectFn,
    assemble: fn(Vec<Part>) -> O,
    on_branch: Option<BranchHookFn<O>>,
    on_error: Option<ErrorFn<O>>,
    lock: Mutex<()>,
}

impl<D: Driver, O: Send + 'static> MultiJob<D, O> {
    pub fn name(&self) -> &str {
        &self.config.name
    }
    /// Runs once after every branch completed, with their metadata in order.
    pub fn on_branch(
        mut self,
        hook: impl Fn(&[BranchMetadata], O) -> Result<O> + Send + Sync + 'static,
    ) -> Self {
        self.on_branch = Some(Arc::new(hook));
        self
    }
    /// Substitute result of a failed handled execution.
    pub fn on_error(mut self, hook: impl Fn(&Error) -> Option<O> + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }
    pub fn execute(&self, connection: &mut D::Connection) -> Result<O> {
        self.execute_with(Some(connection), &CancellationToken::new())
    }
    pub fn execute_owned(&self) -> Result<O> {
        self.execute_with(None, &CancellationToken::new())
    }
    pub fn execute_with(
        &self,
        connection: Option<&mut D::Connection>,
        cancellation: &CancellationToken,
    ) -> Result<O> {
        self.run(connection, cancellation).map(|(v, _)| v)
    }
    /// Also returns the metadata of every branch that ran.
    pub fn execute_with_metadata(
        &self,
        connection: Option<&mut D::Connection>,
        cancellation: &CancellationToken,
    ) -> Result<(O, Vec<BranchMetadata>)> {
        self.run(connection, cancellation)
    }
    pub fn try_execute(
        &self,
        connection: Option<&mut D::Connection>,
        cancellation: &CancellationToken,
    ) -> Handled<O> {
        match self.execute_with(connection, cancellation) {
            Ok(v) => Handled::Ok(v),
            Err(e) => {
                if let Some(value) = self.on_error.as_ref().and_then(|f| f(&e)) {
                    warn!("The job `{}` failed and was recovered: {e:#}", self.name());
                    return Handled::Ok(value);
                }
                if matches!(error_kind(&e), Some(DredgeError::ConnectionFailed { .. })) {
                    Handled::ConnectionFailed(e)
                } else {
                    Handled::Failed(e)
                }
            }
        }
    }
    pub async fn execute_async(self: Arc<Self>, cancellation: CancellationToken) -> Result<O> {
        tokio::task::spawn_blocking(move || self.execute_with(None, &cancellation)).await?
    }

    fn run(
        &self,
        connection: Option<&mut D::Connection>,
        cancellation: &CancellationToken,
    ) -> Result<(O, Vec<BranchMetadata>)> {
        let _lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let branches = (self.configure)()
            .with_context(|| format!("Could not configure the branches of `{}`", self.name()))?;
        if branches.len() != self.arity {
            return Err(DredgeError::BranchCount {
                expected: self.arity,
                found: branches.len(),
            }
            .into());
        }
        let mapper = self.config.mapper();
        let (parts, metadata) = if cancellation.is_cancelled() {
            debug!("The job `{}` was cancelled before starting", self.name());
            ((0..self.arity).map(|_| None).collect(), Vec::new())
        } else {
            match (self.mode, connection) {
                (ConnectionMode::Shared, connection) => {
                    self.run_shared(connection, &branches, &mapper, cancellation, true)?
                }
                (ConnectionMode::Isolated, Some(connection)) if self.config.source.is_none() => {
                    debug!(
                        "The job `{}` has no connection source, its branches share the supplied connection",
                        self.name()
                    );
                    self.run_shared(Some(connection), &branches, &mapper, cancellation, false)?
                }
                (ConnectionMode::Isolated, connection) => {
                    if connection.is_some() {
                        warn!(
                            "The branches of `{}` are isolated, the supplied connection is not used",
                            self.name()
                        );
                    }
                    if self.parallel {
                        self.run_parallel(&branches, &mapper, cancellation)?
                    } else {
                        self.run_isolated(&branches, &mapper, cancellation)?
                    }
                }
            }
        };
        let completed = metadata.len() == self.arity
            && metadata.iter().all(|v| v.outcome == Outcome::Completed);
        let mut result = (self.assemble)(parts);
        if completed && let Some(hook) = &self.on_branch {
            result = hook(&metadata, result)?;
        }
        Ok((result, metadata))
    }

    fn run_branch(
        &self,
        connection: &mut D::Connection,
        index: usize,
        branch: &Branch,
        mapper: &Mapper,
        cancellation: &CancellationToken,
    ) -> Result<(Box<dyn Any + Send>, BranchMetadata)> {
        let started = Instant::now();
        let placeholder = Command::default();
        let (last, earlier) = branch
            .commands
            .split_last()
            .unwrap_or((&placeholder, &[]));
        for command in earlier {
            connection
                .execute_non_query(command)
                .with_context(|| DredgeError::CommandExecution {
                    command: command.to_string(),
                })?;
        }
        let mut context = ExecutionContext::new(
            connection,
            last,
            index,
            self.config.behavior,
            mapper,
            cancellation,
            self.config.buffered,
        );
        let (value, rows) = (self.project)(
            index,
            self.projection,
            context.cursor()?,
            mapper,
            cancellation,
        )
        .with_context(|| format!("The branch {} of `{}` failed", index, self.name()))?;
        Ok((
            value,
            BranchMetadata {
                index,
                commands: branch.commands.len().max(1),
                rows,
                elapsed: started.elapsed(),
                outcome: if cancellation.is_cancelled() {
                    Outcome::Cancelled
                } else {
                    Outcome::Completed
                },
            },
        ))
    }

    /// One branch on its own connection and transaction.
    fn run_isolated_branch(
        &self,
        index: usize,
        branch: &Branch,
        mapper: &Mapper,
        cancellation: &CancellationToken,
    ) -> Result<(Box<dyn Any + Send>, BranchMetadata)> {
        let mut session = Session::acquire(None, self.config.source.as_ref(), self.name())?;
        if let Err(e) = session.begin(self.config.isolation) {
            session.finish(false)?;
            return Err(e);
        }
        let result = self.run_branch(session.connection(), index, branch, mapper, cancellation);
        let success = result
            .as_ref()
            .is_ok_and(|(_, v)| v.outcome == Outcome::Completed);
        session.finish(success)?;
        result
    }

    fn run_isolated(
        &self,
        branches: &[Branch],
        mapper: &Mapper,
        cancellation: &CancellationToken,
    ) -> Result<(Vec<Part>, Vec<BranchMetadata>)> {
        let mut parts: Vec<Part> = (0..branches.len()).map(|_| None).collect();
        let mut metadata = Vec::with_capacity(branches.len());
        for (index, branch) in branches.iter().enumerate() {
            if cancellation.is_cancelled() {
                break;
            }
            let (value, entry) = self.run_isolated_branch(index, branch, mapper, cancellation)?;
            parts[index] = Some(value);
            metadata.push(entry);
        }
        Ok((parts, metadata))
    }

    fn run_parallel(
        &self,
        branches: &[Branch],
        mapper: &Mapper,
        cancellation: &CancellationToken,
    ) -> Result<(Vec<Part>, Vec<BranchMetadata>)> {
        let failed = CancellationToken::new();
        let results = thread::scope(|scope| {
            let handles = branches
                .iter()
                .enumerate()
                .map(|(index, branch)| {
                    let failed = &failed;
                    scope.spawn(move || {
                        if failed.is_cancelled() || cancellation.is_cancelled() {
                            return Ok(None);
                        }
                        let result = self.run_isolated_branch(index, branch, mapper, cancellation);
                        if result.is_err() {
                            failed.cancel();
                        }
                        result.map(Some)
                    })
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .map_err(|_| Error::msg("A branch thread panicked"))?
                })
                .collect::<Vec<_>>()
        });
        let mut parts = Vec::with_capacity(branches.len());
        let mut metadata = Vec::with_capacity(branches.len());
        for result in results {
            match result? {
                Some((value, entry)) => {
                    parts.push(Some(value));
                    metadata.push(entry);
                }
                None => parts.push(None),
            }
        }
        Ok((parts, metadata))
    }

    fn run_shared(
        &self,
        connection: Option<&mut D::Connection>,
        branches: &[Branch],
        mapper: &Mapper,
        cancellation: &CancellationToken,
        concurrent: bool,
    ) -> Result<(Vec<Part>, Vec<BranchMetadata>)> {
        let mut session = Session::acquire(connection, self.config.source.as_ref(), self.name())?;
        if concurrent && !session.connection().supports_concurrent_cursors() {
            session.finish(false)?;
            return Err(Error::msg(format!(
                "The {} driver does not support concurrent cursors, use `ConnectionMode::Isolated`",
                D::NAME
            )));
        }
        if let Err(e) = session.begin(self.config.isolation) {
            session.finish(false)?;
            return Err(e);
        }
        let mut parts: Vec<Part> = (0..branches.len()).map(|_| None).collect();
        let mut metadata = Vec::with_capacity(branches.len());
        for (index, branch) in branches.iter().enumerate() {
            if cancellation.is_cancelled() {
                break;
            }
            match self.run_branch(session.connection(), index, branch, mapper, cancellation) {
                Ok((value, entry)) => {
                    parts[index] = Some(value);
                    metadata.push(entry);
                }
                Err(e) => {
                    session.finish(false)?;
                    return Err(e);
                }
            }
        }
        session.finish(!cancellation.is_cancelled())?;
        Ok((parts, metadata))
    }
}
