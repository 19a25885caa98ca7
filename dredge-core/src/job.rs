use crate::{
    AsValue, Command, CommandMetadata, Connection, Context, CursorBehavior, Driver, DredgeError,
    Error, ExecutionContext, FromRow, IsolationLevel, Mapper, MappingSettings, PlanCache, Result,
    RowsAffected,
};
use log::{debug, warn};
use std::{
    marker::PhantomData,
    sync::{Arc, Mutex},
    time::Duration,
};

pub type CommandsFn<C> = Arc<dyn Fn(&C) -> Result<Vec<Command>> + Send + Sync>;
pub type InitFn<R> = Arc<dyn Fn() -> R + Send + Sync>;
pub type ExecuteFn<C, R> =
    Arc<dyn Fn(&mut ExecutionContext<'_, C>, R) -> Result<R> + Send + Sync>;
pub type ExecutedFn<R> = Arc<dyn Fn(&CommandMetadata, R) -> Result<R> + Send + Sync>;
pub type CompletedFn<R> = Arc<dyn Fn(R) -> Result<R> + Send + Sync>;
pub type ErrorFn<R> = Arc<dyn Fn(&Error) -> Option<R> + Send + Sync>;

/// Where the engine gets a connection when the caller does not supply one.
pub struct ConnectionSource<D: Driver> {
    driver: Arc<D>,
    url: String,
}

impl<D: Driver> ConnectionSource<D> {
    pub fn new(driver: D, url: impl Into<String>) -> Self {
        Self::shared(Arc::new(driver), url)
    }
    pub fn shared(driver: Arc<D>, url: impl Into<String>) -> Self {
        Self {
            driver,
            url: url.into(),
        }
    }
    pub fn driver(&self) -> &D {
        &self.driver
    }
    pub fn url(&self) -> &str {
        &self.url
    }
    /// A new open connection.
    pub fn connect(&self) -> Result<D::Connection> {
        let mut connection = self
            .driver
            .connect(&self.url)
            .with_context(|| DredgeError::ConnectionFailed { driver: D::NAME })?;
        if !connection.is_open() {
            connection
                .open()
                .with_context(|| DredgeError::ConnectionFailed { driver: D::NAME })?;
        }
        Ok(connection)
    }
}

impl<D: Driver> Clone for ConnectionSource<D> {
    fn clone(&self) -> Self {
        Self {
            driver: self.driver.clone(),
            url: self.url.clone(),
        }
    }
}

/// Options shared by every kind of job.
pub(crate) struct JobConfig<D: Driver> {
    pub(crate) name: String,
    pub(crate) source: Option<ConnectionSource<D>>,
    pub(crate) commands: CommandsFn<D::Connection>,
    pub(crate) settings: Arc<MappingSettings>,
    pub(crate) buffered: bool,
    pub(crate) cache: bool,
    pub(crate) plan_cache: Arc<PlanCache>,
    pub(crate) isolation: Option<IsolationLevel>,
    pub(crate) behavior: CursorBehavior,
}

impl<D: Driver> JobConfig<D> {
    pub(crate) fn mapper(&self) -> Mapper {
        Mapper::new(
            self.cache.then(|| self.plan_cache.clone()),
            self.settings.clone(),
        )
    }
    /// The commands to run, never empty.
    pub(crate) fn build_commands(&self, connection: &D::Connection) -> Result<Vec<Command>> {
        let mut commands = (self.commands)(connection)
            .with_context(|| format!("Could not build the commands of the job `{}`", self.name))?;
        if commands.is_empty() {
            debug!(
                "The job `{}` produced no commands, running an empty one",
                self.name
            );
            commands.push(Command::default());
        }
        Ok(commands)
    }
}

impl<D: Driver> Clone for JobConfig<D> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            source: self.source.clone(),
            commands: self.commands.clone(),
            settings: self.settings.clone(),
            buffered: self.buffered,
            cache: self.cache,
            plan_cache: self.plan_cache.clone(),
            isolation: self.isolation,
            behavior: self.behavior,
        }
    }
}

/// Fluent configuration of a job, finished by a projection.
///
/// ```rust,ignore
/// let job = JobBuilder::query("SELECT id, name FROM person WHERE id = ?")
///     .connect(SqliteDriver::new(), "sqlite://people.db")
///     .bind(7i64)
///     .first::<Person>();
/// let person = job.execute_owned()?;
/// ```
pub struct JobBuilder<D: Driver> {
    pub(crate) name: String,
    pub(crate) source: Option<ConnectionSource<D>>,
    pub(crate) commands: Vec<Command>,
    pub(crate) builder: Option<CommandsFn<D::Connection>>,
    pub(crate) settings: MappingSettings,
    pub(crate) buffered: bool,
    pub(crate) cache: bool,
    pub(crate) plan_cache: Option<Arc<PlanCache>>,
    pub(crate) isolation: Option<IsolationLevel>,
    pub(crate) behavior: CursorBehavior,
    pub(crate) timeout: Option<Duration>,
}

fn with_timeout(commands: &mut [Command], timeout: Duration) {
    for command in commands {
        command.timeout.get_or_insert(timeout);
    }
}

impl<D: Driver> JobBuilder<D> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
            commands: Vec::new(),
            builder: None,
            settings: Default::default(),
            buffered: true,
            cache: true,
            plan_cache: None,
            isolation: None,
            behavior: Default::default(),
            timeout: None,
        }
    }
    /// A job running a single query.
    pub fn query(text: impl Into<String>) -> Self {
        Self::new("query").command(Command::new(text))
    }
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
    /// Connections are created from `driver` when the caller supplies none.
    pub fn connect(self, driver: D, url: impl Into<String>) -> Self {
        self.source(ConnectionSource::new(driver, url))
    }
    pub fn source(mut self, source: ConnectionSource<D>) -> Self {
        self.source = Some(source);
        self
    }
    pub fn command(mut self, command: impl Into<Command>) -> Self {
        self.commands.push(command.into());
        self
    }
    /// Binds the next positional parameter of the last command.
    pub fn bind(mut self, value: impl AsValue) -> Self {
        match self.commands.last_mut() {
            Some(command) => {
                command.bind_mut(value);
            }
            None => warn!(
                "The job `{}` has no command to bind the value to, it is ignored",
                self.name
            ),
        }
        self
    }
    /// Builds the commands for each execution, replaces the fixed ones.
    pub fn commands(
        mut self,
        builder: impl Fn(&D::Connection) -> Result<Vec<Command>> + Send + Sync + 'static,
    ) -> Self {
        self.builder = Some(Arc::new(builder));
        self
    }
    pub fn settings(mut self, settings: MappingSettings) -> Self {
        self.settings = settings;
        self
    }
    pub fn alias<T: ?Sized + 'static>(
        mut self,
        column: impl Into<String>,
        member: impl Into<String>,
    ) -> Self {
        self.settings = self.settings.alias::<T>(column, member);
        self
    }
    pub fn split<T: ?Sized + 'static>(mut self, column: impl Into<String>) -> Self {
        self.settings = self.settings.split::<T>(column);
        self
    }
    pub fn strict(mut self, value: bool) -> Self {
        self.settings.strict = value;
        self
    }
    /// Lists and streams read every row before returning (default `true`).
    pub fn buffered(mut self, value: bool) -> Self {
        self.buffered = value;
        self
    }
    /// Use the plan cache (default `true`).
    pub fn cache(mut self, value: bool) -> Self {
        self.cache = value;
        self
    }
    /// Cache of the compiled plans, defaults to [`PlanCache::shared`].
    pub fn plan_cache(mut self, cache: Arc<PlanCache>) -> Self {
        self.plan_cache = Some(cache);
        self
    }
    /// Run inside a transaction unless the connection already is in one.
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }
    pub fn behavior(mut self, behavior: CursorBehavior) -> Self {
        self.behavior = behavior;
        self
    }
    /// Timeout of the commands that do not set their own.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn config(self) -> JobConfig<D> {
        let timeout = self.timeout;
        let commands: CommandsFn<D::Connection> = match (self.builder, timeout) {
            (Some(builder), None) => builder,
            (Some(builder), Some(timeout)) => {
                Arc::new(move |connection: &D::Connection| -> Result<Vec<Command>> {
                    let mut commands = builder(connection)?;
                    with_timeout(&mut commands, timeout);
                    Ok(commands)
                })
            }
            (None, timeout) => {
                let mut commands = self.commands;
                if let Some(timeout) = timeout {
                    with_timeout(&mut commands, timeout);
                }
                Arc::new(move |_: &D::Connection| -> Result<Vec<Command>> {
                    Ok(commands.clone())
                })
            }
        };
        JobConfig {
            name: self.name,
            source: self.source,
            commands,
            settings: Arc::new(self.settings),
            buffered: self.buffered,
            cache: self.cache,
            plan_cache: self.plan_cache.unwrap_or_else(PlanCache::shared),
            isolation: self.isolation,
            behavior: self.behavior,
        }
    }

    /// Custom projection: `init` seeds the result, `execute` folds each command into it.
    pub fn read<R: Send + 'static>(
        self,
        init: impl Fn() -> R + Send + Sync + 'static,
        execute: impl Fn(&mut ExecutionContext<'_, D::Connection>, R) -> Result<R>
        + Send
        + Sync
        + 'static,
    ) -> Job<D, R> {
        Job::new(self.config(), Arc::new(init), Arc::new(execute))
    }
    /// First row, failing when there is none.
    pub fn first<T: FromRow + Default>(self) -> Job<D, T> {
        self.read(T::default, |context, _| context.first::<T>())
    }
    pub fn first_or_default<T: FromRow>(self) -> Job<D, Option<T>> {
        self.read(|| None, |context, _| context.first_or_default::<T>())
    }
    /// Exactly one row across every result set.
    pub fn single<T: FromRow + Default>(self) -> Job<D, T> {
        self.read(T::default, |context, _| context.single::<T>())
    }
    pub fn single_or_default<T: FromRow>(self) -> Job<D, Option<T>> {
        self.read(|| None, |context, _| context.single_or_default::<T>())
    }
    /// Every row of every command.
    pub fn to_list<T: FromRow>(self) -> Job<D, Vec<T>> {
        self.read(Vec::new, |context, mut result| {
            result.extend(context.to_list::<T>()?);
            Ok(result)
        })
    }
    /// First column of the first row, the default value for null or no rows.
    pub fn scalar<T: AsValue + Default + Send + 'static>(self) -> Job<D, T> {
        self.read(T::default, |context, _| context.scalar(T::default))
    }
    /// Rows affected, summed across the commands.
    pub fn non_query(self) -> Job<D, RowsAffected> {
        self.read(RowsAffected::default, |context, mut result| {
            result.extend([context.non_query()?]);
            Ok(result)
        })
    }
    /// Rows as a [`RowStream`](crate::RowStream), read lazily when not buffered.
    pub fn to_enumerable<T: FromRow>(self) -> StreamJob<D, T> {
        StreamJob {
            config: self.config(),
            lock: Mutex::new(()),
            _type: PhantomData,
        }
    }
}

/// A configured query producing an `R`, executable any number of times.
///
/// Executions of the same instance are serialized.
pub struct Job<D: Driver, R> {
    pub(crate) config: JobConfig<D>,
    pub(crate) init: InitFn<R>,
    pub(crate) execute: ExecuteFn<D::Connection, R>,
    pub(crate) executed: Option<ExecutedFn<R>>,
    pub(crate) completed: Option<CompletedFn<R>>,
    pub(crate) error: Option<ErrorFn<R>>,
    pub(crate) lock: Mutex<()>,
}

impl<D: Driver, R: Send + 'static> Job<D, R> {
    pub(crate) fn new(
        config: JobConfig<D>,
        init: InitFn<R>,
        execute: ExecuteFn<D::Connection, R>,
    ) -> Self {
        Self {
            config,
            init,
            execute,
            executed: None,
            completed: None,
            error: None,
            lock: Mutex::new(()),
        }
    }
    pub fn name(&self) -> &str {
        &self.config.name
    }
    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.config.isolation
    }
    pub fn source(&self) -> Option<&ConnectionSource<D>> {
        self.config.source.as_ref()
    }
    /// Replaces the seed of the result.
    pub fn on_init(mut self, init: impl Fn() -> R + Send + Sync + 'static) -> Self {
        self.init = Arc::new(init);
        self
    }
    /// Runs after each command, can rewrite the result.
    pub fn on_executed(
        mut self,
        hook: impl Fn(&CommandMetadata, R) -> Result<R> + Send + Sync + 'static,
    ) -> Self {
        self.executed = Some(Arc::new(hook));
        self
    }
    /// Runs once after every command completed, can rewrite the result.
    pub fn on_completed(mut self, hook: impl Fn(R) -> Result<R> + Send + Sync + 'static) -> Self {
        self.completed = Some(Arc::new(hook));
        self
    }
    /// Substitute result of a failed handled execution (`try_execute`).
    pub fn on_error(mut self, hook: impl Fn(&Error) -> Option<R> + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(hook));
        self
    }
}

/// A job producing a [`RowStream`](crate::RowStream).
pub struct StreamJob<D: Driver, T> {
    pub(crate) config: JobConfig<D>,
    pub(crate) lock: Mutex<()>,
    _type: PhantomData<fn() -> T>,
}

impl<D: Driver, T> StreamJob<D, T> {
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

#[cfg(test)]
mod tests {
    use super::JobBuilder;
    use crate::{Command, Driver, testing::Script};
    use std::time::Duration;

    #[test]
    fn timeout_applies_to_every_command() {
        let connection = Script::new().connect("memory").unwrap();
        let fixed = JobBuilder::<Script>::new("fixed")
            .command("a")
            .command(Command::new("b").timeout(Duration::from_secs(1)))
            .timeout(Duration::from_secs(5))
            .config()
            .build_commands(&connection)
            .unwrap();
        let built = JobBuilder::<Script>::new("built")
            .commands(|_| {
                Ok(vec![
                    Command::new("a"),
                    Command::new("b").timeout(Duration::from_secs(1)),
                ])
            })
            .timeout(Duration::from_secs(5))
            .config()
            .build_commands(&connection)
            .unwrap();
        for commands in [fixed, built] {
            let timeouts = commands.iter().map(|v| v.timeout).collect::<Vec<_>>();
            assert_eq!(
                timeouts,
                [Some(Duration::from_secs(5)), Some(Duration::from_secs(1))]
            );
        }
    }
}
