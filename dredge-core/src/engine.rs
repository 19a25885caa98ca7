use crate::{
    CancellationToken, CommandMetadata, Connection, ConnectionSource, Context, DisposeChain,
    Driver, DredgeError, Error, ExecutionContext, FromRow, IsolationLevel, Job, Outcome, Result,
    RowCursor, RowStream, StreamJob, error_kind,
};
use log::{debug, error, warn};
use std::{
    sync::{Arc, PoisonError},
    time::Instant,
};

/// Result of a handled execution: errors are returned as values.
#[derive(Debug)]
pub enum Handled<R> {
    Ok(R),
    /// No connection could be established.
    ConnectionFailed(Error),
    Failed(Error),
}

impl<R> Handled<R> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Handled::Ok(..))
    }
    pub fn into_result(self) -> Result<R> {
        match self {
            Handled::Ok(v) => Ok(v),
            Handled::ConnectionFailed(e) | Handled::Failed(e) => Err(e),
        }
    }
}

enum Held<'a, C> {
    Borrowed(&'a mut C),
    Owned(C),
}

/// A connection for the duration of one execution, with the transaction the
/// engine began on it.
pub(crate) struct Session<'a, C: Connection> {
    connection: Held<'a, C>,
    opened: bool,
    began: bool,
}

impl<'a, C: Connection> Session<'a, C> {
    /// Uses the caller connection (opening it if needed) or a new one from `source`.
    pub(crate) fn acquire<D: Driver<Connection = C>>(
        connection: Option<&'a mut C>,
        source: Option<&ConnectionSource<D>>,
        job: &str,
    ) -> Result<Self> {
        let (connection, opened) = match connection {
            Some(connection) => {
                let opened = !connection.is_open();
                if opened {
                    connection
                        .open()
                        .with_context(|| DredgeError::ConnectionFailed { driver: D::NAME })?;
                }
                (Held::Borrowed(connection), opened)
            }
            None => {
                let Some(source) = source else {
                    return Err(Error::msg(format!(
                        "The job `{job}` has no connection source and no connection was supplied"
                    ))
                    .context(DredgeError::ConnectionFailed { driver: D::NAME }));
                };
                (Held::Owned(source.connect()?), true)
            }
        };
        Ok(Self {
            connection,
            opened,
            began: false,
        })
    }
    pub(crate) fn connection(&mut self) -> &mut C {
        match &mut self.connection {
            Held::Borrowed(v) => &mut **v,
            Held::Owned(v) => v,
        }
    }
    /// Whether the session opened the connection.
    pub(crate) fn opened(&self) -> bool {
        self.opened
    }
    pub(crate) fn is_owned(&self) -> bool {
        matches!(self.connection, Held::Owned(..))
    }
    /// Begins a transaction unless the connection already is in one.
    pub(crate) fn begin(&mut self, isolation: Option<IsolationLevel>) -> Result<()> {
        let Some(isolation) = isolation else {
            return Ok(());
        };
        let connection = self.connection();
        if connection.in_transaction() {
            debug!("Joining the transaction already open on the connection");
            return Ok(());
        }
        connection.begin(isolation)?;
        self.began = true;
        Ok(())
    }
    /// Commits (or rolls back) the transaction the session began and closes
    /// the connection if the session opened it. Only commit errors are returned.
    pub(crate) fn finish(mut self, success: bool) -> Result<()> {
        let mut result = Ok(());
        if self.began {
            self.began = false;
            let connection = self.connection();
            if success {
                result = connection.commit().context("Could not commit the transaction");
                if result.is_err() {
                    if let Err(e) = connection.rollback() {
                        error!("Could not roll back the transaction: {e:#}");
                    }
                }
            } else if let Err(e) = connection.rollback() {
                error!("Could not roll back the transaction: {e:#}");
            }
        }
        if self.opened
            && let Err(e) = self.connection().close()
        {
            error!("Could not close the connection: {e:#}");
        }
        result
    }
    /// Moves an owned connection into a release action run by a stream.
    pub(crate) fn into_release(self) -> Option<impl FnOnce(bool) -> Result<()> + Send + 'static> {
        let began = self.began;
        let Held::Owned(mut connection) = self.connection else {
            return None;
        };
        Some(move |failed: bool| {
            let mut result = Ok(());
            if began {
                result = if failed {
                    connection.rollback()
                } else {
                    connection.commit()
                };
            }
            let closed = connection.close();
            result.and(closed)
        })
    }
}

impl<D: Driver, R: Send + 'static> Job<D, R> {
    /// Runs the job on `connection`, which is left open.
    pub fn execute(&self, connection: &mut D::Connection) -> Result<R> {
        self.execute_with(Some(connection), &CancellationToken::new())
    }
    /// Runs the job on a new connection from its source.
    pub fn execute_owned(&self) -> Result<R> {
        self.execute_with(None, &CancellationToken::new())
    }
    pub fn execute_with(
        &self,
        connection: Option<&mut D::Connection>,
        cancellation: &CancellationToken,
    ) -> Result<R> {
        self.run(connection, cancellation, &mut Vec::new())
    }
    /// Runs the job returning errors as values, `on_error` can substitute the result.
    pub fn try_execute(
        &self,
        connection: Option<&mut D::Connection>,
        cancellation: &CancellationToken,
    ) -> Handled<R> {
        match self.execute_with(connection, cancellation) {
            Ok(v) => Handled::Ok(v),
            Err(e) => {
                if let Some(value) = self.error.as_ref().and_then(|f| f(&e)) {
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
    /// Runs the job on a blocking thread with a new connection from its source.
    pub async fn execute_async(self: Arc<Self>, cancellation: CancellationToken) -> Result<R> {
        tokio::task::spawn_blocking(move || self.execute_with(None, &cancellation)).await?
    }
    pub async fn try_execute_async(self: Arc<Self>, cancellation: CancellationToken) -> Handled<R> {
        match tokio::task::spawn_blocking(move || self.try_execute(None, &cancellation)).await {
            Ok(v) => v,
            Err(e) => Handled::Failed(e.into()),
        }
    }

    pub(crate) fn run(
        &self,
        connection: Option<&mut D::Connection>,
        cancellation: &CancellationToken,
        metadata: &mut Vec<CommandMetadata>,
    ) -> Result<R> {
        let _lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let seed = (self.init)();
        if cancellation.is_cancelled() {
            debug!("The job `{}` was cancelled before starting", self.name());
            return Ok(seed);
        }
        let mut session = Session::acquire(connection, self.config.source.as_ref(), self.name())?;
        if let Err(e) = session.begin(self.config.isolation) {
            session.finish(false)?;
            return Err(e);
        }
        match self.run_commands(session.connection(), seed, cancellation, metadata) {
            Ok((value, Outcome::Completed)) => {
                session.finish(true)?;
                Ok(value)
            }
            Ok((value, Outcome::Cancelled)) => {
                debug!("The job `{}` was cancelled", self.name());
                session.finish(false)?;
                Ok(value)
            }
            Err(e) => {
                session.finish(false)?;
                Err(e)
            }
        }
    }

    /// The per command loop, on a connection already prepared.
    pub(crate) fn run_commands(
        &self,
        connection: &mut D::Connection,
        seed: R,
        cancellation: &CancellationToken,
        metadata: &mut Vec<CommandMetadata>,
    ) -> Result<(R, Outcome)> {
        let commands = self.config.build_commands(connection)?;
        let mapper = self.config.mapper();
        let mut result = seed;
        for (index, command) in commands.iter().enumerate() {
            if cancellation.is_cancelled() {
                return Ok((result, Outcome::Cancelled));
            }
            let started = Instant::now();
            let mut context = ExecutionContext::new(
                &mut *connection,
                command,
                index,
                self.config.behavior,
                &mapper,
                cancellation,
                self.config.buffered,
            );
            result = (self.execute)(&mut context, result).with_context(|| {
                format!("The job `{}` failed at command {}", self.name(), index)
            })?;
            let rows = context.rows();
            let outcome = if context.is_cancelled() {
                Outcome::Cancelled
            } else {
                Outcome::Completed
            };
            drop(context);
            metadata.push(CommandMetadata {
                index,
                command: command.clone(),
                rows,
                elapsed: started.elapsed(),
                outcome,
            });
            if outcome == Outcome::Cancelled {
                return Ok((result, outcome));
            }
            if let (Some(hook), Some(entry)) = (&self.executed, metadata.last()) {
                result = hook(entry, result)?;
            }
        }
        if let Some(hook) = &self.completed {
            result = hook(result)?;
        }
        Ok((result, Outcome::Completed))
    }
}

impl<D: Driver, T: FromRow> StreamJob<D, T> {
    /// Stream over the rows on `connection`.
    ///
    /// A deferred stream does not borrow the connection but keeps its cursors
    /// open: the connection must outlive the stream. A closed connection is
    /// opened and, for a deferred stream, left open for the caller to close.
    pub fn execute(&self, connection: &mut D::Connection) -> Result<RowStream<T>> {
        self.execute_with(Some(connection), &CancellationToken::new())
    }
    /// Stream over the rows on a new connection, owned by the stream.
    pub fn execute_owned(&self) -> Result<RowStream<T>> {
        self.execute_with(None, &CancellationToken::new())
    }
    pub fn execute_with(
        &self,
        connection: Option<&mut D::Connection>,
        cancellation: &CancellationToken,
    ) -> Result<RowStream<T>> {
        let _lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if cancellation.is_cancelled() {
            return Ok(RowStream::buffered(Vec::new(), DisposeChain::new()));
        }
        let mut session = Session::acquire(connection, self.config.source.as_ref(), self.name())?;
        let isolation = if self.config.buffered || session.is_owned() {
            self.config.isolation
        } else {
            if self.config.isolation.is_some() {
                warn!(
                    "The deferred stream `{}` runs on a caller connection, its isolation level is ignored",
                    self.name()
                );
            }
            None
        };
        if let Err(e) = session.begin(isolation) {
            session.finish(false)?;
            return Err(e);
        }
        let opened_caller = session.opened() && !session.is_owned();
        let opened = self.open(session.connection(), cancellation);
        match opened {
            Ok(Opened::Buffered(rows)) => {
                session.finish(true)?;
                Ok(RowStream::buffered(rows, DisposeChain::new()))
            }
            Ok(Opened::Deferred(cursors)) => {
                let mut chain = DisposeChain::new();
                if let Some(release) = session.into_release() {
                    chain.push(release);
                } else if opened_caller {
                    debug!(
                        "The deferred stream `{}` leaves the caller connection open",
                        self.name()
                    );
                }
                Ok(RowStream::deferred(
                    cursors,
                    self.config.mapper(),
                    cancellation.clone(),
                    chain,
                ))
            }
            Err(e) => {
                session.finish(false)?;
                Err(e)
            }
        }
    }

    fn open(
        &self,
        connection: &mut D::Connection,
        cancellation: &CancellationToken,
    ) -> Result<Opened<T>> {
        let commands = self.config.build_commands(connection)?;
        let mapper = self.config.mapper();
        if self.config.buffered {
            let mut rows = Vec::new();
            for (index, command) in commands.iter().enumerate() {
                if cancellation.is_cancelled() {
                    break;
                }
                let mut context = ExecutionContext::new(
                    &mut *connection,
                    command,
                    index,
                    self.config.behavior,
                    &mapper,
                    cancellation,
                    true,
                );
                rows.extend(context.to_list::<T>()?);
            }
            return Ok(Opened::Buffered(rows));
        }
        let mut cursors: Vec<Box<dyn RowCursor + Send>> = Vec::with_capacity(commands.len());
        for (index, command) in commands.iter().enumerate() {
            let mut context = ExecutionContext::new(
                &mut *connection,
                command,
                index,
                self.config.behavior,
                &mapper,
                cancellation,
                false,
            );
            cursors.push(Box::new(context.take_cursor()?));
        }
        Ok(Opened::Deferred(cursors))
    }
}

enum Opened<T> {
    Buffered(Vec<T>),
    Deferred(Vec<Box<dyn RowCursor + Send>>),
}
