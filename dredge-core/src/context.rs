use crate::{
    AsValue, CancellationToken, Command, Connection, Context, CursorBehavior, DredgeError,
    FromRow, Mapper, Result, RowsAffected, projection,
};
use std::time::Duration;

/// Outcome of one command of an execution.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    #[default]
    Completed,
    /// The cancellation token was observed while running the command.
    Cancelled,
}

/// What the engine records about each executed command.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct CommandMetadata {
    pub index: usize,
    pub command: Command,
    /// Rows materialized, or affected for non queries.
    pub rows: u64,
    pub elapsed: Duration,
    pub outcome: Outcome,
}

/// The state handed to the projection of one command.
///
/// The cursor is opened lazily by the first read and dropped together with
/// the context.
pub struct ExecutionContext<'c, C: Connection> {
    connection: &'c mut C,
    command: &'c Command,
    index: usize,
    behavior: CursorBehavior,
    mapper: &'c Mapper,
    cancellation: &'c CancellationToken,
    buffered: bool,
    cursor: Option<C::Cursor>,
    rows: u64,
    cancelled: bool,
}

impl<'c, C: Connection> ExecutionContext<'c, C> {
    pub fn new(
        connection: &'c mut C,
        command: &'c Command,
        index: usize,
        behavior: CursorBehavior,
        mapper: &'c Mapper,
        cancellation: &'c CancellationToken,
        buffered: bool,
    ) -> Self {
        Self {
            connection,
            command,
            index,
            behavior,
            mapper,
            cancellation,
            buffered,
            cursor: None,
            rows: 0,
            cancelled: false,
        }
    }
    pub fn connection(&mut self) -> &mut C {
        self.connection
    }
    pub fn command(&self) -> &Command {
        self.command
    }
    /// Position of the command in the job.
    pub fn index(&self) -> usize {
        self.index
    }
    pub fn mapper(&self) -> &Mapper {
        self.mapper
    }
    pub fn cancellation(&self) -> &CancellationToken {
        self.cancellation
    }
    pub fn buffered(&self) -> bool {
        self.buffered
    }
    /// Rows read (or affected) so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }
    /// Whether a projection stopped because of the cancellation token.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
    /// The cursor of the command, executed on first use.
    pub fn cursor(&mut self) -> Result<&mut C::Cursor> {
        if self.cursor.is_none() {
            let cursor = self
                .connection
                .execute_reader(self.command, self.behavior)
                .with_context(|| DredgeError::CommandExecution {
                    command: self.command.to_string(),
                })?;
            self.cursor = Some(cursor);
        }
        self.cursor
            .as_mut()
            .ok_or_else(|| crate::Error::msg("The cursor could not be opened"))
    }
    /// Takes ownership of the cursor, executing the command if needed.
    pub fn take_cursor(&mut self) -> Result<C::Cursor> {
        self.cursor()?;
        self.cursor
            .take()
            .ok_or_else(|| crate::Error::msg("The cursor could not be opened"))
    }
    fn projected<T>(&mut self, rows: u64, value: T) -> T {
        self.rows += rows;
        value
    }
    pub fn first<T: FromRow>(&mut self) -> Result<T> {
        let mapper = self.mapper;
        let value = projection::first::<T>(self.cursor()?, mapper)?;
        Ok(self.projected(1, value))
    }
    pub fn first_or_default<T: FromRow>(&mut self) -> Result<Option<T>> {
        let mapper = self.mapper;
        let value = projection::first_or_default::<T>(self.cursor()?, mapper)?;
        let rows = value.is_some() as u64;
        Ok(self.projected(rows, value))
    }
    pub fn single<T: FromRow>(&mut self) -> Result<T> {
        let mapper = self.mapper;
        let value = projection::single::<T>(self.cursor()?, mapper)?;
        Ok(self.projected(1, value))
    }
    pub fn single_or_default<T: FromRow>(&mut self) -> Result<Option<T>> {
        let mapper = self.mapper;
        let value = projection::single_or_default::<T>(self.cursor()?, mapper)?;
        let rows = value.is_some() as u64;
        Ok(self.projected(rows, value))
    }
    /// Every row of every result set; a cancellation stops the read and
    /// returns the rows read so far.
    pub fn to_list<T: FromRow>(&mut self) -> Result<Vec<T>> {
        let mapper = self.mapper;
        let cancellation = self.cancellation;
        let value = projection::to_list::<T>(self.cursor()?, mapper, cancellation)?;
        self.cancelled |= cancellation.is_cancelled();
        let rows = value.len() as u64;
        Ok(self.projected(rows, value))
    }
    /// First column of the first row converted to `T`, `fallback` for null.
    pub fn scalar<T: AsValue>(&mut self, fallback: impl FnOnce() -> T) -> Result<T> {
        let value = self
            .connection
            .execute_scalar(self.command)
            .with_context(|| DredgeError::CommandExecution {
                command: self.command.to_string(),
            })?;
        let value = T::from_column(value)?.unwrap_or_else(fallback);
        Ok(self.projected(1, value))
    }
    pub fn non_query(&mut self) -> Result<RowsAffected> {
        let value = self
            .connection
            .execute_non_query(self.command)
            .with_context(|| DredgeError::CommandExecution {
                command: self.command.to_string(),
            })?;
        Ok(self.projected(value.rows_affected, value))
    }
}
