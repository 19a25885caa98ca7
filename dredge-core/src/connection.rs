use crate::{Command, Result, RowCursor, Value};

/// Transaction isolation requested when the engine begins a transaction.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Whatever the backend uses by default.
    #[default]
    Unspecified,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Hint passed to [`Connection::execute_reader`].
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorBehavior {
    #[default]
    Default,
    /// Only the first result set is needed.
    SingleResult,
    /// Only the first row of the first result set is needed.
    SingleRow,
}

/// Metadata about modify operations (INSERT/UPDATE/DELETE).
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowsAffected {
    /// Total number of rows impacted.
    pub rows_affected: u64,
    /// Backend-specific last inserted / affected identifier when available.
    pub last_affected_id: Option<i64>,
}

impl Extend<RowsAffected> for RowsAffected {
    fn extend<T: IntoIterator<Item = RowsAffected>>(&mut self, iter: T) {
        for elem in iter {
            self.rows_affected += elem.rows_affected;
            if elem.last_affected_id.is_some() {
                self.last_affected_id = elem.last_affected_id;
            }
        }
    }
}

/// Entry point of a backend: creates connections from a URL.
pub trait Driver: Send + Sync + 'static {
    type Connection: Connection;
    /// Used in error messages and logs.
    const NAME: &'static str;

    /// A new open connection.
    fn connect(&self, url: &str) -> Result<Self::Connection>;
}

/// A session with a backend.
///
/// Implementations must release everything they hold on `close` and on drop.
pub trait Connection: Send + 'static {
    type Cursor: RowCursor + Send + 'static;

    fn open(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    fn is_open(&self) -> bool;

    fn begin(&mut self, isolation: IsolationLevel) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
    fn in_transaction(&self) -> bool;

    /// Executes the command and returns a cursor over its result sets.
    fn execute_reader(&mut self, command: &Command, behavior: CursorBehavior)
    -> Result<Self::Cursor>;

    /// First column of the first row, `Value::Null` when there are no rows.
    fn execute_scalar(&mut self, command: &Command) -> Result<Value> {
        let mut cursor = self.execute_reader(command, CursorBehavior::SingleRow)?;
        loop {
            if cursor.read()? {
                return cursor.value(0);
            }
            if !cursor.next_result_set()? {
                return Ok(Value::Null);
            }
        }
    }

    fn execute_non_query(&mut self, command: &Command) -> Result<RowsAffected>;

    /// Whether several cursors can be open at the same time on this connection.
    fn supports_concurrent_cursors(&self) -> bool {
        false
    }
}
