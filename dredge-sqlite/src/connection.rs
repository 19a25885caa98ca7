use crate::{
    CBox, SqliteCursor, SqliteOptions,
    cursor::{Handle, Statements, step},
    error_message_from_ptr, last_error,
};
use dredge_core::{
    Command, CommandKind, Connection, Context, CursorBehavior, Error, IsolationLevel, Result,
    RowsAffected, truncate_long,
};
use libsqlite3_sys::*;
use std::{
    ffi::{CString, c_char, c_int, c_void},
    ptr,
    sync::Arc,
};

// libsqlite3-sys blocklists this binding, the symbol is still provided by the linked library.
unsafe extern "C" {
    fn sqlite3_close_v2(db: *mut sqlite3) -> c_int;
}

/// Connection to a SQLite database file.
///
/// Cursors keep the database handle alive, closing the connection while
/// a cursor is still open releases the handle once the cursor drops.
#[derive(Debug)]
pub struct SqliteConnection {
    pub(crate) connection: Option<Handle>,
    pub(crate) options: SqliteOptions,
}

impl SqliteConnection {
    pub fn connect(url: &str) -> Result<Self> {
        let options = SqliteOptions::parse(url)?;
        let mut result = Self {
            connection: None,
            options,
        };
        result.open()?;
        Ok(result)
    }

    pub fn options(&self) -> &SqliteOptions {
        &self.options
    }

    pub(crate) fn handle(&self) -> Result<&Handle> {
        self.connection
            .as_ref()
            .ok_or_else(|| Error::msg("The SQLite connection is closed"))
    }

    /// Runs `sql` without parameters or results.
    pub fn execute_batch(&mut self, sql: &str) -> Result<()> {
        let connection = ***self.handle()?;
        let text = CString::new(sql).context("The statement contains a nul byte")?;
        let mut error: *mut c_char = ptr::null_mut();
        unsafe {
            let rc = sqlite3_exec(connection, text.as_ptr(), None, ptr::null_mut(), &mut error);
            if rc != SQLITE_OK {
                let message = error_message_from_ptr(error).to_string();
                sqlite3_free(error as *mut c_void);
                let error = Error::msg(message)
                    .context(format!("While executing `{}`", truncate_long!(sql)));
                log::error!("{:#}", error);
                return Err(error);
            }
        }
        Ok(())
    }

    fn prepare(&self, command: &Command) -> Result<Handle> {
        if command.kind == CommandKind::StoredProcedure {
            return Err(Error::msg(format!(
                "SQLite does not support stored procedures, cannot call `{command}`"
            )));
        }
        let connection = self.handle()?.clone();
        let timeout = command
            .timeout
            .or(self.options.busy_timeout)
            .map(|v| v.as_millis().min(c_int::MAX as u128) as c_int)
            .unwrap_or(0);
        unsafe {
            sqlite3_busy_timeout(**connection, timeout);
        }
        Ok(connection)
    }
}

impl Connection for SqliteConnection {
    type Cursor = SqliteCursor;

    fn open(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }
        let filename = CString::new(self.options.filename().as_bytes())
            .context("The database path contains a nul byte")?;
        let mut connection = CBox::new(ptr::null_mut::<sqlite3>(), |connection| unsafe {
            sqlite3_close_v2(connection);
        });
        unsafe {
            let rc = sqlite3_open_v2(
                filename.as_ptr(),
                &mut *connection,
                self.options.flags(),
                ptr::null(),
            );
            if rc != SQLITE_OK {
                let error = last_error(*connection).context(format!(
                    "Failed to open the SQLite database `{}`",
                    self.options.filename()
                ));
                log::error!("{:#}", error);
                return Err(error);
            }
        }
        log::debug!("Opened the SQLite database `{}`", self.options.filename());
        self.connection = Some(Arc::new(connection));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(connection) = self.connection.take() {
            let cursors = Arc::strong_count(&connection) - 1;
            if cursors > 0 {
                log::debug!(
                    "Closing the SQLite connection with {cursors} cursors still open, the handle is released when they drop"
                );
            }
            log::debug!("Closed the SQLite database `{}`", self.options.filename());
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    fn begin(&mut self, isolation: IsolationLevel) -> Result<()> {
        // SQLite transactions are serializable, only shared cache readers can lower it.
        self.execute_batch(&format!(
            "PRAGMA read_uncommitted = {}",
            (isolation == IsolationLevel::ReadUncommitted) as u8
        ))?;
        self.execute_batch(match isolation {
            IsolationLevel::Serializable => "BEGIN IMMEDIATE",
            _ => "BEGIN DEFERRED",
        })
    }

    fn commit(&mut self) -> Result<()> {
        self.execute_batch("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.execute_batch("ROLLBACK")
    }

    fn in_transaction(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| unsafe { sqlite3_get_autocommit(***connection) } == 0)
    }

    fn execute_reader(
        &mut self,
        command: &Command,
        behavior: CursorBehavior,
    ) -> Result<SqliteCursor> {
        let connection = self.prepare(command)?;
        SqliteCursor::new(connection, command, behavior).map_err(|error| {
            let error = error.context(format!("While executing the query: {command}"));
            log::error!("{:#}", error);
            error
        })
    }

    fn execute_non_query(&mut self, command: &Command) -> Result<RowsAffected> {
        let connection = self.prepare(command)?;
        let run = || -> Result<RowsAffected> {
            let mut statements = Statements::new(connection, command)?;
            let db = statements.connection();
            let mut result = RowsAffected::default();
            while let Some(statement) = statements.next()? {
                let (total, rowid) = unsafe { (sqlite3_total_changes(db), sqlite3_last_insert_rowid(db)) };
                while step(*statement)? {}
                unsafe {
                    if sqlite3_total_changes(db) != total {
                        result.rows_affected += sqlite3_changes(db) as u64;
                    }
                    let last = sqlite3_last_insert_rowid(db);
                    if last != rowid {
                        result.last_affected_id = Some(last);
                    }
                }
            }
            Ok(result)
        };
        run().map_err(|error| {
            let error = error.context(format!("While executing the statement: {command}"));
            log::error!("{:#}", error);
            error
        })
    }

    fn supports_concurrent_cursors(&self) -> bool {
        true
    }
}
