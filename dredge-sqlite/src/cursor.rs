use crate::{
    CBox, bind::bind_value,
    extract::{extract_declared_type, extract_name, extract_value},
    last_error,
};
use dredge_core::{
    Command, Context, CursorBehavior, Error, Result, RowCursor, Schema, Value, truncate_long,
};
use libsqlite3_sys::*;
use std::{
    collections::VecDeque,
    ffi::{CString, c_char, c_int},
    ptr,
    sync::Arc,
};

pub(crate) type Handle = Arc<CBox<*mut sqlite3>>;
pub(crate) type Statement = CBox<*mut sqlite3_stmt>;

fn finalize(statement: *mut sqlite3_stmt) {
    unsafe {
        sqlite3_finalize(statement);
    }
}

fn empty_statement() -> Statement {
    CBox::new(ptr::null_mut(), finalize)
}

/// One step of `statement`, true when a row is available.
pub(crate) fn step(statement: *mut sqlite3_stmt) -> Result<bool> {
    unsafe {
        match sqlite3_step(statement) {
            SQLITE_ROW => Ok(true),
            SQLITE_DONE => Ok(false),
            _ => Err(last_error(sqlite3_db_handle(statement))),
        }
    }
}

/// Prepares the statements of a command text one at a time, binding the
/// positional parameters in order.
pub(crate) struct Statements {
    connection: Handle,
    sql: CString,
    offset: usize,
    params: VecDeque<Value>,
    consumed: usize,
}

impl Statements {
    pub(crate) fn new(connection: Handle, command: &Command) -> Result<Self> {
        let sql = CString::new(command.text.as_bytes())
            .with_context(|| format!("The command contains a nul byte: {command}"))?;
        Ok(Self {
            connection,
            sql,
            offset: 0,
            params: command.params.iter().cloned().collect(),
            consumed: 0,
        })
    }

    pub(crate) fn connection(&self) -> *mut sqlite3 {
        **self.connection
    }

    /// Next non empty statement, `None` once the text is consumed.
    pub(crate) fn next(&mut self) -> Result<Option<Statement>> {
        let len = self.sql.as_bytes().len();
        while self.offset < len {
            let mut statement = empty_statement();
            unsafe {
                let start = self.sql.as_ptr().add(self.offset);
                let mut tail: *const c_char = ptr::null();
                let rc = sqlite3_prepare_v2(
                    self.connection(),
                    start,
                    (len - self.offset) as c_int,
                    &mut *statement,
                    &mut tail,
                );
                if rc != SQLITE_OK {
                    let error = last_error(self.connection());
                    return Err(error.context(format!(
                        "Could not prepare `{}`",
                        truncate_long!(String::from_utf8_lossy(&self.sql.as_bytes()[self.offset..]))
                    )));
                }
                let offset = if tail.is_null() {
                    len
                } else {
                    tail.offset_from(self.sql.as_ptr()) as usize
                };
                self.offset = if offset > self.offset { offset } else { len };
            }
            // Whitespace or a comment
            if statement.is_null() {
                continue;
            }
            let count = unsafe { sqlite3_bind_parameter_count(*statement) } as u64;
            for index in 1..=count {
                let Some(value) = self.params.pop_front() else {
                    return Err(Error::msg(format!(
                        "The command expects more than the {} parameters supplied",
                        self.consumed
                    )));
                };
                bind_value(*statement, index, &value)?;
                self.consumed += 1;
            }
            return Ok(Some(statement));
        }
        if !self.params.is_empty() {
            log::warn!(
                "{} parameters were supplied but not used by the command",
                self.params.len()
            );
            self.params.clear();
        }
        Ok(None)
    }
}

/// Forward only cursor over the statements of a command.
///
/// Each statement returning columns is a result set, the others are executed
/// to completion while moving to the next result set.
pub struct SqliteCursor {
    statements: Statements,
    statement: Statement,
    schema: Schema,
    behavior: CursorBehavior,
    on_row: bool,
    exhausted: bool,
    rows: usize,
}

impl SqliteCursor {
    pub(crate) fn new(
        connection: Handle,
        command: &Command,
        behavior: CursorBehavior,
    ) -> Result<Self> {
        let mut result = Self {
            statements: Statements::new(connection, command)?,
            statement: empty_statement(),
            schema: Schema::default(),
            behavior,
            on_row: false,
            exhausted: true,
            rows: 0,
        };
        result.advance()?;
        Ok(result)
    }

    fn reset(&mut self) {
        self.statement = empty_statement();
        self.schema = Schema::default();
        self.on_row = false;
        self.exhausted = true;
        self.rows = 0;
    }

    fn advance(&mut self) -> Result<bool> {
        self.reset();
        while let Some(statement) = self.statements.next()? {
            let columns = unsafe { sqlite3_column_count(*statement) };
            if columns == 0 {
                while step(*statement)? {}
                continue;
            }
            self.schema = Schema::new(
                (0..columns)
                    .map(|i| Ok((extract_name(*statement, i)?, extract_declared_type(*statement, i))))
                    .collect::<Result<Vec<_>>>()?,
            );
            self.statement = statement;
            self.exhausted = false;
            return Ok(true);
        }
        Ok(false)
    }
}

impl RowCursor for SqliteCursor {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn read(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        if self.behavior == CursorBehavior::SingleRow && self.rows > 0 {
            self.on_row = false;
            self.exhausted = true;
            return Ok(false);
        }
        self.on_row = step(*self.statement)?;
        if self.on_row {
            self.rows += 1;
        } else {
            self.exhausted = true;
        }
        Ok(self.on_row)
    }

    fn next_result_set(&mut self) -> Result<bool> {
        if self.behavior != CursorBehavior::Default {
            self.reset();
            return Ok(false);
        }
        self.advance()
    }

    fn value(&self, ordinal: usize) -> Result<Value> {
        if !self.on_row {
            return Err(Error::msg("The cursor is not positioned on a row"));
        }
        let Some(column) = self.schema.get(ordinal) else {
            return Err(Error::msg(format!(
                "Column ordinal {ordinal} is out of range, the result set has {} columns",
                self.schema.len()
            )));
        };
        extract_value(*self.statement, ordinal as c_int, column.data_type)
            .with_context(|| format!("While reading the column `{}`", column.name))
    }
}
