use crate::{DataType, Error, Result, Schema, Value};
use std::sync::Arc;

/// Shared reference-counted column name list.
pub type RowNames = Arc<[String]>;
/// Owned row value slice matching `RowNames` length.
pub type Row = Box<[Value]>;

/// A result row with its corresponding column labels.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct RowLabeled {
    /// Column names.
    pub labels: RowNames,
    /// Data values (aligned by index with `labels`).
    pub values: Row,
}

impl RowLabeled {
    pub fn new(labels: RowNames, values: Row) -> Self {
        Self { labels, values }
    }
    pub fn names(&self) -> &[String] {
        &self.labels
    }
    pub fn values(&self) -> &[Value] {
        &self.values
    }
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
    /// First value labeled `name`, ASCII case-insensitive.
    pub fn get_column(&self, name: &str) -> Option<&Value> {
        self.labels
            .iter()
            .position(|v| v.eq_ignore_ascii_case(name))
            .map(|i| &self.values[i])
    }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.labels
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

impl From<RowLabeled> for Row {
    fn from(value: RowLabeled) -> Self {
        value.values
    }
}

/// Forward-only reader over the result sets produced by one command.
///
/// `read` advances to the next row of the current result set, `next_result_set`
/// moves to the following one (its schema can differ). `value` reads a cell of
/// the current row.
pub trait RowCursor {
    /// Columns of the current result set.
    fn schema(&self) -> &Schema;
    fn read(&mut self) -> Result<bool>;
    fn next_result_set(&mut self) -> Result<bool>;
    fn value(&self, ordinal: usize) -> Result<Value>;
    /// The whole current row together with its column names.
    fn labeled(&self) -> Result<RowLabeled> {
        let schema = self.schema();
        let values = (0..schema.len())
            .map(|i| self.value(i))
            .collect::<Result<Row>>()?;
        Ok(RowLabeled::new(schema.names(), values))
    }
}

impl<C: RowCursor + ?Sized> RowCursor for Box<C> {
    fn schema(&self) -> &Schema {
        (**self).schema()
    }
    fn read(&mut self) -> Result<bool> {
        (**self).read()
    }
    fn next_result_set(&mut self) -> Result<bool> {
        (**self).next_result_set()
    }
    fn value(&self, ordinal: usize) -> Result<Value> {
        (**self).value(ordinal)
    }
}

#[derive(Debug, Clone)]
struct MemoryResultSet {
    schema: Schema,
    rows: Vec<Row>,
}

/// Cursor over result sets held in memory.
///
/// Useful to materialize rows that did not come from a driver, and in tests.
///
/// ```rust
/// use dredge_core::{DataType, MemoryCursor, RowCursor, Value};
/// let mut cursor = MemoryCursor::new().result_set(
///     [("id", DataType::Int64)],
///     [vec![Value::Int64(Some(1))], vec![Value::Int64(Some(2))]],
/// );
/// assert!(cursor.read().unwrap());
/// assert_eq!(cursor.value(0).unwrap(), Value::Int64(Some(1)));
/// ```
#[derive(Default, Debug, Clone)]
pub struct MemoryCursor {
    sets: Vec<MemoryResultSet>,
    set: usize,
    row: Option<usize>,
    empty: Schema,
}

impl MemoryCursor {
    pub fn new() -> Self {
        Self::default()
    }
    /// Appends a result set.
    pub fn result_set<S: Into<String>>(
        mut self,
        columns: impl IntoIterator<Item = (S, DataType)>,
        rows: impl IntoIterator<Item = Vec<Value>>,
    ) -> Self {
        self.sets.push(MemoryResultSet {
            schema: Schema::new(columns),
            rows: rows.into_iter().map(Vec::into_boxed_slice).collect(),
        });
        self
    }
    fn current(&self) -> Option<&MemoryResultSet> {
        self.sets.get(self.set)
    }
}

impl RowCursor for MemoryCursor {
    fn schema(&self) -> &Schema {
        self.current().map(|s| &s.schema).unwrap_or(&self.empty)
    }
    fn read(&mut self) -> Result<bool> {
        let Some(len) = self.current().map(|s| s.rows.len()) else {
            return Ok(false);
        };
        let next = self.row.map_or(0, |r| r + 1);
        if next < len {
            self.row = Some(next);
            Ok(true)
        } else {
            self.row = Some(len);
            Ok(false)
        }
    }
    fn next_result_set(&mut self) -> Result<bool> {
        if self.set >= self.sets.len() {
            return Ok(false);
        }
        self.set += 1;
        self.row = None;
        Ok(self.set < self.sets.len())
    }
    fn value(&self, ordinal: usize) -> Result<Value> {
        let row = self
            .current()
            .zip(self.row)
            .and_then(|(set, row)| set.rows.get(row))
            .ok_or_else(|| Error::msg("The cursor is not positioned on a row"))?;
        row.get(ordinal).cloned().ok_or_else(|| {
            Error::msg(format!(
                "Column ordinal {ordinal} is out of range, the row has {} columns",
                row.len()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryCursor, RowCursor};
    use crate::{DataType, Value};

    #[test]
    fn walks_result_sets() {
        let mut cursor = MemoryCursor::new()
            .result_set([("a", DataType::Int32)], [vec![Value::Int32(Some(1))]])
            .result_set(
                [("b", DataType::Varchar), ("c", DataType::Boolean)],
                [
                    vec![Value::Varchar(Some("x".into())), Value::Boolean(Some(true))],
                    vec![Value::Varchar(None), Value::Null],
                ],
            );
        assert!(cursor.value(0).is_err());
        assert!(cursor.read().unwrap());
        assert_eq!(cursor.value(0).unwrap(), Value::Int32(Some(1)));
        assert!(!cursor.read().unwrap());
        assert!(cursor.next_result_set().unwrap());
        assert_eq!(cursor.schema().len(), 2);
        assert!(cursor.read().unwrap());
        let row = cursor.labeled().unwrap();
        assert_eq!(row.get_column("C"), Some(&Value::Boolean(Some(true))));
        assert!(cursor.read().unwrap());
        assert!(cursor.value(2).is_err());
        assert!(!cursor.read().unwrap());
        assert!(!cursor.next_result_set().unwrap());
        assert!(cursor.schema().is_empty());
        assert!(!cursor.read().unwrap());
    }
}
