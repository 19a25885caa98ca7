use crate::{DataType, RowNames, util::same_name};
use std::{ops::Range, sync::Arc};

/// A column of a result set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnInfo {
    pub name: String,
    pub ordinal: usize,
    pub data_type: DataType,
}

/// Ordered description of the columns of a result set.
///
/// Captured once per open cursor and immutable afterwards. Cloning is cheap,
/// two schemas are equal when they have the same columns in the same order.
#[derive(Default, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Schema {
    columns: Arc<[ColumnInfo]>,
}

impl Schema {
    /// Builds a schema assigning ordinals in iteration order.
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = (S, DataType)>) -> Self {
        Self {
            columns: columns
                .into_iter()
                .enumerate()
                .map(|(ordinal, (name, data_type))| ColumnInfo {
                    name: name.into(),
                    ordinal,
                    data_type,
                })
                .collect(),
        }
    }
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }
    pub fn len(&self) -> usize {
        self.columns.len()
    }
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
    pub fn get(&self, ordinal: usize) -> Option<&ColumnInfo> {
        self.columns.get(ordinal)
    }
    /// Ordinal of the first column named `name`, ASCII case-insensitive.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.find(name, 0..self.len()).map(|c| c.ordinal)
    }
    /// First column named `name` whose ordinal falls inside `range`.
    pub fn find(&self, name: &str, range: Range<usize>) -> Option<&ColumnInfo> {
        let end = range.end.min(self.len());
        self.columns
            .get(range.start.min(end)..end)?
            .iter()
            .find(|c| same_name(&c.name, name))
    }
    /// Column names, in order.
    pub fn names(&self) -> RowNames {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}
