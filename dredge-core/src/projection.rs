use crate::{
    CancellationToken, DredgeError, FromRow, Mapper, Materializer, Result, RowCursor,
};
use std::any::{self, Any};

/// How the rows of a command become a value.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Projection {
    /// The first row, failing when there is none.
    First,
    /// The first row, if any.
    FirstOrDefault,
    /// Exactly one row across every result set.
    Single,
    /// At most one row across every result set.
    SingleOrDefault,
    /// Every row of every result set.
    #[default]
    List,
}

/// Reads the rows of every result set, compiling a plan per result set.
pub(crate) struct Rows<'a, T> {
    cursor: &'a mut dyn RowCursor,
    mapper: &'a Mapper,
    plan: Option<Materializer<T>>,
}

impl<'a, T: FromRow> Rows<'a, T> {
    pub(crate) fn new(cursor: &'a mut dyn RowCursor, mapper: &'a Mapper) -> Self {
        Self {
            cursor,
            mapper,
            plan: None,
        }
    }
    pub(crate) fn next(&mut self) -> Result<Option<T>> {
        loop {
            if self.cursor.read()? {
                if self.plan.is_none() {
                    self.plan = Some(self.mapper.materializer::<T>(self.cursor.schema())?);
                }
                if let Some(plan) = &self.plan {
                    return plan.materialize(&*self.cursor).map(Some);
                }
            }
            if !self.cursor.next_result_set()? {
                return Ok(None);
            }
            self.plan = None;
        }
    }
    /// Whether any row is left, without materializing it.
    fn has_more(&mut self) -> Result<bool> {
        loop {
            if self.cursor.read()? {
                return Ok(true);
            }
            if !self.cursor.next_result_set()? {
                return Ok(false);
            }
        }
    }
}

/// First row of the first result set that has rows.
pub fn first<T: FromRow>(cursor: &mut dyn RowCursor, mapper: &Mapper) -> Result<T> {
    first_or_default(cursor, mapper)?.ok_or_else(|| {
        DredgeError::EmptyResult {
            shape: any::type_name::<T>(),
        }
        .into()
    })
}

pub fn first_or_default<T: FromRow>(
    cursor: &mut dyn RowCursor,
    mapper: &Mapper,
) -> Result<Option<T>> {
    Rows::new(cursor, mapper).next()
}

/// The only row, counted across every result set.
pub fn single<T: FromRow>(cursor: &mut dyn RowCursor, mapper: &Mapper) -> Result<T> {
    single_or_default(cursor, mapper)?.ok_or_else(|| {
        DredgeError::EmptyResult {
            shape: any::type_name::<T>(),
        }
        .into()
    })
}

pub fn single_or_default<T: FromRow>(
    cursor: &mut dyn RowCursor,
    mapper: &Mapper,
) -> Result<Option<T>> {
    let mut rows = Rows::new(cursor, mapper);
    let result = rows.next()?;
    if result.is_some() && rows.has_more()? {
        return Err(DredgeError::MultipleResults {
            shape: any::type_name::<T>(),
        }
        .into());
    }
    Ok(result)
}

/// Every row of every result set, stops early when `cancellation` is set.
pub fn to_list<T: FromRow>(
    cursor: &mut dyn RowCursor,
    mapper: &Mapper,
    cancellation: &CancellationToken,
) -> Result<Vec<T>> {
    let mut rows = Rows::new(cursor, mapper);
    let mut result = Vec::new();
    while !cancellation.is_cancelled() {
        match rows.next()? {
            Some(v) => result.push(v),
            None => break,
        }
    }
    Ok(result)
}

/// Type erased projection, returns the value and the number of rows it holds.
pub(crate) fn project<T: FromRow>(
    projection: Projection,
    cursor: &mut dyn RowCursor,
    mapper: &Mapper,
    cancellation: &CancellationToken,
) -> Result<(Box<dyn Any + Send>, u64)> {
    fn count<T>(value: &Option<T>) -> u64 {
        value.is_some() as u64
    }
    Ok(match projection {
        Projection::First => (Box::new(first::<T>(cursor, mapper)?), 1),
        Projection::FirstOrDefault => {
            let v = first_or_default::<T>(cursor, mapper)?;
            let n = count(&v);
            (Box::new(v), n)
        }
        Projection::Single => (Box::new(single::<T>(cursor, mapper)?), 1),
        Projection::SingleOrDefault => {
            let v = single_or_default::<T>(cursor, mapper)?;
            let n = count(&v);
            (Box::new(v), n)
        }
        Projection::List => {
            let v = to_list::<T>(cursor, mapper, cancellation)?;
            let n = v.len() as u64;
            (Box::new(v), n)
        }
    })
}
