use crate::{CancellationToken, FromRow, Mapper, Materializer, Result, RowCursor};
use log::error;
use std::{
    collections::VecDeque,
    fmt::{self, Debug},
    vec,
};

/// Release action of a resource, receives whether the stream failed or was
/// cancelled (its transaction is rolled back).
pub type Release = Box<dyn FnOnce(bool) -> Result<()> + Send>;

/// Resources released in reverse acquisition order.
#[derive(Default)]
pub struct DisposeChain {
    items: Vec<Release>,
}

impl DisposeChain {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn push(&mut self, release: impl FnOnce(bool) -> Result<()> + Send + 'static) {
        self.items.push(Box::new(release));
    }
    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
    /// Runs every release action, the errors are logged and the first one is returned.
    pub fn release(&mut self, failed: bool) -> Result<()> {
        let mut result = Ok(());
        while let Some(release) = self.items.pop() {
            if let Err(e) = release(failed) {
                error!("Error while releasing a stream resource: {e:#}");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

impl Drop for DisposeChain {
    fn drop(&mut self) {
        let _ = self.release(false);
    }
}

enum State<T> {
    Buffered(vec::IntoIter<T>),
    Deferred {
        cursors: VecDeque<Box<dyn RowCursor + Send>>,
        mapper: Mapper,
        plan: Option<Materializer<T>>,
        cancellation: CancellationToken,
    },
    Done,
}

/// Rows of a job materialized one at a time.
///
/// A deferred stream owns the open cursors and, when the engine opened it, the
/// connection and its transaction. They are released only when the stream is
/// drained, closed with [`RowStream::close`] or dropped: keep it short-lived.
/// The transaction is committed unless reading a row failed or the stream was
/// cancelled.
#[must_use = "a stream holds its cursors and connection until it is drained, closed or dropped"]
pub struct RowStream<T> {
    state: State<T>,
    chain: DisposeChain,
}

impl<T: FromRow> RowStream<T> {
    /// Stream over rows already read.
    pub fn buffered(rows: Vec<T>, chain: DisposeChain) -> Self {
        Self {
            state: State::Buffered(rows.into_iter()),
            chain,
        }
    }
    /// Stream reading the cursors in order, lazily.
    pub fn deferred(
        cursors: impl IntoIterator<Item = Box<dyn RowCursor + Send>>,
        mapper: Mapper,
        cancellation: CancellationToken,
        chain: DisposeChain,
    ) -> Self {
        Self {
            state: State::Deferred {
                cursors: cursors.into_iter().collect(),
                mapper,
                plan: None,
                cancellation,
            },
            chain,
        }
    }
    pub fn is_buffered(&self) -> bool {
        matches!(self.state, State::Buffered(..))
    }
    /// Whether the resources were released.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Done)
    }
    /// Releases the cursors and the connection now.
    pub fn close(mut self) -> Result<()> {
        let cancelled = self.is_cancelled();
        self.finish(cancelled)
    }
    fn is_cancelled(&self) -> bool {
        matches!(&self.state, State::Deferred { cancellation, .. } if cancellation.is_cancelled())
    }
    fn finish(&mut self, failed: bool) -> Result<()> {
        self.state = State::Done;
        self.chain.release(failed)
    }
    fn next_deferred(&mut self) -> Option<Result<T>> {
        let State::Deferred {
            cursors,
            mapper,
            plan,
            cancellation,
        } = &mut self.state
        else {
            return None;
        };
        if cancellation.is_cancelled() {
            return None;
        }
        loop {
            let cursor = cursors.front_mut()?;
            match cursor.read() {
                Ok(true) => {
                    if plan.is_none() {
                        match mapper.materializer::<T>(cursor.schema()) {
                            Ok(v) => *plan = Some(v),
                            Err(e) => return Some(Err(e)),
                        }
                    }
                    return plan.as_ref().map(|v| v.materialize(&**cursor));
                }
                Ok(false) => {
                    *plan = None;
                    match cursor.next_result_set() {
                        Ok(true) => {}
                        Ok(false) => {
                            cursors.pop_front();
                        }
                        Err(e) => return Some(Err(e)),
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl<T: FromRow> Iterator for RowStream<T> {
    type Item = Result<T>;
    fn next(&mut self) -> Option<Self::Item> {
        let item = if let State::Buffered(rows) = &mut self.state {
            rows.next().map(Ok)
        } else if self.is_finished() {
            return None;
        } else {
            self.next_deferred()
        };
        match item {
            Some(Ok(v)) => Some(Ok(v)),
            Some(Err(e)) => {
                let _ = self.finish(true);
                Some(Err(e))
            }
            None => {
                let _ = self.finish(self.is_cancelled());
                None
            }
        }
    }
}

impl<T> Drop for RowStream<T> {
    fn drop(&mut self) {
        let cancelled = matches!(
            &self.state,
            State::Deferred { cancellation, .. } if cancellation.is_cancelled()
        );
        let _ = self.chain.release(cancelled);
    }
}

impl<T> Debug for RowStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Buffered(rows) => format!("Buffered({} rows left)", rows.len()),
            State::Deferred { cursors, .. } => format!("Deferred({} cursors)", cursors.len()),
            State::Done => "Done".into(),
        };
        f.debug_struct("RowStream")
            .field("state", &state)
            .field("resources", &self.chain.len())
            .finish()
    }
}
