use crate::sort::ExternalSorter;

use super::condition::{compare_at, find_col, ColRef};
use super::error::{QueryError, QueryResult};
use super::{Executor, ExecutorKind, OutCol};

/// Memory handed to the external sorter
const SORT_BUDGET: usize = 1024 * 1024;

/// ORDER BY on one column, ascending or descending, through the external
/// merge sorter.
pub struct SortExec {
    child: Box<dyn Executor>,
    sort_col: OutCol,
    desc: bool,
    sorter: Option<ExternalSorter>,
    out: Option<Vec<u8>>,
    ended: bool,
}

impl SortExec {
    pub fn new(child: Box<dyn Executor>, order_by: &ColRef, desc: bool) -> QueryResult<Self> {
        let sort_col = find_col(child.cols(), order_by)?.clone();
        Ok(Self {
            child,
            sort_col,
            desc,
            sorter: None,
            out: None,
            ended: false,
        })
    }

    /// Pull the next record out of the merge, if any
    fn pull(&mut self) -> QueryResult<()> {
        debug_assert!(self.out.is_none());
        let Some(sorter) = self.sorter.as_mut() else {
            return Err(QueryError::Internal("sort not begun".to_string()));
        };
        if sorter.is_end() {
            self.ended = true;
            return Ok(());
        }
        let mut row = vec![0u8; sorter.record_size()];
        sorter.read(&mut row)?;
        self.out = Some(row);
        Ok(())
    }
}

impl Executor for SortExec {
    fn begin_tuple(&mut self) -> QueryResult<()> {
        let col = self.sort_col.clone();
        let desc = self.desc;
        let mut sorter = ExternalSorter::new(
            SORT_BUDGET,
            self.child.tuple_len(),
            Box::new(move |a, b| {
                let ord = compare_at(a, b, &col);
                if desc {
                    ord.reverse()
                } else {
                    ord
                }
            }),
        );

        self.child.begin_tuple()?;
        while !self.child.is_end() {
            sorter.write(&self.child.current()?)?;
            self.child.next_tuple()?;
        }
        sorter.end_write()?;
        sorter.begin_read()?;
        self.sorter = Some(sorter);
        self.pull()
    }

    fn next_tuple(&mut self) -> QueryResult<()> {
        if self.ended {
            return Err(QueryError::Internal("advancing a finished sort".to_string()));
        }
        self.pull()
    }

    fn is_end(&self) -> bool {
        self.ended
    }

    fn current(&mut self) -> QueryResult<Vec<u8>> {
        self.out
            .take()
            .ok_or_else(|| QueryError::Internal("sort tuple already consumed".to_string()))
    }

    fn cols(&self) -> &[OutCol] {
        self.child.cols()
    }

    fn tuple_len(&self) -> usize {
        self.child.tuple_len()
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Sort
    }
}
