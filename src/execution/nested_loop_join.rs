use super::condition::Condition;
use super::error::{QueryError, QueryResult};
use super::{Executor, ExecutorKind, OutCol};

/// Cartesian-product join over materialized children.
///
/// Both inputs are drained into memory at begin, then walked in fixed
/// left-major order, emitting concatenated rows that pass the conjunctive
/// predicate.
pub struct NestedLoopJoinExec {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    conds: Vec<Condition>,
    cols: Vec<OutCol>,
    len: usize,
    left_rows: Vec<Vec<u8>>,
    right_rows: Vec<Vec<u8>>,
    left_idx: usize,
    right_idx: usize,
    out: Option<Vec<u8>>,
    ended: bool,
}

impl NestedLoopJoinExec {
    pub fn new(left: Box<dyn Executor>, right: Box<dyn Executor>, conds: Vec<Condition>) -> Self {
        let len = left.tuple_len() + right.tuple_len();
        let mut cols = left.cols().to_vec();
        for col in right.cols() {
            let mut col = col.clone();
            col.offset += left.tuple_len();
            cols.push(col);
        }
        Self {
            left,
            right,
            conds,
            cols,
            len,
            left_rows: Vec::new(),
            right_rows: Vec::new(),
            left_idx: 0,
            right_idx: 0,
            out: None,
            ended: false,
        }
    }

    fn joined_row(&self) -> Vec<u8> {
        let mut row = Vec::with_capacity(self.len);
        row.extend_from_slice(&self.left_rows[self.left_idx]);
        row.extend_from_slice(&self.right_rows[self.right_idx]);
        row
    }

    /// Move the (left, right) cursor one step in left-major order
    fn step(&mut self) {
        self.right_idx += 1;
        if self.right_idx == self.right_rows.len() {
            self.right_idx = 0;
            self.left_idx += 1;
            if self.left_idx == self.left_rows.len() {
                self.ended = true;
            }
        }
    }

    /// Park the next passing pair in the output buffer
    fn find_match(&mut self) -> QueryResult<()> {
        while !self.ended {
            let row = self.joined_row();
            let mut passes = true;
            for cond in &self.conds {
                if !cond.eval_row(&row, &self.cols)? {
                    passes = false;
                    break;
                }
            }
            if passes {
                debug_assert!(self.out.is_none());
                self.out = Some(row);
                return Ok(());
            }
            self.step();
        }
        Ok(())
    }
}

impl Executor for NestedLoopJoinExec {
    fn begin_tuple(&mut self) -> QueryResult<()> {
        self.left.begin_tuple()?;
        while !self.left.is_end() {
            self.left_rows.push(self.left.current()?);
            self.left.next_tuple()?;
        }
        self.right.begin_tuple()?;
        while !self.right.is_end() {
            self.right_rows.push(self.right.current()?);
            self.right.next_tuple()?;
        }

        self.left_idx = 0;
        self.right_idx = 0;
        self.ended = self.left_rows.is_empty() || self.right_rows.is_empty();
        self.find_match()
    }

    fn next_tuple(&mut self) -> QueryResult<()> {
        if self.ended {
            return Err(QueryError::Internal("advancing a finished join".to_string()));
        }
        self.step();
        self.find_match()
    }

    fn is_end(&self) -> bool {
        self.ended && self.out.is_none()
    }

    fn current(&mut self) -> QueryResult<Vec<u8>> {
        self.out
            .take()
            .ok_or_else(|| QueryError::Internal("join tuple already consumed".to_string()))
    }

    fn cols(&self) -> &[OutCol] {
        &self.cols
    }

    fn tuple_len(&self) -> usize {
        self.len
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::NestedLoopJoin
    }
}
