use std::cmp::Ordering;

use crate::sort::ExternalSorter;

use super::condition::{compare_at, find_col, ColRef, CompOp, Condition, Operand};
use super::error::{QueryError, QueryResult};
use super::{Executor, ExecutorKind, OutCol};

/// Memory handed to each side's external sorter
const MERGE_SORT_BUDGET: usize = 8 * 1024;

/// Sort-merge equi-join.
///
/// Each child is drained through an external sorter keyed by its join
/// column, then the two sorted streams are swept in lockstep. A run of
/// equal keys buffers the right-side group and emits the full cross
/// product in left-major order. When both children are already
/// index-ordered on the join columns, `use_index` skips the sorters and
/// reads the children directly.
pub struct MergeJoinExec {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    left_col: OutCol,
    right_col: OutCol,
    use_index: bool,
    cols: Vec<OutCol>,
    len: usize,

    left_sorter: Option<ExternalSorter>,
    right_sorter: Option<ExternalSorter>,
    left_cur: Option<Vec<u8>>,
    right_cur: Option<Vec<u8>>,
    /// Right rows sharing the key currently being joined
    right_group: Vec<Vec<u8>>,
    group_pos: usize,
    out: Option<Vec<u8>>,
    ended: bool,
}

impl MergeJoinExec {
    pub fn new(
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
        conds: Vec<Condition>,
        use_index: bool,
    ) -> QueryResult<Self> {
        // The first column-to-column equality names the join columns
        let (lhs_ref, rhs_ref) = conds
            .iter()
            .find_map(|cond| match &cond.rhs {
                Operand::Column(rhs) if cond.op == CompOp::Eq => {
                    Some((cond.lhs.clone(), rhs.clone()))
                }
                _ => None,
            })
            .ok_or_else(|| {
                QueryError::Internal("merge join requires an equality condition".to_string())
            })?;

        let (left_ref, right_ref): (ColRef, ColRef) = if find_col(left.cols(), &lhs_ref).is_ok() {
            (lhs_ref, rhs_ref)
        } else {
            (rhs_ref, lhs_ref)
        };
        let left_col = find_col(left.cols(), &left_ref)?.clone();
        let right_col = find_col(right.cols(), &right_ref)?.clone();

        let len = left.tuple_len() + right.tuple_len();
        let mut cols = left.cols().to_vec();
        for col in right.cols() {
            let mut col = col.clone();
            col.offset += left.tuple_len();
            cols.push(col);
        }

        Ok(Self {
            left,
            right,
            left_col,
            right_col,
            use_index,
            cols,
            len,
            left_sorter: None,
            right_sorter: None,
            left_cur: None,
            right_cur: None,
            right_group: Vec::new(),
            group_pos: 0,
            out: None,
            ended: false,
        })
    }

    /// Drain a child through a sorter keyed by its join column
    fn sort_side(child: &mut Box<dyn Executor>, col: &OutCol) -> QueryResult<ExternalSorter> {
        let col = col.clone();
        let mut sorter = ExternalSorter::new(
            MERGE_SORT_BUDGET,
            child.tuple_len(),
            Box::new(move |a, b| compare_at(a, b, &col)),
        );
        child.begin_tuple()?;
        while !child.is_end() {
            sorter.write(&child.current()?)?;
            child.next_tuple()?;
        }
        sorter.end_write()?;
        sorter.begin_read()?;
        Ok(sorter)
    }

    fn read_left(&mut self) -> QueryResult<Option<Vec<u8>>> {
        match self.left_sorter.as_mut() {
            Some(sorter) => {
                if sorter.is_end() {
                    return Ok(None);
                }
                let mut row = vec![0u8; self.left.tuple_len()];
                sorter.read(&mut row)?;
                Ok(Some(row))
            }
            None => {
                if self.left.is_end() {
                    return Ok(None);
                }
                let row = self.left.current()?;
                self.left.next_tuple()?;
                Ok(Some(row))
            }
        }
    }

    fn read_right(&mut self) -> QueryResult<Option<Vec<u8>>> {
        match self.right_sorter.as_mut() {
            Some(sorter) => {
                if sorter.is_end() {
                    return Ok(None);
                }
                let mut row = vec![0u8; self.right.tuple_len()];
                sorter.read(&mut row)?;
                Ok(Some(row))
            }
            None => {
                if self.right.is_end() {
                    return Ok(None);
                }
                let row = self.right.current()?;
                self.right.next_tuple()?;
                Ok(Some(row))
            }
        }
    }

    /// Compare the join keys of a left row and a right row
    fn cross_compare(&self, left_row: &[u8], right_row: &[u8]) -> QueryResult<Ordering> {
        let lhs = super::condition::decode_col(left_row, &self.left_col)?;
        let rhs = super::condition::decode_col(right_row, &self.right_col)?;
        Ok(lhs.compare(&rhs)?)
    }

    fn joined_row(&self, left_row: &[u8], right_row: &[u8]) -> Vec<u8> {
        let mut row = Vec::with_capacity(self.len);
        row.extend_from_slice(left_row);
        row.extend_from_slice(right_row);
        row
    }

    /// Produce the next output pair, advancing the sweep as needed
    fn produce(&mut self) -> QueryResult<()> {
        debug_assert!(self.out.is_none());
        loop {
            // Mid-group: emit the next pair for the current left row
            if self.group_pos < self.right_group.len() {
                let Some(left_row) = self.left_cur.as_ref() else {
                    return Err(QueryError::Internal(
                        "join group without a left row".to_string(),
                    ));
                };
                let row = self.joined_row(left_row, &self.right_group[self.group_pos]);
                self.group_pos += 1;
                self.out = Some(row);
                return Ok(());
            }

            // Group exhausted for this left row; the next left row may
            // share the key and replay the group
            if !self.right_group.is_empty() {
                let prev_left = self.left_cur.take();
                self.left_cur = self.read_left()?;
                let same_key = match (&self.left_cur, &prev_left) {
                    (Some(cur), Some(prev)) => {
                        compare_at(cur, prev, &self.left_col) == Ordering::Equal
                    }
                    _ => false,
                };
                if same_key {
                    self.group_pos = 0;
                    continue;
                }
                self.right_group.clear();
                self.group_pos = 0;
            }

            // Sweep: advance the smaller side until the keys meet
            loop {
                let (Some(left_row), Some(right_row)) = (&self.left_cur, &self.right_cur) else {
                    self.ended = true;
                    return Ok(());
                };
                match self.cross_compare(left_row, right_row)? {
                    Ordering::Less => self.left_cur = self.read_left()?,
                    Ordering::Greater => self.right_cur = self.read_right()?,
                    Ordering::Equal => break,
                }
            }

            // Buffer the whole right-side run of this key
            let first = match self.right_cur.take() {
                Some(row) => row,
                None => {
                    self.ended = true;
                    return Ok(());
                }
            };
            self.right_group.push(first);
            loop {
                let next = self.read_right()?;
                match next {
                    Some(row)
                        if compare_at(&row, &self.right_group[0], &self.right_col)
                            == Ordering::Equal =>
                    {
                        self.right_group.push(row);
                    }
                    other => {
                        self.right_cur = other;
                        break;
                    }
                }
            }
            self.group_pos = 0;
        }
    }
}

impl Executor for MergeJoinExec {
    fn begin_tuple(&mut self) -> QueryResult<()> {
        if self.use_index {
            self.left.begin_tuple()?;
            self.right.begin_tuple()?;
        } else {
            self.left_sorter = Some(Self::sort_side(&mut self.left, &self.left_col)?);
            self.right_sorter = Some(Self::sort_side(&mut self.right, &self.right_col)?);
        }
        self.left_cur = self.read_left()?;
        self.right_cur = self.read_right()?;
        self.produce()
    }

    fn next_tuple(&mut self) -> QueryResult<()> {
        if self.is_end() {
            return Err(QueryError::Internal("advancing a finished join".to_string()));
        }
        self.produce()
    }

    fn is_end(&self) -> bool {
        self.ended
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
        ExecutorKind::MergeJoin
    }
}
