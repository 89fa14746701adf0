use crate::index::IndexScanCursor;
use crate::record::{HeapFile, Rid};

use super::condition::{Condition, CompOp, Operand};
use super::error::{QueryError, QueryResult};
use super::{schema_out_cols, ExecContext, Executor, ExecutorKind, IndexHandle, OutCol};

/// Range scan over one index, with every condition re-checked on the
/// fetched row.
///
/// The composite bounds are built column by column: `=` pins both sides,
/// `<`/`<=` pin the upper and leave the lower at the type minimum,
/// `>`/`>=` the reverse, `!=` and unconstrained columns span the full
/// type range. Conditions are matched to index columns by name.
pub struct IndexScanExec {
    ctx: ExecContext,
    heap: HeapFile,
    index: IndexHandle,
    conds: Vec<Condition>,
    cols: Vec<OutCol>,
    len: usize,
    cursor: Option<IndexScanCursor>,
    rid: Rid,
}

impl IndexScanExec {
    pub fn new(
        ctx: ExecContext,
        heap: HeapFile,
        index: IndexHandle,
        conds: Vec<Condition>,
    ) -> Self {
        let cols = schema_out_cols(heap.schema());
        let conds = conds
            .into_iter()
            .map(|cond| cond.normalized_for(&cols))
            .collect();
        let len = heap.schema().record_size();
        Self {
            ctx,
            heap,
            index,
            conds,
            cols,
            len,
            cursor: None,
            rid: Rid::INVALID,
        }
    }

    /// Build the `[lower, upper]` composite keys from the conditions
    fn build_bounds(&self) -> QueryResult<(Vec<u8>, Vec<u8>)> {
        let schema = self.heap.schema();
        let mut lower = Vec::new();
        let mut upper = Vec::new();

        for &col_idx in &self.index.col_indices {
            let col = &schema.columns()[col_idx];
            let cond = self.conds.iter().find_map(|cond| {
                if cond.lhs.column != col.name {
                    return None;
                }
                match &cond.rhs {
                    Operand::Literal(value) => Some((cond.op, value)),
                    Operand::Column(_) => None,
                }
            });

            match cond {
                Some((op, value)) => {
                    let bytes = value.cast_to(col.dtype)?.serialize(col.dtype)?;
                    match op {
                        CompOp::Eq => {
                            lower.extend_from_slice(&bytes);
                            upper.extend_from_slice(&bytes);
                        }
                        CompOp::Lt | CompOp::Le => {
                            lower.extend_from_slice(&col.dtype.min_bytes());
                            upper.extend_from_slice(&bytes);
                        }
                        CompOp::Gt | CompOp::Ge => {
                            lower.extend_from_slice(&bytes);
                            upper.extend_from_slice(&col.dtype.max_bytes());
                        }
                        CompOp::Ne => {
                            lower.extend_from_slice(&col.dtype.min_bytes());
                            upper.extend_from_slice(&col.dtype.max_bytes());
                        }
                    }
                }
                None => {
                    lower.extend_from_slice(&col.dtype.min_bytes());
                    upper.extend_from_slice(&col.dtype.max_bytes());
                }
            }
        }
        Ok((lower, upper))
    }

    fn eval_conditions(&self, rid: Rid) -> QueryResult<bool> {
        let row = {
            let mut buffer = self.ctx.buffer.lock().unwrap();
            self.heap.get(&mut buffer, rid)?
        };
        for cond in &self.conds {
            if !cond.eval_row(&row, &self.cols)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn skip_non_matching(&mut self) -> QueryResult<()> {
        loop {
            let Some(cursor) = self.cursor.as_ref() else {
                return Err(QueryError::Internal("index scan not begun".to_string()));
            };
            if cursor.is_end() {
                self.rid = Rid::INVALID;
                return Ok(());
            }
            let rid = {
                let mut buffer = self.ctx.buffer.lock().unwrap();
                cursor.rid(&mut buffer)?
            };
            if self.eval_conditions(rid)? {
                self.rid = rid;
                return Ok(());
            }
            let mut buffer = self.ctx.buffer.lock().unwrap();
            if let Some(cursor) = self.cursor.as_mut() {
                cursor.next(&mut buffer)?;
            }
        }
    }
}

impl Executor for IndexScanExec {
    fn begin_tuple(&mut self) -> QueryResult<()> {
        let (lower_key, upper_key) = self.build_bounds()?;
        let cursor = {
            let mut buffer = self.ctx.buffer.lock().unwrap();
            let lower = self.index.tree.lower_bound(&mut buffer, &lower_key)?;
            let upper = self.index.tree.upper_bound(&mut buffer, &upper_key)?;
            IndexScanCursor::new(self.index.tree.clone(), lower, upper)
        };
        self.cursor = Some(cursor);
        self.skip_non_matching()
    }

    fn next_tuple(&mut self) -> QueryResult<()> {
        {
            let mut buffer = self.ctx.buffer.lock().unwrap();
            match self.cursor.as_mut() {
                Some(cursor) if !cursor.is_end() => cursor.next(&mut buffer)?,
                _ => return Err(QueryError::Internal("index scan not begun".to_string())),
            }
        }
        self.skip_non_matching()
    }

    fn is_end(&self) -> bool {
        self.rid.is_invalid()
    }

    fn current(&mut self) -> QueryResult<Vec<u8>> {
        let mut buffer = self.ctx.buffer.lock().unwrap();
        Ok(self.heap.get(&mut buffer, self.rid)?)
    }

    fn cols(&self) -> &[OutCol] {
        &self.cols
    }

    fn tuple_len(&self) -> usize {
        self.len
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::IndexScan
    }

    fn rid(&self) -> Rid {
        self.rid
    }
}
