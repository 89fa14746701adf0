use crate::record::{HeapFile, HeapScan, Rid};

use super::condition::Condition;
use super::error::{QueryError, QueryResult};
use super::{schema_out_cols, ExecContext, Executor, ExecutorKind, OutCol};

/// Full-table scan with a conjunctive single-row filter.
///
/// Join predicates are not evaluated here; only conditions whose operands
/// resolve within this table's row apply.
pub struct SeqScanExec {
    ctx: ExecContext,
    heap: HeapFile,
    conds: Vec<Condition>,
    cols: Vec<OutCol>,
    len: usize,
    scan: Option<HeapScan>,
    rid: Rid,
}

impl SeqScanExec {
    pub fn new(ctx: ExecContext, heap: HeapFile, conds: Vec<Condition>) -> Self {
        let cols = schema_out_cols(heap.schema());
        let conds = conds
            .into_iter()
            .map(|cond| cond.normalized_for(&cols))
            .collect();
        let len = heap.schema().record_size();
        Self {
            ctx,
            heap,
            conds,
            cols,
            len,
            scan: None,
            rid: Rid::INVALID,
        }
    }

    /// Whether the row at the cursor passes every condition
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

    /// Slide the cursor forward until a row passes or the scan ends
    fn skip_non_matching(&mut self) -> QueryResult<()> {
        loop {
            let Some(scan) = self.scan.as_ref() else {
                return Err(QueryError::Internal("scan not begun".to_string()));
            };
            if scan.is_end() {
                self.rid = Rid::INVALID;
                return Ok(());
            }
            let rid = scan.rid();
            if self.eval_conditions(rid)? {
                self.rid = rid;
                return Ok(());
            }
            let mut buffer = self.ctx.buffer.lock().unwrap();
            if let Some(scan) = self.scan.as_mut() {
                scan.next(&mut buffer)?;
            }
        }
    }
}

impl Executor for SeqScanExec {
    fn begin_tuple(&mut self) -> QueryResult<()> {
        let scan = {
            let mut buffer = self.ctx.buffer.lock().unwrap();
            self.heap.scan(&mut buffer)?
        };
        self.scan = Some(scan);
        self.skip_non_matching()
    }

    fn next_tuple(&mut self) -> QueryResult<()> {
        {
            let mut buffer = self.ctx.buffer.lock().unwrap();
            match self.scan.as_mut() {
                Some(scan) if !scan.is_end() => scan.next(&mut buffer)?,
                _ => return Err(QueryError::Internal("scan not begun".to_string())),
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
        ExecutorKind::SeqScan
    }

    fn rid(&self) -> Rid {
        self.rid
    }
}
