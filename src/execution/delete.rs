use crate::record::{HeapFile, Rid};
use crate::transaction::WriteRecord;

use super::error::{QueryError, QueryResult};
use super::{ExecContext, Executor, ExecutorKind, IndexHandle, OutCol};

/// Deletes the rows at the given Rids, removing their index entries and
/// logging each before-image.
pub struct DeleteExec {
    ctx: ExecContext,
    heap: HeapFile,
    indexes: Vec<IndexHandle>,
    rids: Vec<Rid>,
}

impl DeleteExec {
    pub fn new(
        ctx: ExecContext,
        heap: HeapFile,
        indexes: Vec<IndexHandle>,
        rids: Vec<Rid>,
    ) -> Self {
        Self {
            ctx,
            heap,
            indexes,
            rids,
        }
    }
}

impl Executor for DeleteExec {
    fn begin_tuple(&mut self) -> QueryResult<()> {
        let schema = self.heap.schema().clone();
        let mut buffer = self.ctx.buffer.lock().unwrap();

        for &rid in &self.rids {
            let row = self.heap.get(&mut buffer, rid)?;

            for index in &self.indexes {
                let key = index.project_key(&schema, &row);
                index.tree.delete_entry(&mut buffer, &key)?;
            }

            if let Some(txn) = &self.ctx.txn {
                txn.lock().unwrap().append_write_record(WriteRecord::Delete {
                    table: schema.table_name().to_string(),
                    rid,
                    before: row.clone(),
                });
            }

            self.heap.delete(&mut buffer, rid)?;
        }
        Ok(())
    }

    fn next_tuple(&mut self) -> QueryResult<()> {
        Ok(())
    }

    fn is_end(&self) -> bool {
        true
    }

    fn current(&mut self) -> QueryResult<Vec<u8>> {
        Err(QueryError::Internal(
            "delete produces no tuples".to_string(),
        ))
    }

    fn cols(&self) -> &[OutCol] {
        &[]
    }

    fn tuple_len(&self) -> usize {
        0
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Delete
    }
}
