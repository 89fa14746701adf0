use crate::index::IndexError;
use crate::record::{HeapFile, Rid};
use crate::transaction::WriteRecord;

use super::condition::SetClause;
use super::error::{QueryError, QueryResult};
use super::{ExecContext, Executor, ExecutorKind, IndexHandle, OutCol};

/// Applies SET clauses to the rows at the given Rids.
///
/// Index maintenance is two-phase per row: first every changed key is
/// computed and checked for duplicates, then the delete+insert pairs run.
/// A duplicate detected for a later row does not roll back earlier rows of
/// the same statement; transaction abort is the recovery path.
pub struct UpdateExec {
    ctx: ExecContext,
    heap: HeapFile,
    indexes: Vec<IndexHandle>,
    rids: Vec<Rid>,
    set_clauses: Vec<SetClause>,
}

impl UpdateExec {
    pub fn new(
        ctx: ExecContext,
        heap: HeapFile,
        indexes: Vec<IndexHandle>,
        rids: Vec<Rid>,
        set_clauses: Vec<SetClause>,
    ) -> Self {
        Self {
            ctx,
            heap,
            indexes,
            rids,
            set_clauses,
        }
    }
}

impl Executor for UpdateExec {
    fn begin_tuple(&mut self) -> QueryResult<()> {
        let schema = self.heap.schema().clone();
        let mut buffer = self.ctx.buffer.lock().unwrap();

        for &rid in &self.rids {
            let before = self.heap.get(&mut buffer, rid)?;
            let mut after = before.clone();

            for clause in &self.set_clauses {
                let col_idx = schema
                    .find_column(&clause.column)
                    .ok_or_else(|| QueryError::ColumnNotFound(clause.column.clone()))?;
                let col = &schema.columns()[col_idx];
                let bytes = clause.value.cast_to(col.dtype)?.serialize(col.dtype)?;
                let offset = schema.column_offset(col_idx);
                after[offset..offset + col.size()].copy_from_slice(&bytes);
            }

            // Phase one: compute changed keys and validate them all
            let mut changed = Vec::new();
            for index in &self.indexes {
                let key_old = index.project_key(&schema, &before);
                let key_new = index.project_key(&schema, &after);
                if key_old == key_new {
                    continue;
                }
                if index.tree.get_value(&mut buffer, &key_new)?.is_some() {
                    return Err(QueryError::Index(IndexError::KeyDuplicate));
                }
                changed.push((index, key_old, key_new));
            }

            // Phase two: swap the index entries
            for (index, key_old, key_new) in changed {
                index.tree.delete_entry(&mut buffer, &key_old)?;
                index.tree.insert_entry(&mut buffer, &key_new, rid)?;
            }

            if let Some(txn) = &self.ctx.txn {
                txn.lock().unwrap().append_write_record(WriteRecord::Update {
                    table: schema.table_name().to_string(),
                    rid,
                    before: before.clone(),
                    after: after.clone(),
                });
            }

            self.heap.update(&mut buffer, rid, &after)?;
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
            "update produces no tuples".to_string(),
        ))
    }

    fn cols(&self) -> &[OutCol] {
        &[]
    }

    fn tuple_len(&self) -> usize {
        0
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Update
    }
}
