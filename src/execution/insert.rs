use crate::index::IndexError;
use crate::record::{HeapFile, Rid, Value};
use crate::transaction::WriteRecord;

use super::error::{QueryError, QueryResult};
use super::{ExecContext, Executor, ExecutorKind, IndexHandle, OutCol};

/// Inserts one row, maintaining every index and logging the write.
///
/// Every index is checked for a duplicate key before anything is written,
/// so a rejected insert leaves heap and indexes untouched.
pub struct InsertExec {
    ctx: ExecContext,
    heap: HeapFile,
    indexes: Vec<IndexHandle>,
    values: Vec<Value>,
    rid: Rid,
}

impl InsertExec {
    pub fn new(
        ctx: ExecContext,
        heap: HeapFile,
        indexes: Vec<IndexHandle>,
        values: Vec<Value>,
    ) -> Self {
        Self {
            ctx,
            heap,
            indexes,
            values,
            rid: Rid::INVALID,
        }
    }
}

impl Executor for InsertExec {
    fn begin_tuple(&mut self) -> QueryResult<()> {
        let schema = self.heap.schema().clone();
        if self.values.len() != schema.column_count() {
            return Err(QueryError::InvalidValueCount {
                expected: schema.column_count(),
                actual: self.values.len(),
            });
        }

        // Coerce each value to its column type (int<->float only)
        let mut cast_values = Vec::with_capacity(self.values.len());
        for (value, col) in self.values.iter().zip(schema.columns()) {
            cast_values.push(value.cast_to(col.dtype)?);
        }
        let row = schema.encode_row(&cast_values)?;

        let mut buffer = self.ctx.buffer.lock().unwrap();

        // Check every index before touching anything
        let mut keys = Vec::with_capacity(self.indexes.len());
        for index in &self.indexes {
            let key = index.project_key(&schema, &row);
            if index.tree.get_value(&mut buffer, &key)?.is_some() {
                return Err(QueryError::Index(IndexError::KeyDuplicate));
            }
            keys.push(key);
        }

        self.rid = self.heap.insert(&mut buffer, &row)?;
        for (index, key) in self.indexes.iter().zip(&keys) {
            index.tree.insert_entry(&mut buffer, key, self.rid)?;
        }
        drop(buffer);

        if let Some(txn) = &self.ctx.txn {
            txn.lock().unwrap().append_write_record(WriteRecord::Insert {
                table: schema.table_name().to_string(),
                rid: self.rid,
            });
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
            "insert produces no tuples".to_string(),
        ))
    }

    fn cols(&self) -> &[OutCol] {
        &[]
    }

    fn tuple_len(&self) -> usize {
        0
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Insert
    }

    fn rid(&self) -> Rid {
        self.rid
    }
}
