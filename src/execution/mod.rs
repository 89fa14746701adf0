mod aggregation;
mod condition;
mod delete;
mod error;
mod index_scan;
mod insert;
mod merge_join;
mod nested_loop_join;
mod projection;
mod seq_scan;
mod sort_exec;
mod update;

pub use aggregation::{AggFunc, AggSelect, AggregationExec, HavingCond};
pub use condition::{ColRef, CompOp, Condition, Operand, SetClause};
pub use delete::DeleteExec;
pub use error::{QueryError, QueryResult};
pub use index_scan::IndexScanExec;
pub use insert::InsertExec;
pub use merge_join::MergeJoinExec;
pub use nested_loop_join::NestedLoopJoinExec;
pub use projection::ProjectionExec;
pub use seq_scan::SeqScanExec;
pub use sort_exec::SortExec;
pub use update::UpdateExec;

use std::sync::{Arc, Mutex};

use crate::file::BufferManager;
use crate::index::BPlusTree;
use crate::record::{DataType, Rid, TableSchema};
use crate::transaction::Transaction;

/// Column of an executor's output tuple
#[derive(Debug, Clone)]
pub struct OutCol {
    pub table: String,
    pub name: String,
    pub dtype: DataType,
    pub offset: usize,
    pub len: usize,
}

/// Output columns of a full-row scan over `schema`
pub fn schema_out_cols(schema: &TableSchema) -> Vec<OutCol> {
    let mut cols = Vec::with_capacity(schema.column_count());
    let mut offset = 0;
    for col in schema.columns() {
        cols.push(OutCol {
            table: schema.table_name().to_string(),
            name: col.name.clone(),
            dtype: col.dtype,
            offset,
            len: col.size(),
        });
        offset += col.size();
    }
    cols
}

/// Discriminator for plan-tree matching without downcasts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    SeqScan,
    IndexScan,
    NestedLoopJoin,
    MergeJoin,
    Sort,
    Projection,
    Aggregation,
    Insert,
    Update,
    Delete,
}

/// Pull-based iterator node of a physical plan.
///
/// `begin_tuple` positions at the first output tuple, `next_tuple`
/// advances, `current` hands the positioned tuple out exactly once.
/// Mutating executors do their whole job in `begin_tuple` and yield no
/// tuples.
pub trait Executor {
    fn begin_tuple(&mut self) -> QueryResult<()>;
    fn next_tuple(&mut self) -> QueryResult<()>;
    fn is_end(&self) -> bool;
    fn current(&mut self) -> QueryResult<Vec<u8>>;
    fn cols(&self) -> &[OutCol];
    fn tuple_len(&self) -> usize;
    fn kind(&self) -> ExecutorKind;

    /// Heap position of the current tuple, for scans feeding mutations
    fn rid(&self) -> Rid {
        Rid::INVALID
    }
}

/// Shared state every executor carries: the buffer pool and, for mutating
/// executors inside a transaction, the active transaction
#[derive(Clone)]
pub struct ExecContext {
    pub buffer: Arc<Mutex<BufferManager>>,
    pub txn: Option<Arc<Mutex<Transaction>>>,
}

impl ExecContext {
    pub fn new(buffer: Arc<Mutex<BufferManager>>) -> Self {
        Self { buffer, txn: None }
    }

    pub fn with_txn(buffer: Arc<Mutex<BufferManager>>, txn: Arc<Mutex<Transaction>>) -> Self {
        Self {
            buffer,
            txn: Some(txn),
        }
    }
}

/// An open index over a table, with the schema columns it covers in order
#[derive(Clone)]
pub struct IndexHandle {
    pub name: String,
    pub tree: BPlusTree,
    pub col_indices: Vec<usize>,
}

impl IndexHandle {
    /// Concatenate the indexed columns of a row into a key
    pub fn project_key(&self, schema: &TableSchema, row: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.tree.key_schema().total_len());
        for &idx in &self.col_indices {
            let offset = schema.column_offset(idx);
            let len = schema.columns()[idx].size();
            key.extend_from_slice(&row[offset..offset + len]);
        }
        key
    }
}
