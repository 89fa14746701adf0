#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::catalog::{Catalog, CatalogError, IndexMeta};
use crate::execution::{
    Condition, DeleteExec, ExecContext, Executor, IndexHandle, IndexScanExec, InsertExec,
    QueryError, SeqScanExec, SetClause, UpdateExec,
};
use crate::file::{BufferManager, FileError, PagedFileManager};
use crate::index::{BPlusTree, IndexError, KeySchema};
use crate::record::{ColumnDef, HeapFile, RecordError, Rid, TableSchema, Value};
use crate::transaction::{
    Transaction, TransactionManager, TxnError, TxnId, TxnResult, WriteRecord,
};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Transaction error: {0}")]
    Txn(#[from] TxnError),
}

pub type DbResult<T> = Result<T, DbError>;

/// Engine façade: one database directory holding the catalog meta-file,
/// one heap file per table, and one index file per index.
///
/// Owns the shared buffer pool, the open table and index handles, and the
/// transaction registry; DML entry points build and run executor trees.
pub struct Database {
    dir: PathBuf,
    buffer: Arc<Mutex<BufferManager>>,
    catalog: Catalog,
    tables: HashMap<String, HeapFile>,
    indexes: HashMap<String, BPlusTree>,
    txn_manager: TransactionManager,
}

impl Database {
    /// Open a database directory, creating it if needed, and reopen
    /// everything the catalog lists
    pub fn open(dir: impl AsRef<Path>) -> DbResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(CatalogError::Io)?;

        let catalog = Catalog::load(&dir)?;
        let buffer = Arc::new(Mutex::new(BufferManager::new(PagedFileManager::new())));

        let mut tables = HashMap::new();
        let mut indexes = HashMap::new();
        {
            let mut bm = buffer.lock().unwrap();
            let table_names: Vec<String> = catalog.table_names().cloned().collect();
            for name in table_names {
                let meta = catalog.table(&name)?;
                let heap = HeapFile::open(
                    &mut bm,
                    dir.join(format!("{name}.tbl")).to_string_lossy().as_ref(),
                    meta.schema.clone(),
                )?;
                tables.insert(name.clone(), heap);

                for index in &meta.indexes {
                    let tree = BPlusTree::open(
                        &mut bm,
                        dir.join(format!("{}.idx", index.name))
                            .to_string_lossy()
                            .as_ref(),
                    )?;
                    indexes.insert(index.name.clone(), tree);
                }
            }
        }

        Ok(Self {
            dir,
            buffer,
            catalog,
            tables,
            indexes,
            txn_manager: TransactionManager::new(),
        })
    }

    pub fn buffer(&self) -> Arc<Mutex<BufferManager>> {
        self.buffer.clone()
    }

    fn table_path(&self, name: &str) -> String {
        self.dir.join(format!("{name}.tbl")).to_string_lossy().into_owned()
    }

    fn index_path(&self, name: &str) -> String {
        self.dir.join(format!("{name}.idx")).to_string_lossy().into_owned()
    }

    /// Create a table and its heap file
    pub fn create_table(&mut self, name: &str, columns: Vec<ColumnDef>) -> DbResult<()> {
        if self.catalog.has_table(name) {
            return Err(CatalogError::TableExists(name.to_string()).into());
        }
        let schema = TableSchema::new(name, columns);
        let heap = {
            let mut bm = self.buffer.lock().unwrap();
            HeapFile::create(&mut bm, &self.table_path(name), schema.clone())?
        };
        self.catalog.add_table(schema)?;
        self.tables.insert(name.to_string(), heap);
        self.catalog.save(&self.dir)?;
        Ok(())
    }

    /// Create a table with an explicit per-page slot count (small pages
    /// make page-boundary behavior observable)
    pub fn create_table_with_capacity(
        &mut self,
        name: &str,
        columns: Vec<ColumnDef>,
        records_per_page: usize,
    ) -> DbResult<()> {
        if self.catalog.has_table(name) {
            return Err(CatalogError::TableExists(name.to_string()).into());
        }
        let schema = TableSchema::new(name, columns);
        let heap = {
            let mut bm = self.buffer.lock().unwrap();
            HeapFile::create_with_capacity(
                &mut bm,
                &self.table_path(name),
                schema.clone(),
                records_per_page,
            )?
        };
        self.catalog.add_table(schema)?;
        self.tables.insert(name.to_string(), heap);
        self.catalog.save(&self.dir)?;
        Ok(())
    }

    /// Drop a table, its heap file, and all of its index files
    pub fn drop_table(&mut self, name: &str) -> DbResult<()> {
        let meta = self.catalog.remove_table(name)?;
        let heap = self.tables.remove(name);

        let mut bm = self.buffer.lock().unwrap();
        if let Some(heap) = heap {
            bm.discard_file_pages(heap.file_handle());
            bm.file_manager_mut().remove_file(self.table_path(name))?;
        }
        for index in &meta.indexes {
            if let Some(tree) = self.indexes.remove(&index.name) {
                bm.discard_file_pages(tree.file_handle());
                bm.file_manager_mut().remove_file(self.index_path(&index.name))?;
            }
        }
        drop(bm);

        self.catalog.save(&self.dir)?;
        Ok(())
    }

    /// Create an index and back-fill it from the table.
    ///
    /// Rows whose key already exists in the new index are skipped, so a
    /// table with duplicates still gets an index over the distinct keys.
    pub fn create_index(&mut self, table: &str, columns: &[&str]) -> DbResult<()> {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let schema = self.catalog.table(table)?.schema.clone();

        let key_cols = columns
            .iter()
            .map(|name| {
                schema
                    .find_column(name)
                    .map(|idx| {
                        let dtype = schema.columns()[idx].dtype;
                        (dtype, dtype.size())
                    })
                    .ok_or_else(|| CatalogError::ColumnNotFound(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let index_meta = self.catalog.add_index(table, columns)?;
        let heap = self.heap_file(table)?;

        let mut bm = self.buffer.lock().unwrap();
        let tree = BPlusTree::create(
            &mut bm,
            &self.index_path(&index_meta.name),
            KeySchema::new(key_cols),
        )?;

        let handle = self.make_handle(&index_meta, &schema, tree.clone())?;
        let mut scan = heap.scan(&mut bm)?;
        while !scan.is_end() {
            let rid = scan.rid();
            let row = heap.get(&mut bm, rid)?;
            let key = handle.project_key(&schema, &row);
            match tree.insert_entry(&mut bm, &key, rid) {
                // Back-fill keeps going past rows that collide
                Err(IndexError::KeyDuplicate) => {}
                other => other?,
            }
            scan.next(&mut bm)?;
        }
        drop(bm);

        self.indexes.insert(index_meta.name.clone(), tree);
        self.catalog.save(&self.dir)?;
        Ok(())
    }

    /// Drop an index and its file
    pub fn drop_index(&mut self, table: &str, columns: &[&str]) -> DbResult<()> {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let meta = self.catalog.remove_index(table, &columns)?;

        if let Some(tree) = self.indexes.remove(&meta.name) {
            let mut bm = self.buffer.lock().unwrap();
            bm.discard_file_pages(tree.file_handle());
            bm.file_manager_mut().remove_file(self.index_path(&meta.name))?;
        }
        self.catalog.save(&self.dir)?;
        Ok(())
    }

    /// The open heap handle for a table
    pub fn heap_file(&self, table: &str) -> DbResult<HeapFile> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| CatalogError::TableNotFound(table.to_string()).into())
    }

    fn make_handle(
        &self,
        meta: &IndexMeta,
        schema: &TableSchema,
        tree: BPlusTree,
    ) -> DbResult<IndexHandle> {
        let col_indices = meta
            .columns
            .iter()
            .map(|name| {
                schema
                    .find_column(name)
                    .ok_or_else(|| CatalogError::ColumnNotFound(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(IndexHandle {
            name: meta.name.clone(),
            tree,
            col_indices,
        })
    }

    /// All index handles over a table
    pub fn index_handles(&self, table: &str) -> DbResult<Vec<IndexHandle>> {
        let meta = self.catalog.table(table)?;
        let mut handles = Vec::with_capacity(meta.indexes.len());
        for index in &meta.indexes {
            let tree = self
                .indexes
                .get(&index.name)
                .cloned()
                .ok_or_else(|| CatalogError::IndexNotFound(index.name.clone()))?;
            handles.push(self.make_handle(index, &meta.schema, tree)?);
        }
        Ok(handles)
    }

    fn exec_ctx(&self, txn: Option<TxnId>) -> DbResult<ExecContext> {
        Ok(match txn {
            Some(id) => ExecContext::with_txn(self.buffer.clone(), self.txn_manager.get(id)?),
            None => ExecContext::new(self.buffer.clone()),
        })
    }

    /// Sequential-scan executor over a table (plan building block)
    pub fn seq_scan(&self, table: &str, conds: Vec<Condition>) -> DbResult<SeqScanExec> {
        Ok(SeqScanExec::new(
            self.exec_ctx(None)?,
            self.heap_file(table)?,
            conds,
        ))
    }

    /// Index-scan executor over a table (plan building block)
    pub fn index_scan(
        &self,
        table: &str,
        columns: &[&str],
        conds: Vec<Condition>,
    ) -> DbResult<IndexScanExec> {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let name = IndexMeta::index_name(table, &columns);
        let meta = self.catalog.table(table)?;
        let index = meta
            .indexes
            .iter()
            .find(|ix| ix.name == name)
            .ok_or_else(|| CatalogError::IndexNotFound(name.clone()))?;
        let tree = self
            .indexes
            .get(&name)
            .cloned()
            .ok_or_else(|| CatalogError::IndexNotFound(name))?;
        let handle = self.make_handle(index, &meta.schema, tree)?;

        Ok(IndexScanExec::new(
            self.exec_ctx(None)?,
            self.heap_file(table)?,
            handle,
            conds,
        ))
    }

    /// Insert one row
    pub fn insert(&self, txn: Option<TxnId>, table: &str, values: Vec<Value>) -> DbResult<Rid> {
        let mut exec = InsertExec::new(
            self.exec_ctx(txn)?,
            self.heap_file(table)?,
            self.index_handles(table)?,
            values,
        );
        exec.begin_tuple()?;
        Ok(exec.rid())
    }

    /// Delete every row matching the conditions; returns the row count
    pub fn delete(
        &self,
        txn: Option<TxnId>,
        table: &str,
        conds: Vec<Condition>,
    ) -> DbResult<usize> {
        let rids = self.collect_rids(table, conds)?;
        let count = rids.len();
        let mut exec = DeleteExec::new(
            self.exec_ctx(txn)?,
            self.heap_file(table)?,
            self.index_handles(table)?,
            rids,
        );
        exec.begin_tuple()?;
        Ok(count)
    }

    /// Apply SET clauses to every row matching the conditions
    pub fn update(
        &self,
        txn: Option<TxnId>,
        table: &str,
        set_clauses: Vec<SetClause>,
        conds: Vec<Condition>,
    ) -> DbResult<usize> {
        let rids = self.collect_rids(table, conds)?;
        let count = rids.len();
        let mut exec = UpdateExec::new(
            self.exec_ctx(txn)?,
            self.heap_file(table)?,
            self.index_handles(table)?,
            rids,
            set_clauses,
        );
        exec.begin_tuple()?;
        Ok(count)
    }

    /// Scan a table and decode every matching row
    pub fn select(&self, table: &str, conds: Vec<Condition>) -> DbResult<Vec<Vec<Value>>> {
        let schema = self.catalog.table(table)?.schema.clone();
        let mut scan = self.seq_scan(table, conds)?;
        let mut rows = Vec::new();
        scan.begin_tuple()?;
        while !scan.is_end() {
            rows.push(schema.decode_row(&scan.current()?)?);
            scan.next_tuple()?;
        }
        Ok(rows)
    }

    fn collect_rids(&self, table: &str, conds: Vec<Condition>) -> DbResult<Vec<Rid>> {
        let mut scan = self.seq_scan(table, conds)?;
        let mut rids = Vec::new();
        scan.begin_tuple()?;
        while !scan.is_end() {
            rids.push(scan.rid());
            scan.next_tuple()?;
        }
        Ok(rids)
    }

    pub fn begin_txn(&self) -> TxnId {
        self.txn_manager.begin().lock().unwrap().id()
    }

    pub fn txn(&self, id: TxnId) -> DbResult<Arc<Mutex<Transaction>>> {
        Ok(self.txn_manager.get(id)?)
    }

    /// Commit: release locks, flush, mark committed
    pub fn commit_txn(&self, id: TxnId) -> DbResult<()> {
        let txn = self.txn_manager.get(id)?;
        let mut bm = self.buffer.lock().unwrap();
        self.txn_manager.commit(&txn, &mut bm)?;
        Ok(())
    }

    /// Abort: undo the write set in reverse, release locks, flush, mark
    /// aborted
    pub fn abort_txn(&self, id: TxnId) -> DbResult<()> {
        let txn = self.txn_manager.get(id)?;
        let mut bm = self.buffer.lock().unwrap();
        self.txn_manager
            .abort(&txn, &mut bm, |record, bm| self.undo_record(record, bm))?;
        Ok(())
    }

    /// Apply the inverse of one write record against the heap and every
    /// index of its table
    fn undo_record(&self, record: &WriteRecord, bm: &mut BufferManager) -> TxnResult<()> {
        match record {
            WriteRecord::Insert { table, rid } => {
                let heap = self.undo_heap(table)?;
                let handles = self.undo_handles(table)?;
                let row = heap.get(bm, *rid)?;
                for handle in &handles {
                    let key = handle.project_key(heap.schema(), &row);
                    handle.tree.delete_entry(bm, &key)?;
                }
                heap.delete(bm, *rid)?;
            }
            WriteRecord::Delete { table, rid, before } => {
                let heap = self.undo_heap(table)?;
                let handles = self.undo_handles(table)?;
                heap.insert_at(bm, *rid, before)?;
                for handle in &handles {
                    let key = handle.project_key(heap.schema(), before);
                    handle.tree.insert_entry(bm, &key, *rid)?;
                }
            }
            WriteRecord::Update {
                table,
                rid,
                before,
                after,
            } => {
                let heap = self.undo_heap(table)?;
                let handles = self.undo_handles(table)?;
                heap.update(bm, *rid, before)?;
                for handle in &handles {
                    let key_before = handle.project_key(heap.schema(), before);
                    let key_after = handle.project_key(heap.schema(), after);
                    if key_before == key_after {
                        continue;
                    }
                    handle.tree.delete_entry(bm, &key_after)?;
                    handle.tree.insert_entry(bm, &key_before, *rid)?;
                }
            }
        }
        Ok(())
    }

    fn undo_heap(&self, table: &str) -> TxnResult<HeapFile> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| TxnError::Internal(format!("table {table} missing during abort")))
    }

    fn undo_handles(&self, table: &str) -> TxnResult<Vec<IndexHandle>> {
        self.index_handles(table)
            .map_err(|e| TxnError::Internal(format!("index handles for {table}: {e}")))
    }
}
