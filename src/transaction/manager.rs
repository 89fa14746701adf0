use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::file::BufferManager;

use super::error::{TxnError, TxnResult};
use super::{Transaction, TxnId, TxnState, WriteRecord};

/// Process-wide transaction registry.
///
/// Hands out monotonic ids and owns the id-to-transaction map; the map is
/// mutex-guarded so client-session threads can begin transactions
/// concurrently. Lock release goes through the external lock manager's
/// handles, and the flush on commit/abort is the engine's durability
/// boundary.
pub struct TransactionManager {
    txns: Mutex<HashMap<TxnId, Arc<Mutex<Transaction>>>>,
    next_txn_id: Mutex<TxnId>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            txns: Mutex::new(HashMap::new()),
            next_txn_id: Mutex::new(0),
        }
    }

    /// Start a transaction and register it
    pub fn begin(&self) -> Arc<Mutex<Transaction>> {
        let id = {
            let mut next = self.next_txn_id.lock().unwrap();
            let id = *next;
            *next += 1;
            id
        };
        let txn = Arc::new(Mutex::new(Transaction::new(id)));
        self.txns.lock().unwrap().insert(id, txn.clone());
        txn
    }

    pub fn get(&self, id: TxnId) -> TxnResult<Arc<Mutex<Transaction>>> {
        self.txns
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(TxnError::TxnNotFound(id))
    }

    /// Commit: release locks, flush the log, mark `Committed`
    pub fn commit(
        &self,
        txn: &Arc<Mutex<Transaction>>,
        buffer_mgr: &mut BufferManager,
    ) -> TxnResult<()> {
        {
            let mut txn = txn.lock().unwrap();
            if txn.state() != TxnState::Active {
                return Err(TxnError::NotActive(txn.id()));
            }
            // Lock release hook for the external lock manager
            txn.clear_locks();
            txn.take_write_set();
        }

        // Commit fsync boundary
        buffer_mgr.flush_all()?;
        txn.lock().unwrap().set_state(TxnState::Committed);
        Ok(())
    }

    /// Abort: replay the write set in reverse through `undo`, release
    /// locks, flush, mark `Aborted`.
    ///
    /// `undo` applies the inverse of one write record; the caller supplies
    /// it because the inversion needs table and index handles.
    pub fn abort(
        &self,
        txn: &Arc<Mutex<Transaction>>,
        buffer_mgr: &mut BufferManager,
        mut undo: impl FnMut(&WriteRecord, &mut BufferManager) -> TxnResult<()>,
    ) -> TxnResult<()> {
        let write_set = {
            let mut txn = txn.lock().unwrap();
            if txn.state() != TxnState::Active {
                return Err(TxnError::NotActive(txn.id()));
            }
            txn.take_write_set()
        };

        for record in write_set.iter().rev() {
            undo(record, buffer_mgr)?;
        }

        {
            let mut txn = txn.lock().unwrap();
            txn.clear_locks();
        }
        buffer_mgr.flush_all()?;
        txn.lock().unwrap().set_state(TxnState::Aborted);
        Ok(())
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
