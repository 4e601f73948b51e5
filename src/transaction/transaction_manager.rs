use dashmap::DashSet;
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::error::MicaResult;
use crate::recovery::{LogManager, LogRecordBody};
use crate::transaction::{LockManager, Transaction, TxnId, TxnState, WriteRecord};

/// Glues locks, logging and rollback into ACID transactions. Commit
/// forces the log to disk before releasing locks; abort replays the
/// write set in reverse through the catalog so index entries are rolled
/// back along with heap slots.
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    lock_manager: Arc<LockManager>,
    log_manager: Arc<LogManager>,
    active_txns: DashSet<TxnId>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>, log_manager: Arc<LogManager>) -> Self {
        Self {
            next_txn_id: AtomicU64::new(1),
            lock_manager,
            log_manager,
            active_txns: DashSet::new(),
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log_manager
    }

    /// Wait-die compares transaction ids; they must keep increasing
    /// across restarts, so recovery seeds the counter past the log.
    pub fn resume_txn_ids_after(&self, max_txn_id: TxnId) {
        let next = max_txn_id + 1;
        if self.next_txn_id.load(Ordering::SeqCst) < next {
            self.next_txn_id.store(next, Ordering::SeqCst);
        }
    }

    pub fn begin(&self, txn_mode: bool) -> MicaResult<Transaction> {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let mut txn = Transaction::new(id, txn_mode);
        let lsn = self
            .log_manager
            .append(id, txn.prev_lsn(), LogRecordBody::Begin)?;
        txn.set_prev_lsn(lsn);
        self.active_txns.insert(id);
        debug!("txn {id} begins (explicit={txn_mode})");
        Ok(txn)
    }

    /// Commit: the write set is no longer needed, the COMMIT record must
    /// be durable, then strict 2PL releases every lock at once.
    pub fn commit(&self, txn: &mut Transaction, _catalog: &Catalog) -> MicaResult<()> {
        txn.clear_write_set();
        let lsn = self
            .log_manager
            .append(txn.id(), txn.prev_lsn(), LogRecordBody::Commit)?;
        txn.set_prev_lsn(lsn);
        self.log_manager.flush_to(lsn)?;

        self.lock_manager.release_all(txn);
        txn.set_state(TxnState::Committed);
        self.active_txns.remove(&txn.id());
        debug!("txn {} committed at lsn {lsn}", txn.id());
        Ok(())
    }

    /// Abort: log the decision, then walk the write set backwards
    /// applying inverse operations through the catalog.
    pub fn abort(&self, txn: &mut Transaction, catalog: &Catalog) -> MicaResult<()> {
        if txn.state() == TxnState::Aborted {
            return Ok(());
        }
        let lsn = self
            .log_manager
            .append(txn.id(), txn.prev_lsn(), LogRecordBody::Abort)?;
        txn.set_prev_lsn(lsn);

        let write_set = txn.take_write_set();
        for record in write_set.into_iter().rev() {
            match record {
                WriteRecord::Insert { table, rid } => {
                    catalog.rollback_insert(&table, rid)?;
                }
                WriteRecord::Delete { table, rid, record } => {
                    catalog.rollback_delete(&table, rid, &record)?;
                }
                WriteRecord::Update {
                    table,
                    rid,
                    old_record,
                } => {
                    catalog.rollback_update(&table, rid, &old_record)?;
                }
            }
        }

        self.lock_manager.release_all(txn);
        txn.set_state(TxnState::Aborted);
        self.active_txns.remove(&txn.id());
        debug!("txn {} aborted", txn.id());
        Ok(())
    }
}
