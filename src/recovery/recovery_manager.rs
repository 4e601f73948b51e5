use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::error::MicaResult;
use crate::recovery::log_record::{LogRecord, LogRecordBody};
use crate::recovery::{LogManager, Lsn, INVALID_LSN};
use crate::storage::DiskManager;
use crate::transaction::{TxnId, WriteRecord};

/// What a recovery pass did, mostly for logging and tests.
#[derive(Debug, Default)]
pub struct RecoverySummary {
    pub replayed: usize,
    pub undone_txns: Vec<TxnId>,
    pub max_lsn: Lsn,
}

/// ARIES-style restart: one forward scan to find loser transactions
/// (analyze), a physiological replay of every data record guarded by
/// page LSNs (redo), then reverse application of each loser's
/// reconstructed write set (undo).
pub struct RecoveryManager {
    disk: Arc<DiskManager>,
    catalog: Arc<Catalog>,
    log_manager: Arc<LogManager>,
}

impl RecoveryManager {
    pub fn new(disk: Arc<DiskManager>, catalog: Arc<Catalog>, log_manager: Arc<LogManager>) -> Self {
        Self {
            disk,
            catalog,
            log_manager,
        }
    }

    pub fn recover(&self) -> MicaResult<RecoverySummary> {
        let mut records = self.scan_log()?;
        let mut summary = RecoverySummary::default();

        // Analyze: chain prev_lsn pointers and keep the set of
        // transactions with no commit/abort on record.
        let mut active_txns: HashMap<TxnId, Lsn> = HashMap::new();
        let mut max_txn_id: TxnId = 0;
        for record in records.iter_mut() {
            summary.max_lsn = summary.max_lsn.max(record.lsn);
            max_txn_id = max_txn_id.max(record.txn_id);
            match record.body {
                LogRecordBody::Begin => {
                    active_txns.insert(record.txn_id, record.lsn);
                }
                LogRecordBody::Commit | LogRecordBody::Abort => {
                    active_txns.remove(&record.txn_id);
                }
                _ => {
                    record.prev_lsn = active_txns
                        .get(&record.txn_id)
                        .copied()
                        .unwrap_or(INVALID_LSN);
                    active_txns.insert(record.txn_id, record.lsn);
                }
            }
        }

        // Redo: replay in log order, rebuilding per-transaction write
        // sets as we go. Commit discards a write set; an abort record
        // rolls the set back exactly like a live abort would have.
        let mut write_sets: HashMap<TxnId, Vec<WriteRecord>> = HashMap::new();
        for record in &records {
            match &record.body {
                LogRecordBody::Begin => {
                    write_sets.entry(record.txn_id).or_default();
                }
                LogRecordBody::Commit => {
                    write_sets.remove(&record.txn_id);
                }
                LogRecordBody::Abort => {
                    if let Some(write_set) = write_sets.remove(&record.txn_id) {
                        self.roll_back(write_set)?;
                    }
                }
                LogRecordBody::Insert {
                    table,
                    rid,
                    new_record,
                } => {
                    if !self.applicable(table, new_record)? {
                        continue;
                    }
                    self.catalog.recovery_insert(table, *rid, new_record)?;
                    self.advance_page_lsn(table, rid.page_no, record.lsn)?;
                    summary.replayed += 1;
                    write_sets
                        .entry(record.txn_id)
                        .or_default()
                        .push(WriteRecord::Insert {
                            table: table.clone(),
                            rid: *rid,
                        });
                }
                LogRecordBody::Delete {
                    table,
                    rid,
                    old_record,
                } => {
                    if !self.applicable(table, old_record)? {
                        continue;
                    }
                    self.catalog.recovery_delete(table, *rid, old_record)?;
                    self.advance_page_lsn(table, rid.page_no, record.lsn)?;
                    summary.replayed += 1;
                    write_sets
                        .entry(record.txn_id)
                        .or_default()
                        .push(WriteRecord::Delete {
                            table: table.clone(),
                            rid: *rid,
                            record: old_record.clone(),
                        });
                }
                LogRecordBody::Update {
                    table,
                    rid,
                    old_record,
                    new_record,
                } => {
                    if !self.applicable(table, new_record)? {
                        continue;
                    }
                    self.catalog
                        .recovery_update(table, *rid, old_record, new_record)?;
                    self.advance_page_lsn(table, rid.page_no, record.lsn)?;
                    summary.replayed += 1;
                    write_sets
                        .entry(record.txn_id)
                        .or_default()
                        .push(WriteRecord::Update {
                            table: table.clone(),
                            rid: *rid,
                            old_record: old_record.clone(),
                        });
                }
            }
        }

        // New log records (the closing aborts) continue past the replayed
        // tail, and transaction ids stay unique across restarts.
        self.log_manager.resume_after(summary.max_lsn);

        // Undo: losers roll back in reverse write order. Appending their
        // abort records makes a second restart a no-op.
        let mut losers: Vec<TxnId> = active_txns.keys().copied().collect();
        losers.sort_unstable();
        for txn_id in losers {
            if let Some(write_set) = write_sets.remove(&txn_id) {
                self.roll_back(write_set)?;
            }
            let prev = active_txns.get(&txn_id).copied().unwrap_or(INVALID_LSN);
            self.log_manager.append(txn_id, prev, LogRecordBody::Abort)?;
            summary.undone_txns.push(txn_id);
        }
        self.log_manager.flush()?;

        self.catalog.rebuild_free_lists()?;

        if summary.replayed > 0 || !summary.undone_txns.is_empty() {
            info!(
                "recovery replayed {} record(s), rolled back {} transaction(s)",
                summary.replayed,
                summary.undone_txns.len()
            );
        } else {
            debug!("recovery found nothing to do");
        }
        Ok(summary)
    }

    /// Transaction-id high-water mark of the log, so restarts keep ids
    /// monotonic for wait-die.
    pub fn max_txn_id(&self) -> MicaResult<TxnId> {
        Ok(self
            .scan_log()?
            .iter()
            .map(|r| r.txn_id)
            .max()
            .unwrap_or(0))
    }

    fn scan_log(&self) -> MicaResult<Vec<LogRecord>> {
        let len = self.disk.log_len() as usize;
        let mut bytes = vec![0u8; len];
        let n = self.disk.read_log(&mut bytes, 0)?;
        let mut records = Vec::new();
        let mut offset = 0usize;
        while offset < n {
            match LogRecord::decode(&bytes[offset..n]) {
                Some((record, consumed)) => {
                    records.push(record);
                    offset += consumed;
                }
                // A torn tail write ends the usable log.
                None => break,
            }
        }
        Ok(records)
    }

    /// Records for since-dropped tables (or stale schemas) are skipped.
    fn applicable(&self, table: &str, record: &[u8]) -> MicaResult<bool> {
        if !self.catalog.has_table(table) {
            return Ok(false);
        }
        let heap = self.catalog.heap(table)?;
        Ok(heap.record_size() as usize == record.len())
    }

    fn advance_page_lsn(&self, table: &str, page_no: u32, lsn: Lsn) -> MicaResult<()> {
        let heap = self.catalog.heap(table)?;
        if page_no >= heap.num_pages() {
            return Ok(());
        }
        if heap.page_lsn(page_no)? < lsn {
            heap.set_page_lsn(page_no, lsn)?;
        }
        Ok(())
    }

    fn roll_back(&self, write_set: Vec<WriteRecord>) -> MicaResult<()> {
        for record in write_set.into_iter().rev() {
            match record {
                WriteRecord::Insert { table, rid } => {
                    self.catalog.rollback_insert(&table, rid)?;
                }
                WriteRecord::Delete { table, rid, record } => {
                    self.catalog.rollback_delete(&table, rid, &record)?;
                }
                WriteRecord::Update {
                    table,
                    rid,
                    old_record,
                } => {
                    self.catalog.rollback_update(&table, rid, &old_record)?;
                }
            }
        }
        Ok(())
    }
}
