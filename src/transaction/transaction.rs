use std::collections::HashSet;

use crate::recovery::{Lsn, INVALID_LSN};
use crate::storage::Rid;
use crate::transaction::LockDataId;

pub type TxnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Default,
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// A physical change made by a transaction, recorded so abort (and
/// crash-time undo) can apply the inverse operation.
#[derive(Debug, Clone)]
pub enum WriteRecord {
    Insert {
        table: String,
        rid: Rid,
    },
    Delete {
        table: String,
        rid: Rid,
        record: Vec<u8>,
    },
    Update {
        table: String,
        rid: Rid,
        old_record: Vec<u8>,
    },
}

#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    state: TxnState,
    lock_set: HashSet<LockDataId>,
    write_set: Vec<WriteRecord>,
    prev_lsn: Lsn,
    /// True for explicit multi-statement transactions; false while
    /// auto-committing single statements.
    txn_mode: bool,
}

impl Transaction {
    pub fn new(id: TxnId, txn_mode: bool) -> Self {
        Self {
            id,
            state: TxnState::Default,
            lock_set: HashSet::new(),
            write_set: Vec::new(),
            prev_lsn: INVALID_LSN,
            txn_mode,
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn set_state(&mut self, state: TxnState) {
        self.state = state;
    }

    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn
    }

    pub fn set_prev_lsn(&mut self, lsn: Lsn) {
        self.prev_lsn = lsn;
    }

    pub fn txn_mode(&self) -> bool {
        self.txn_mode
    }

    pub fn set_txn_mode(&mut self, txn_mode: bool) {
        self.txn_mode = txn_mode;
    }

    pub fn append_write_record(&mut self, record: WriteRecord) {
        self.write_set.push(record);
    }

    pub fn take_write_set(&mut self) -> Vec<WriteRecord> {
        std::mem::take(&mut self.write_set)
    }

    pub fn clear_write_set(&mut self) {
        self.write_set.clear();
    }

    pub fn lock_set(&self) -> &HashSet<LockDataId> {
        &self.lock_set
    }

    pub fn lock_set_mut(&mut self) -> &mut HashSet<LockDataId> {
        &mut self.lock_set
    }

    pub fn take_lock_set(&mut self) -> HashSet<LockDataId> {
        std::mem::take(&mut self.lock_set)
    }
}
