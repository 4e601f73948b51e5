use log::trace;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::buffer::FileId;
use crate::error::{AbortReason, MicaError, MicaResult};
use crate::storage::Rid;
use crate::transaction::{Transaction, TxnId, TxnState};

/// A lockable target: a whole table (by its heap fd) or one record in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockDataId {
    Table { fd: FileId },
    Record { fd: FileId, rid: Rid },
}

impl LockDataId {
    fn is_table(&self) -> bool {
        matches!(self, LockDataId::Table { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
    IntentionShared,
    IntentionExclusive,
    SharedIntentionExclusive,
}

/// Strongest granted mode in a queue; new requests are tested against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum GroupLockMode {
    NonLock,
    IS,
    IX,
    S,
    SIX,
    X,
}

fn group_of(mode: LockMode) -> GroupLockMode {
    match mode {
        LockMode::Shared => GroupLockMode::S,
        LockMode::Exclusive => GroupLockMode::X,
        LockMode::IntentionShared => GroupLockMode::IS,
        LockMode::IntentionExclusive => GroupLockMode::IX,
        LockMode::SharedIntentionExclusive => GroupLockMode::SIX,
    }
}

/// The multi-granularity compatibility matrix, requested mode against the
/// queue's group mode.
fn compatible(requested: LockMode, group: GroupLockMode) -> bool {
    match requested {
        LockMode::IntentionShared => group != GroupLockMode::X,
        LockMode::IntentionExclusive => matches!(
            group,
            GroupLockMode::NonLock | GroupLockMode::IS | GroupLockMode::IX
        ),
        LockMode::Shared => matches!(
            group,
            GroupLockMode::NonLock | GroupLockMode::IS | GroupLockMode::S
        ),
        LockMode::SharedIntentionExclusive => {
            matches!(group, GroupLockMode::NonLock | GroupLockMode::IS)
        }
        LockMode::Exclusive => group == GroupLockMode::NonLock,
    }
}

#[derive(Debug, Clone)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

#[derive(Debug, Default)]
struct LockQueue {
    requests: VecDeque<LockRequest>,
}

impl LockQueue {
    fn group_mode(&self) -> GroupLockMode {
        self.requests
            .iter()
            .filter(|r| r.granted)
            .map(|r| group_of(r.mode))
            .max()
            .unwrap_or(GroupLockMode::NonLock)
    }
}

#[derive(Default)]
struct ResourceLock {
    state: Mutex<LockQueue>,
    condvar: Condvar,
}

/// Strict two-phase lock manager with wait-die deadlock prevention: an
/// incompatible requester younger than the queue head aborts itself
/// instead of waiting; older requesters block on the queue's condvar.
pub struct LockManager {
    lock_table: Mutex<HashMap<LockDataId, Arc<ResourceLock>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            lock_table: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock_shared_on_record(
        &self,
        txn: &mut Transaction,
        fd: FileId,
        rid: Rid,
    ) -> MicaResult<()> {
        self.lock_general(txn, LockDataId::Record { fd, rid }, LockMode::Shared)
    }

    pub fn lock_exclusive_on_record(
        &self,
        txn: &mut Transaction,
        fd: FileId,
        rid: Rid,
    ) -> MicaResult<()> {
        self.lock_general(txn, LockDataId::Record { fd, rid }, LockMode::Exclusive)
    }

    pub fn lock_shared_on_table(&self, txn: &mut Transaction, fd: FileId) -> MicaResult<()> {
        self.lock_general(txn, LockDataId::Table { fd }, LockMode::Shared)
    }

    pub fn lock_exclusive_on_table(&self, txn: &mut Transaction, fd: FileId) -> MicaResult<()> {
        self.lock_general(txn, LockDataId::Table { fd }, LockMode::Exclusive)
    }

    pub fn lock_is_on_table(&self, txn: &mut Transaction, fd: FileId) -> MicaResult<()> {
        self.lock_general(txn, LockDataId::Table { fd }, LockMode::IntentionShared)
    }

    pub fn lock_ix_on_table(&self, txn: &mut Transaction, fd: FileId) -> MicaResult<()> {
        self.lock_general(txn, LockDataId::Table { fd }, LockMode::IntentionExclusive)
    }

    pub fn lock_six_on_table(&self, txn: &mut Transaction, fd: FileId) -> MicaResult<()> {
        self.lock_general(
            txn,
            LockDataId::Table { fd },
            LockMode::SharedIntentionExclusive,
        )
    }

    fn resource(&self, id: LockDataId) -> Arc<ResourceLock> {
        let mut table = self.lock_table.lock();
        table.entry(id).or_default().clone()
    }

    fn lock_general(
        &self,
        txn: &mut Transaction,
        id: LockDataId,
        mode: LockMode,
    ) -> MicaResult<()> {
        let resource = self.resource(id);
        let mut queue = resource.state.lock();

        if txn.lock_set().contains(&id) {
            if let Some(pos) = queue.requests.iter().position(|r| r.txn_id == txn.id()) {
                let held = queue.requests[pos].mode;
                if held == mode || held == LockMode::Exclusive {
                    return Ok(());
                }
                // Table-level SIX already covers everything but X.
                if id.is_table()
                    && held == LockMode::SharedIntentionExclusive
                    && mode != LockMode::Exclusive
                {
                    return Ok(());
                }
                if queue.requests.len() == 1 {
                    // Sole holder: upgrade in place.
                    queue.requests[pos].mode = mode;
                    return Ok(());
                }
                // Drop the old request and re-acquire below; wait-die
                // decides whether we may block for the stronger mode.
                queue.requests.remove(pos);
                txn.lock_set_mut().remove(&id);
                resource.condvar.notify_all();
            }
        }

        if txn.state() == TxnState::Shrinking {
            return Err(MicaError::Internal(format!(
                "transaction {} acquired a lock after releasing (strict 2PL)",
                txn.id()
            )));
        }
        txn.set_state(TxnState::Growing);

        loop {
            if compatible(mode, queue.group_mode()) {
                break;
            }
            if let Some(head) = queue.requests.front() {
                if txn.id() > head.txn_id {
                    trace!(
                        "wait-die: txn {} dies behind txn {} on {:?}",
                        txn.id(),
                        head.txn_id,
                        id
                    );
                    return Err(MicaError::TransactionAbort {
                        txn_id: txn.id(),
                        reason: AbortReason::DeadlockPrevention,
                    });
                }
            }
            resource.condvar.wait(&mut queue);
        }

        queue.requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode,
            granted: true,
        });
        txn.lock_set_mut().insert(id);
        trace!("lock granted: txn={} id={:?} mode={:?}", txn.id(), id, mode);
        Ok(())
    }

    /// Remove the transaction's request and wake waiters. First release
    /// flips the transaction into its shrinking phase.
    pub fn unlock(&self, txn: &mut Transaction, id: LockDataId) {
        txn.set_state(TxnState::Shrinking);
        let resource = self.resource(id);
        let mut queue = resource.state.lock();
        queue.requests.retain(|r| r.txn_id != txn.id());
        resource.condvar.notify_all();
    }

    /// Strict 2PL: the whole lock set goes in one pass at commit/abort.
    pub fn release_all(&self, txn: &mut Transaction) {
        let ids: Vec<LockDataId> = txn.take_lock_set().into_iter().collect();
        for id in ids {
            self.unlock(txn, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    fn new_txn(id: TxnId) -> Transaction {
        Transaction::new(id, true)
    }

    #[test]
    fn compatible_modes_all_proceed() {
        let manager = LockManager::new();
        let mut t1 = new_txn(1);
        let mut t2 = new_txn(2);
        let mut t3 = new_txn(3);

        manager.lock_is_on_table(&mut t1, 1).unwrap();
        manager.lock_ix_on_table(&mut t2, 1).unwrap();
        manager.lock_is_on_table(&mut t3, 1).unwrap();

        manager.lock_shared_on_record(&mut t1, 1, Rid::new(1, 0)).unwrap();
        manager.lock_shared_on_record(&mut t3, 1, Rid::new(1, 0)).unwrap();
    }

    #[test]
    fn exclusive_blocks_until_release() {
        let manager = Arc::new(LockManager::new());
        let mut holder = new_txn(1);
        manager.lock_shared_on_table(&mut holder, 5).unwrap();

        let acquired = Arc::new(AtomicBool::new(false));
        let acquired_clone = acquired.clone();
        let manager_clone = manager.clone();
        // The waiter is OLDER than nobody: id 2 > head id 1 would die, so
        // use the blocking direction: head is younger.
        let handle = thread::spawn(move || {
            let mut waiter = new_txn(0);
            manager_clone.lock_exclusive_on_table(&mut waiter, 5).unwrap();
            acquired_clone.store(true, Ordering::SeqCst);
            manager_clone.release_all(&mut waiter);
        });

        thread::sleep(Duration::from_millis(30));
        assert!(!acquired.load(Ordering::SeqCst));

        manager.release_all(&mut holder);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn younger_requester_dies() {
        let manager = LockManager::new();
        let mut older = new_txn(1);
        let mut younger = new_txn(2);

        manager
            .lock_exclusive_on_record(&mut older, 1, Rid::new(1, 0))
            .unwrap();
        let result = manager.lock_exclusive_on_record(&mut younger, 1, Rid::new(1, 0));
        assert!(matches!(
            result,
            Err(MicaError::TransactionAbort {
                txn_id: 2,
                reason: AbortReason::DeadlockPrevention
            })
        ));
    }

    #[test]
    fn sole_holder_upgrades_in_place() {
        let manager = LockManager::new();
        let mut txn = new_txn(1);
        let rid = Rid::new(1, 0);
        manager.lock_shared_on_record(&mut txn, 1, rid).unwrap();
        manager.lock_exclusive_on_record(&mut txn, 1, rid).unwrap();
        assert_eq!(txn.lock_set().len(), 1);

        // A second transaction now conflicts even on a shared request.
        let mut other = new_txn(2);
        assert!(manager.lock_shared_on_record(&mut other, 1, rid).is_err());
    }

    #[test]
    fn no_acquisition_after_shrinking() {
        let manager = LockManager::new();
        let mut txn = new_txn(1);
        manager.lock_shared_on_table(&mut txn, 1).unwrap();
        let id = LockDataId::Table { fd: 1 };
        txn.lock_set_mut().remove(&id);
        manager.unlock(&mut txn, id);
        assert!(matches!(
            manager.lock_shared_on_table(&mut txn, 2),
            Err(MicaError::Internal(_))
        ));
    }

    #[test]
    fn deadlock_cycle_aborts_younger() {
        let manager = Arc::new(LockManager::new());
        let rid_a = Rid::new(1, 0);
        let rid_b = Rid::new(1, 1);

        let mut t1 = new_txn(1);
        manager.lock_exclusive_on_record(&mut t1, 1, rid_a).unwrap();

        let manager_clone = manager.clone();
        let t2_died = Arc::new(AtomicBool::new(false));
        let t2_died_clone = t2_died.clone();
        let handle = thread::spawn(move || {
            let mut t2 = new_txn(2);
            manager_clone
                .lock_exclusive_on_record(&mut t2, 1, rid_b)
                .unwrap();
            // t2 (younger) requests t1's record: dies immediately.
            let result = manager_clone.lock_exclusive_on_record(&mut t2, 1, rid_a);
            if result.is_err() {
                t2_died_clone.store(true, Ordering::SeqCst);
                manager_clone.release_all(&mut t2);
            }
        });
        handle.join().unwrap();
        assert!(t2_died.load(Ordering::SeqCst));

        // t1 can now take rid_b and finish.
        manager.lock_exclusive_on_record(&mut t1, 1, rid_b).unwrap();
        manager.release_all(&mut t1);
    }
}
