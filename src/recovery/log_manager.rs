use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::LOG_BUFFER_SIZE;
use crate::error::MicaResult;
use crate::recovery::log_record::{LogRecord, LogRecordBody};
use crate::recovery::{Lsn, FIRST_LSN, INVALID_LSN};
use crate::storage::DiskManager;
use crate::transaction::TxnId;

#[derive(Debug, Default)]
struct LogBuffer {
    bytes: Vec<u8>,
    last_lsn: Lsn,
}

/// Appends serialised log records to an in-memory buffer, assigning LSNs
/// monotonically at insertion. The buffer reaches disk when a record no
/// longer fits, on commit, and whenever the buffer pool needs the log
/// flushed up to a page's LSN before write-back.
pub struct LogManager {
    disk: Arc<DiskManager>,
    buffer: Mutex<LogBuffer>,
    next_lsn: AtomicU64,
    persist_lsn: AtomicU64,
}

impl LogManager {
    pub fn new(disk: Arc<DiskManager>) -> Self {
        Self {
            disk,
            buffer: Mutex::new(LogBuffer::default()),
            next_lsn: AtomicU64::new(FIRST_LSN),
            persist_lsn: AtomicU64::new(INVALID_LSN),
        }
    }

    /// Serialise a record into the buffer and hand back its LSN.
    pub fn append(&self, txn_id: TxnId, prev_lsn: Lsn, body: LogRecordBody) -> MicaResult<Lsn> {
        let mut buffer = self.buffer.lock();
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        let record = LogRecord {
            lsn,
            txn_id,
            prev_lsn,
            body,
        };
        let bytes = record.encode();
        if !buffer.bytes.is_empty() && buffer.bytes.len() + bytes.len() > LOG_BUFFER_SIZE {
            self.flush_locked(&mut buffer)?;
        }
        buffer.bytes.extend_from_slice(&bytes);
        buffer.last_lsn = lsn;
        Ok(lsn)
    }

    /// Force everything buffered so far onto disk.
    pub fn flush(&self) -> MicaResult<()> {
        let mut buffer = self.buffer.lock();
        self.flush_locked(&mut buffer)
    }

    /// WAL discipline: nothing above `lsn` needs to be durable yet, but
    /// everything at or below it must be before a page with that LSN is
    /// written back.
    pub fn flush_to(&self, lsn: Lsn) -> MicaResult<()> {
        if lsn == INVALID_LSN || lsn <= self.persist_lsn.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.flush()
    }

    pub fn persist_lsn(&self) -> Lsn {
        self.persist_lsn.load(Ordering::SeqCst)
    }

    /// Continue LSN assignment after recovery replayed the existing log.
    pub fn resume_after(&self, max_lsn: Lsn) {
        self.next_lsn.store(max_lsn + 1, Ordering::SeqCst);
        self.persist_lsn.store(max_lsn, Ordering::SeqCst);
    }

    fn flush_locked(&self, buffer: &mut LogBuffer) -> MicaResult<()> {
        if buffer.bytes.is_empty() {
            return Ok(());
        }
        self.disk.write_log(&buffer.bytes)?;
        buffer.bytes.clear();
        self.persist_lsn.store(buffer.last_lsn, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::log_record::LogRecord;
    use tempfile::TempDir;

    #[test]
    fn lsns_are_monotonic_and_flush_advances_persist_lsn() {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(DiskManager::new(dir.path()).unwrap());
        let log = LogManager::new(disk.clone());

        let l1 = log.append(1, INVALID_LSN, LogRecordBody::Begin).unwrap();
        let l2 = log.append(1, l1, LogRecordBody::Commit).unwrap();
        assert!(l2 > l1);
        assert_eq!(log.persist_lsn(), INVALID_LSN);

        log.flush().unwrap();
        assert_eq!(log.persist_lsn(), l2);

        // The records are readable back from the log file.
        let mut buf = vec![0u8; 4096];
        let n = disk.read_log(&mut buf, 0).unwrap();
        let (first, consumed) = LogRecord::decode(&buf[..n]).unwrap();
        assert_eq!(first.lsn, l1);
        let (second, _) = LogRecord::decode(&buf[consumed..n]).unwrap();
        assert_eq!(second.lsn, l2);
        assert_eq!(second.prev_lsn, l1);
    }

    #[test]
    fn flush_to_skips_when_already_durable() {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(DiskManager::new(dir.path()).unwrap());
        let log = LogManager::new(disk);
        let l1 = log.append(1, INVALID_LSN, LogRecordBody::Begin).unwrap();
        log.flush().unwrap();
        let before = log.persist_lsn();
        log.flush_to(l1).unwrap();
        assert_eq!(log.persist_lsn(), before);
    }
}
