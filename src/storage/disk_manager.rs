use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::buffer::{FileId, PageNo};
use crate::config::{LOG_FILE_NAME, PAGE_SIZE};
use crate::error::{MicaError, MicaResult};

struct FileState {
    file: File,
    path: PathBuf,
    next_page_no: AtomicU32,
}

/// Raw paged file I/O plus the append-only log, all rooted in one
/// database directory. Open files are addressed through dense `FileId`
/// handles; page allocation is a per-file monotonic counter. No caching
/// happens here.
pub struct DiskManager {
    db_dir: PathBuf,
    files: RwLock<HashMap<FileId, Arc<FileState>>>,
    open_paths: RwLock<HashMap<PathBuf, FileId>>,
    next_file_id: AtomicU32,
    log_file: File,
    log_tail: AtomicU64,
}

impl DiskManager {
    /// Open (creating if needed) a database directory and its log file.
    pub fn new(db_dir: impl AsRef<Path>) -> MicaResult<Self> {
        let db_dir = db_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&db_dir)?;
        let log_path = db_dir.join(LOG_FILE_NAME);
        let log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&log_path)?;
        let log_tail = log_file.metadata()?.len();
        Ok(Self {
            db_dir,
            files: RwLock::new(HashMap::new()),
            open_paths: RwLock::new(HashMap::new()),
            next_file_id: AtomicU32::new(1),
            log_file,
            log_tail: AtomicU64::new(log_tail),
        })
    }

    pub fn db_dir(&self) -> &Path {
        &self.db_dir
    }

    pub fn file_path(&self, name: &str) -> PathBuf {
        self.db_dir.join(name)
    }

    pub fn create_file(&self, name: &str) -> MicaResult<()> {
        let path = self.file_path(name);
        if path.exists() {
            return Err(MicaError::FileExists(name.to_string()));
        }
        File::create(&path)?;
        Ok(())
    }

    pub fn open_file(&self, name: &str) -> MicaResult<FileId> {
        let path = self.file_path(name);
        if self.open_paths.read().contains_key(&path) {
            return Err(MicaError::FileNotClosed(name.to_string()));
        }
        if !path.exists() {
            return Err(MicaError::FileNotFound(name.to_string()));
        }
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let num_pages = (file.metadata()?.len() as usize / PAGE_SIZE) as u32;
        let file_id = self.next_file_id.fetch_add(1, Ordering::SeqCst);
        let state = Arc::new(FileState {
            file,
            path: path.clone(),
            next_page_no: AtomicU32::new(num_pages),
        });
        self.files.write().insert(file_id, state);
        self.open_paths.write().insert(path, file_id);
        debug!("opened file '{name}' as fd {file_id} ({num_pages} pages)");
        Ok(file_id)
    }

    pub fn close_file(&self, file_id: FileId) -> MicaResult<()> {
        let Some(state) = self.files.write().remove(&file_id) else {
            return Err(MicaError::FileNotOpen);
        };
        self.open_paths.write().remove(&state.path);
        Ok(())
    }

    /// Remove a file from disk. Refuses while the file is open.
    pub fn destroy_file(&self, name: &str) -> MicaResult<()> {
        let path = self.file_path(name);
        if self.open_paths.read().contains_key(&path) {
            return Err(MicaError::FileNotClosed(name.to_string()));
        }
        if !path.exists() {
            return Err(MicaError::FileNotFound(name.to_string()));
        }
        std::fs::remove_file(path)?;
        Ok(())
    }

    fn state(&self, file_id: FileId) -> MicaResult<Arc<FileState>> {
        self.files
            .read()
            .get(&file_id)
            .cloned()
            .ok_or(MicaError::FileNotOpen)
    }

    /// Read one page; reads past the end of file yield zeroes (the page
    /// has been allocated but never written back).
    pub fn read_page(&self, file_id: FileId, page_no: PageNo, buf: &mut [u8]) -> MicaResult<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let state = self.state(file_id)?;
        let offset = page_no as u64 * PAGE_SIZE as u64;
        let n = state.file.read_at(buf, offset)?;
        buf[n..].fill(0);
        Ok(())
    }

    pub fn write_page(&self, file_id: FileId, page_no: PageNo, data: &[u8]) -> MicaResult<()> {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        let state = self.state(file_id)?;
        let offset = page_no as u64 * PAGE_SIZE as u64;
        state.file.write_all_at(data, offset)?;
        Ok(())
    }

    /// Hand out the next page number of a file.
    pub fn allocate_page(&self, file_id: FileId) -> MicaResult<PageNo> {
        let state = self.state(file_id)?;
        Ok(state.next_page_no.fetch_add(1, Ordering::SeqCst))
    }

    /// Reset the allocation cursor; callers that persist their own page
    /// count (heap/index headers) reconcile it here at open.
    pub fn set_next_page_no(&self, file_id: FileId, page_no: PageNo) -> MicaResult<()> {
        let state = self.state(file_id)?;
        state.next_page_no.store(page_no, Ordering::SeqCst);
        Ok(())
    }

    /// Number of whole pages currently materialised on disk.
    pub fn num_disk_pages(&self, file_id: FileId) -> MicaResult<u32> {
        let state = self.state(file_id)?;
        Ok((state.file.metadata()?.len() as usize / PAGE_SIZE) as u32)
    }

    /// Append to the log and make it durable.
    pub fn write_log(&self, data: &[u8]) -> MicaResult<()> {
        let offset = self.log_tail.fetch_add(data.len() as u64, Ordering::SeqCst);
        self.log_file.write_all_at(data, offset)?;
        self.log_file.sync_data()?;
        Ok(())
    }

    /// Read log bytes at an absolute offset; returns how many were read.
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> MicaResult<usize> {
        let n = self.log_file.read_at(buf, offset)?;
        Ok(n)
    }

    pub fn log_len(&self) -> u64 {
        self.log_tail.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_lifecycle_errors() {
        let dir = TempDir::new().unwrap();
        let disk = DiskManager::new(dir.path()).unwrap();

        disk.create_file("a.tbl").unwrap();
        assert!(matches!(
            disk.create_file("a.tbl"),
            Err(MicaError::FileExists(_))
        ));
        assert!(matches!(
            disk.open_file("missing.tbl"),
            Err(MicaError::FileNotFound(_))
        ));

        let fd = disk.open_file("a.tbl").unwrap();
        assert!(matches!(
            disk.open_file("a.tbl"),
            Err(MicaError::FileNotClosed(_))
        ));
        assert!(matches!(
            disk.destroy_file("a.tbl"),
            Err(MicaError::FileNotClosed(_))
        ));

        disk.close_file(fd).unwrap();
        assert!(matches!(disk.close_file(fd), Err(MicaError::FileNotOpen)));
        disk.destroy_file("a.tbl").unwrap();
        assert!(!dir.path().join("a.tbl").exists());
    }

    #[test]
    fn page_io_round_trip() {
        let dir = TempDir::new().unwrap();
        let disk = DiskManager::new(dir.path()).unwrap();
        disk.create_file("t.tbl").unwrap();
        let fd = disk.open_file("t.tbl").unwrap();

        assert_eq!(disk.allocate_page(fd).unwrap(), 0);
        assert_eq!(disk.allocate_page(fd).unwrap(), 1);

        let mut page = vec![0u8; PAGE_SIZE];
        page[0] = 0xde;
        page[PAGE_SIZE - 1] = 0xad;
        disk.write_page(fd, 1, &page).unwrap();

        let mut out = vec![0u8; PAGE_SIZE];
        disk.read_page(fd, 1, &mut out).unwrap();
        assert_eq!(out, page);

        // Unwritten pages read back zeroed.
        disk.read_page(fd, 5, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn log_append_and_read() {
        let dir = TempDir::new().unwrap();
        let disk = DiskManager::new(dir.path()).unwrap();
        disk.write_log(b"hello").unwrap();
        disk.write_log(b"world").unwrap();
        assert_eq!(disk.log_len(), 10);

        let mut buf = [0u8; 5];
        assert_eq!(disk.read_log(&mut buf, 5).unwrap(), 5);
        assert_eq!(&buf, b"world");
    }
}
