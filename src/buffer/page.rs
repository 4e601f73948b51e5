use crate::buffer::lru_replacer::LruReplacer;
use crate::config::PAGE_SIZE;
use crate::recovery::Lsn;
use dashmap::DashMap;
use log::error;
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

pub type FileId = u32;
pub type PageNo = u32;
pub type FrameId = usize;

pub const INVALID_PAGE_NO: PageNo = u32::MAX;

/// Identity of a page: the file it belongs to plus its dense page number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId {
    pub file_id: FileId,
    pub page_no: PageNo,
}

impl PageId {
    pub fn new(file_id: FileId, page_no: PageNo) -> Self {
        Self { file_id, page_no }
    }

    pub fn invalid() -> Self {
        Self {
            file_id: 0,
            page_no: INVALID_PAGE_NO,
        }
    }
}

/// A buffer-pool frame: one page's bytes plus pin/dirty metadata.
#[derive(Debug)]
pub struct Page {
    pub page_id: PageId,
    data: Box<[u8; PAGE_SIZE]>,
    pub pin_count: AtomicU32,
    pub is_dirty: bool,
}

impl Page {
    pub fn empty() -> Self {
        Self {
            page_id: PageId::invalid(),
            data: Box::new([0; PAGE_SIZE]),
            pin_count: AtomicU32::new(0),
            is_dirty: false,
        }
    }

    /// Re-initialise this frame for a new resident page.
    pub fn reset(&mut self, page_id: PageId) {
        self.page_id = page_id;
        self.data.fill(0);
        self.pin_count.store(0, Ordering::SeqCst);
        self.is_dirty = false;
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..]
    }

    /// Mutable access marks the frame dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.is_dirty = true;
        &mut self.data[..]
    }

    pub fn set_data(&mut self, bytes: &[u8]) {
        self.data[..bytes.len()].copy_from_slice(bytes);
    }

    /// Every page stores its recovery high-water mark in the first 8 bytes.
    pub fn lsn(&self) -> Lsn {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.data[0..8]);
        Lsn::from_le_bytes(b)
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.data[0..8].copy_from_slice(&lsn.to_le_bytes());
        self.is_dirty = true;
    }
}

/// A pinned reference to a frame. Dropping the last guard for a page
/// makes its frame evictable again.
pub struct PageGuard {
    pub(crate) page: Arc<RwLock<Page>>,
    pub(crate) frame_id: FrameId,
    pub(crate) page_table: Arc<DashMap<PageId, FrameId>>,
    pub(crate) replacer: Arc<Mutex<LruReplacer>>,
}

impl Deref for PageGuard {
    type Target = Arc<RwLock<Page>>;

    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let page_guard = match self.page.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("page lock poisoned while unpinning");
                poisoned.into_inner()
            }
        };
        if page_guard.pin_count.fetch_sub(1, Ordering::SeqCst) == 1 {
            // Last pin gone; only now may the replacer hand the frame out.
            if self.page_table.contains_key(&page_guard.page_id) {
                self.replacer.lock().unpin(self.frame_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_lsn_round_trip() {
        let mut page = Page::empty();
        assert_eq!(page.lsn(), 0);
        page.set_lsn(42);
        assert_eq!(page.lsn(), 42);
        assert!(page.is_dirty);
    }

    #[test]
    fn guard_drop_unpins() {
        let page = Arc::new(RwLock::new(Page::empty()));
        page.read().unwrap().pin_count.store(1, Ordering::SeqCst);
        let page_table = Arc::new(DashMap::new());
        page_table.insert(PageId::invalid(), 0usize);
        let replacer = Arc::new(Mutex::new(LruReplacer::new(4)));

        let guard = PageGuard {
            page: page.clone(),
            frame_id: 0,
            page_table,
            replacer: replacer.clone(),
        };
        assert_eq!(replacer.lock().size(), 0);
        drop(guard);
        assert_eq!(page.read().unwrap().pin_count.load(Ordering::SeqCst), 0);
        assert_eq!(replacer.lock().size(), 1);
    }
}
