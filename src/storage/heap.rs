use bytes::{Buf, BufMut};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::sync::Arc;

use crate::buffer::{BufferPoolManager, FileId, PageGuard, PageId, PageNo, INVALID_PAGE_NO, PAGE_SIZE};
use crate::error::{MicaError, MicaResult};
use crate::recovery::Lsn;
use crate::storage::{Bitmap, DiskManager, Rid};

pub const HEAP_HDR_PAGE: PageNo = 0;
pub const FIRST_RECORD_PAGE: PageNo = 1;

/// Record page layout: [page_lsn u64 | num_records u32 | next_free u32 |
/// bitmap | slots].
const RECORD_PAGE_HDR_SIZE: usize = 16;
const NUM_RECORDS_OFFSET: usize = 8;
const NEXT_FREE_OFFSET: usize = 12;

/// Persisted on page 0 (after that page's LSN field).
#[derive(Debug, Clone, PartialEq)]
pub struct HeapFileHeader {
    pub record_size: u32,
    pub num_records_per_page: u32,
    pub bitmap_size: u32,
    pub num_pages: u32,
    pub first_free_page_no: PageNo,
}

impl HeapFileHeader {
    fn new(record_size: u32) -> Self {
        let per_page = records_per_page(record_size);
        Self {
            record_size,
            num_records_per_page: per_page,
            bitmap_size: per_page.div_ceil(8),
            num_pages: 1,
            first_free_page_no: INVALID_PAGE_NO,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(20);
        buf.put_u32_le(self.record_size);
        buf.put_u32_le(self.num_records_per_page);
        buf.put_u32_le(self.bitmap_size);
        buf.put_u32_le(self.num_pages);
        buf.put_u32_le(self.first_free_page_no);
        buf
    }

    fn decode(mut bytes: &[u8]) -> Self {
        Self {
            record_size: bytes.get_u32_le(),
            num_records_per_page: bytes.get_u32_le(),
            bitmap_size: bytes.get_u32_le(),
            num_pages: bytes.get_u32_le(),
            first_free_page_no: bytes.get_u32_le(),
        }
    }
}

/// Largest record count such that header + bitmap + slots fit one page.
fn records_per_page(record_size: u32) -> u32 {
    let usable = (PAGE_SIZE - RECORD_PAGE_HDR_SIZE) as u32;
    let mut n = usable * 8 / (1 + 8 * record_size);
    while n > 0 && n.div_ceil(8) + n * record_size > usable {
        n -= 1;
    }
    n
}

fn page_num_records(data: &[u8]) -> u32 {
    u32::from_le_bytes(data[NUM_RECORDS_OFFSET..NUM_RECORDS_OFFSET + 4].try_into().expect("slice"))
}

fn set_page_num_records(data: &mut [u8], n: u32) {
    data[NUM_RECORDS_OFFSET..NUM_RECORDS_OFFSET + 4].copy_from_slice(&n.to_le_bytes());
}

fn page_next_free(data: &[u8]) -> PageNo {
    u32::from_le_bytes(data[NEXT_FREE_OFFSET..NEXT_FREE_OFFSET + 4].try_into().expect("slice"))
}

fn set_page_next_free(data: &mut [u8], page_no: PageNo) {
    data[NEXT_FREE_OFFSET..NEXT_FREE_OFFSET + 4].copy_from_slice(&page_no.to_le_bytes());
}

/// One table's record storage: slotted pages with occupancy bitmaps and a
/// singly linked list of pages that still have room. Every operation pins
/// its page for the duration and marks it dirty on writes.
pub struct HeapFile {
    fd: FileId,
    buffer: Arc<BufferPoolManager>,
    hdr: RwLock<HeapFileHeader>,
}

impl HeapFile {
    /// Create the on-disk file with its durable header page.
    pub fn create(disk: &DiskManager, name: &str, record_size: u32) -> MicaResult<()> {
        if record_size == 0 || record_size as usize > PAGE_SIZE - RECORD_PAGE_HDR_SIZE - 1 {
            return Err(MicaError::Internal(format!(
                "record size {record_size} does not fit a page"
            )));
        }
        disk.create_file(name)?;
        let fd = disk.open_file(name)?;
        let hdr = HeapFileHeader::new(record_size);
        let mut page = vec![0u8; PAGE_SIZE];
        page[8..8 + 20].copy_from_slice(&hdr.encode());
        disk.write_page(fd, HEAP_HDR_PAGE, &page)?;
        disk.close_file(fd)
    }

    pub fn open(
        disk: &DiskManager,
        buffer: Arc<BufferPoolManager>,
        name: &str,
    ) -> MicaResult<HeapFile> {
        let fd = disk.open_file(name)?;
        let mut page = vec![0u8; PAGE_SIZE];
        disk.read_page(fd, HEAP_HDR_PAGE, &mut page)?;
        let mut hdr = HeapFileHeader::decode(&page[8..]);
        // Pages may have reached disk after the last header write-back;
        // trust the longer of the two so no record page goes dark.
        let disk_pages = disk.num_disk_pages(fd)?;
        if disk_pages > hdr.num_pages {
            hdr.num_pages = disk_pages;
        }
        disk.set_next_page_no(fd, hdr.num_pages)?;
        Ok(HeapFile {
            fd,
            buffer,
            hdr: RwLock::new(hdr),
        })
    }

    pub fn fd(&self) -> FileId {
        self.fd
    }

    pub fn record_size(&self) -> u32 {
        self.hdr.read().record_size
    }

    pub fn num_pages(&self) -> u32 {
        self.hdr.read().num_pages
    }

    pub fn num_records_per_page(&self) -> u32 {
        self.hdr.read().num_records_per_page
    }

    fn fetch(&self, page_no: PageNo) -> MicaResult<PageGuard> {
        self.buffer.fetch_page(PageId::new(self.fd, page_no))
    }

    fn check_page(&self, hdr: &HeapFileHeader, page_no: PageNo) -> MicaResult<()> {
        if page_no == HEAP_HDR_PAGE || page_no >= hdr.num_pages {
            return Err(MicaError::PageNotExist(page_no));
        }
        Ok(())
    }

    /// Push the in-memory header through the buffer pool onto page 0.
    fn flush_header(&self, hdr: &HeapFileHeader) -> MicaResult<()> {
        let guard = self.fetch(HEAP_HDR_PAGE)?;
        let mut page = guard
            .write()
            .map_err(|_| MicaError::Internal("page lock poisoned".to_string()))?;
        page.data_mut()[8..8 + 20].copy_from_slice(&hdr.encode());
        Ok(())
    }

    /// Allocate and initialise a fresh record page, linking it at the
    /// head of the free list.
    fn create_page(&self, hdr: &mut RwLockWriteGuard<'_, HeapFileHeader>) -> MicaResult<PageNo> {
        let guard = self.buffer.new_page(self.fd)?;
        let page_no = {
            let mut page = guard
                .write()
                .map_err(|_| MicaError::Internal("page lock poisoned".to_string()))?;
            let page_no = page.page_id.page_no;
            let data = page.data_mut();
            set_page_num_records(data, 0);
            set_page_next_free(data, hdr.first_free_page_no);
            page_no
        };
        hdr.num_pages = page_no + 1;
        hdr.first_free_page_no = page_no;
        drop(guard);
        self.flush_header(hdr)?;
        Ok(page_no)
    }

    pub fn get_record(&self, rid: Rid) -> MicaResult<Vec<u8>> {
        let hdr = self.hdr.read();
        self.check_page(&hdr, rid.page_no)?;
        let guard = self.fetch(rid.page_no)?;
        let page = guard
            .read()
            .map_err(|_| MicaError::Internal("page lock poisoned".to_string()))?;
        let data = page.data();
        let bitmap = &data[RECORD_PAGE_HDR_SIZE..RECORD_PAGE_HDR_SIZE + hdr.bitmap_size as usize];
        if !Bitmap::is_set(bitmap, rid.slot_no) {
            return Err(MicaError::RecordNotFound {
                page_no: rid.page_no,
                slot_no: rid.slot_no,
            });
        }
        let start = RECORD_PAGE_HDR_SIZE
            + hdr.bitmap_size as usize
            + (rid.slot_no * hdr.record_size) as usize;
        Ok(data[start..start + hdr.record_size as usize].to_vec())
    }

    /// Place a record in the first free slot, growing the file if every
    /// page is full.
    pub fn insert_record(&self, record: &[u8]) -> MicaResult<Rid> {
        let mut hdr = self.hdr.write();
        debug_assert_eq!(record.len(), hdr.record_size as usize);
        let page_no = if hdr.first_free_page_no == INVALID_PAGE_NO {
            self.create_page(&mut hdr)?
        } else {
            hdr.first_free_page_no
        };

        let guard = self.fetch(page_no)?;
        let mut page = guard
            .write()
            .map_err(|_| MicaError::Internal("page lock poisoned".to_string()))?;
        let bitmap_size = hdr.bitmap_size as usize;
        let record_size = hdr.record_size as usize;
        let per_page = hdr.num_records_per_page;
        let data = page.data_mut();
        let bitmap = &data[RECORD_PAGE_HDR_SIZE..RECORD_PAGE_HDR_SIZE + bitmap_size];
        let slot_no = Bitmap::first_clear(bitmap, per_page).ok_or_else(|| {
            MicaError::Internal(format!("free-list page {page_no} has no free slot"))
        })?;

        let start = RECORD_PAGE_HDR_SIZE + bitmap_size + slot_no as usize * record_size;
        data[start..start + record_size].copy_from_slice(record);
        Bitmap::set(
            &mut data[RECORD_PAGE_HDR_SIZE..RECORD_PAGE_HDR_SIZE + bitmap_size],
            slot_no,
        );
        let filled = page_num_records(data) + 1;
        set_page_num_records(data, filled);
        let now_full = filled == per_page;
        let next_free = page_next_free(data);
        drop(page);
        drop(guard);

        if now_full {
            hdr.first_free_page_no = next_free;
            self.flush_header(&hdr)?;
        }
        Ok(Rid::new(page_no, slot_no))
    }

    /// Idempotent positional insert used by redo and by rollback of a
    /// delete. Grows the file when the rid addresses the next new page.
    pub fn insert_record_at(&self, rid: Rid, record: &[u8]) -> MicaResult<()> {
        let mut hdr = self.hdr.write();
        while rid.page_no >= hdr.num_pages {
            self.create_page(&mut hdr)?;
        }
        let guard = self.fetch(rid.page_no)?;
        let mut page = guard
            .write()
            .map_err(|_| MicaError::Internal("page lock poisoned".to_string()))?;
        let bitmap_size = hdr.bitmap_size as usize;
        let record_size = hdr.record_size as usize;
        let per_page = hdr.num_records_per_page;
        let data = page.data_mut();
        if !Bitmap::is_set(
            &data[RECORD_PAGE_HDR_SIZE..RECORD_PAGE_HDR_SIZE + bitmap_size],
            rid.slot_no,
        ) {
            Bitmap::set(
                &mut data[RECORD_PAGE_HDR_SIZE..RECORD_PAGE_HDR_SIZE + bitmap_size],
                rid.slot_no,
            );
            set_page_num_records(data, page_num_records(data) + 1);
        }
        let start = RECORD_PAGE_HDR_SIZE + bitmap_size + rid.slot_no as usize * record_size;
        data[start..start + record_size].copy_from_slice(record);
        let now_full = page_num_records(data) == per_page;
        let next_free = page_next_free(data);
        drop(page);
        drop(guard);

        if now_full && hdr.first_free_page_no == rid.page_no {
            hdr.first_free_page_no = next_free;
            self.flush_header(&hdr)?;
        }
        Ok(())
    }

    pub fn delete_record(&self, rid: Rid) -> MicaResult<()> {
        let mut hdr = self.hdr.write();
        self.check_page(&hdr, rid.page_no)?;
        let guard = self.fetch(rid.page_no)?;
        let mut page = guard
            .write()
            .map_err(|_| MicaError::Internal("page lock poisoned".to_string()))?;
        let bitmap_size = hdr.bitmap_size as usize;
        let per_page = hdr.num_records_per_page;
        let data = page.data_mut();
        if !Bitmap::is_set(
            &data[RECORD_PAGE_HDR_SIZE..RECORD_PAGE_HDR_SIZE + bitmap_size],
            rid.slot_no,
        ) {
            return Err(MicaError::RecordNotFound {
                page_no: rid.page_no,
                slot_no: rid.slot_no,
            });
        }
        Bitmap::reset(
            &mut data[RECORD_PAGE_HDR_SIZE..RECORD_PAGE_HDR_SIZE + bitmap_size],
            rid.slot_no,
        );
        let was_full = page_num_records(data) == per_page;
        set_page_num_records(data, page_num_records(data) - 1);
        if was_full {
            // Full -> not-full transition re-links the page at the head.
            set_page_next_free(data, hdr.first_free_page_no);
        }
        drop(page);
        drop(guard);

        if was_full {
            hdr.first_free_page_no = rid.page_no;
            self.flush_header(&hdr)?;
        }
        Ok(())
    }

    /// Overwrite in place; records are fixed-width so slots never move.
    pub fn update_record(&self, rid: Rid, record: &[u8]) -> MicaResult<()> {
        let hdr = self.hdr.read();
        self.check_page(&hdr, rid.page_no)?;
        let guard = self.fetch(rid.page_no)?;
        let mut page = guard
            .write()
            .map_err(|_| MicaError::Internal("page lock poisoned".to_string()))?;
        let bitmap_size = hdr.bitmap_size as usize;
        let record_size = hdr.record_size as usize;
        let data = page.data_mut();
        if !Bitmap::is_set(
            &data[RECORD_PAGE_HDR_SIZE..RECORD_PAGE_HDR_SIZE + bitmap_size],
            rid.slot_no,
        ) {
            return Err(MicaError::RecordNotFound {
                page_no: rid.page_no,
                slot_no: rid.slot_no,
            });
        }
        let start = RECORD_PAGE_HDR_SIZE + bitmap_size + rid.slot_no as usize * record_size;
        data[start..start + record_size].copy_from_slice(record);
        Ok(())
    }

    pub fn page_lsn(&self, page_no: PageNo) -> MicaResult<Lsn> {
        let guard = self.fetch(page_no)?;
        let page = guard
            .read()
            .map_err(|_| MicaError::Internal("page lock poisoned".to_string()))?;
        Ok(page.lsn())
    }

    pub fn set_page_lsn(&self, page_no: PageNo, lsn: Lsn) -> MicaResult<()> {
        let guard = self.fetch(page_no)?;
        let mut page = guard
            .write()
            .map_err(|_| MicaError::Internal("page lock poisoned".to_string()))?;
        page.set_lsn(lsn);
        Ok(())
    }

    /// Recompute the free list from page occupancy. Run after recovery,
    /// when on-disk links may predate the crash.
    pub fn rebuild_free_list(&self) -> MicaResult<()> {
        let mut hdr = self.hdr.write();
        let mut head = INVALID_PAGE_NO;
        for page_no in (FIRST_RECORD_PAGE..hdr.num_pages).rev() {
            let guard = self.fetch(page_no)?;
            let mut page = guard
                .write()
                .map_err(|_| MicaError::Internal("page lock poisoned".to_string()))?;
            let data = page.data_mut();
            if page_num_records(data) < hdr.num_records_per_page {
                set_page_next_free(data, head);
                head = page_no;
            }
        }
        hdr.first_free_page_no = head;
        self.flush_header(&hdr)
    }

    pub fn scan(self: &Arc<Self>) -> HeapScan {
        HeapScan {
            heap: self.clone(),
            page_no: FIRST_RECORD_PAGE,
            next_slot: 0,
        }
    }

    #[cfg(test)]
    fn free_list_pages(&self) -> Vec<PageNo> {
        let hdr = self.hdr.read();
        let mut pages = Vec::new();
        let mut page_no = hdr.first_free_page_no;
        while page_no != INVALID_PAGE_NO {
            pages.push(page_no);
            let guard = self.fetch(page_no).unwrap();
            let page = guard.read().unwrap();
            page_no = page_next_free(page.data());
        }
        pages
    }

    #[cfg(test)]
    fn page_record_count(&self, page_no: PageNo) -> (u32, u32) {
        let hdr = self.hdr.read();
        let guard = self.fetch(page_no).unwrap();
        let page = guard.read().unwrap();
        let data = page.data();
        let bitmap = &data[RECORD_PAGE_HDR_SIZE..RECORD_PAGE_HDR_SIZE + hdr.bitmap_size as usize];
        (
            page_num_records(data),
            Bitmap::count_ones(bitmap, hdr.num_records_per_page),
        )
    }
}

/// Walks the bitmap of each record page in order, yielding live records.
pub struct HeapScan {
    heap: Arc<HeapFile>,
    page_no: PageNo,
    next_slot: u32,
}

impl HeapScan {
    pub fn next(&mut self) -> MicaResult<Option<(Rid, Vec<u8>)>> {
        loop {
            let (num_pages, per_page, bitmap_size) = {
                let hdr = self.heap.hdr.read();
                (
                    hdr.num_pages,
                    hdr.num_records_per_page,
                    hdr.bitmap_size as usize,
                )
            };
            if self.page_no >= num_pages {
                return Ok(None);
            }
            let slot = {
                let guard = self.heap.fetch(self.page_no)?;
                let page = guard
                    .read()
                    .map_err(|_| MicaError::Internal("page lock poisoned".to_string()))?;
                let data = page.data();
                let bitmap = &data[RECORD_PAGE_HDR_SIZE..RECORD_PAGE_HDR_SIZE + bitmap_size];
                Bitmap::next_set(bitmap, per_page, self.next_slot)
            };
            match slot {
                Some(slot_no) => {
                    let rid = Rid::new(self.page_no, slot_no);
                    self.next_slot = slot_no + 1;
                    let record = self.heap.get_record(rid)?;
                    return Ok(Some((rid, record)));
                }
                None => {
                    self.page_no += 1;
                    self.next_slot = 0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup(record_size: u32) -> (TempDir, Arc<HeapFile>) {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(DiskManager::new(dir.path()).unwrap());
        HeapFile::create(&disk, "t.tbl", record_size).unwrap();
        let buffer = Arc::new(BufferPoolManager::new(64, disk.clone()));
        let heap = Arc::new(HeapFile::open(&disk, buffer, "t.tbl").unwrap());
        (dir, heap)
    }

    fn record(seed: u8, size: u32) -> Vec<u8> {
        vec![seed; size as usize]
    }

    #[test]
    fn insert_then_get_round_trips() {
        let (_dir, heap) = setup(16);
        let r1 = record(1, 16);
        let r2 = record(2, 16);
        let rid1 = heap.insert_record(&r1).unwrap();
        let rid2 = heap.insert_record(&r2).unwrap();
        assert_ne!(rid1, rid2);
        assert_eq!(heap.get_record(rid1).unwrap(), r1);
        assert_eq!(heap.get_record(rid2).unwrap(), r2);
    }

    #[test]
    fn delete_makes_record_unreachable() {
        let (_dir, heap) = setup(16);
        let rid = heap.insert_record(&record(3, 16)).unwrap();
        heap.delete_record(rid).unwrap();
        assert!(matches!(
            heap.get_record(rid),
            Err(MicaError::RecordNotFound { .. })
        ));
        assert!(matches!(
            heap.delete_record(rid),
            Err(MicaError::RecordNotFound { .. })
        ));
    }

    #[test]
    fn update_overwrites_in_place() {
        let (_dir, heap) = setup(16);
        let rid = heap.insert_record(&record(4, 16)).unwrap();
        heap.update_record(rid, &record(5, 16)).unwrap();
        assert_eq!(heap.get_record(rid).unwrap(), record(5, 16));
    }

    #[test]
    fn num_records_matches_bitmap_popcount() {
        let (_dir, heap) = setup(500);
        let mut rids = Vec::new();
        for i in 0..20u8 {
            rids.push(heap.insert_record(&record(i, 500)).unwrap());
        }
        for rid in rids.iter().step_by(3) {
            heap.delete_record(*rid).unwrap();
        }
        for page_no in FIRST_RECORD_PAGE..heap.num_pages() {
            let (count, popcount) = heap.page_record_count(page_no);
            assert_eq!(count, popcount);
        }
    }

    #[test]
    fn free_list_tracks_partial_pages() {
        // Big records so pages fill up quickly.
        let (_dir, heap) = setup(1000);
        let per_page = heap.num_records_per_page();
        assert!(per_page >= 2);

        // Fill exactly one page.
        let mut rids = Vec::new();
        for i in 0..per_page {
            rids.push(heap.insert_record(&record(i as u8, 1000)).unwrap());
        }
        assert!(rids.iter().all(|r| r.page_no == FIRST_RECORD_PAGE));
        assert!(heap.free_list_pages().is_empty());

        // Deleting from the full page re-links it.
        heap.delete_record(rids[0]).unwrap();
        assert_eq!(heap.free_list_pages(), vec![FIRST_RECORD_PAGE]);

        // The freed slot is reused before any new page is created.
        let rid = heap.insert_record(&record(9, 1000)).unwrap();
        assert_eq!(rid, rids[0]);
    }

    #[test]
    fn scan_visits_live_records_in_order() {
        let (_dir, heap) = setup(64);
        let mut expected = Vec::new();
        for i in 0..10u8 {
            let rid = heap.insert_record(&record(i, 64)).unwrap();
            expected.push((rid, record(i, 64)));
        }
        heap.delete_record(expected[4].0).unwrap();
        expected.remove(4);

        let mut scan = heap.scan();
        let mut seen = Vec::new();
        while let Some(entry) = scan.next().unwrap() {
            seen.push(entry);
        }
        assert_eq!(seen, expected);
    }

    #[test]
    fn positional_insert_grows_file() {
        let (_dir, heap) = setup(64);
        let rid = Rid::new(FIRST_RECORD_PAGE, 3);
        heap.insert_record_at(rid, &record(7, 64)).unwrap();
        assert_eq!(heap.get_record(rid).unwrap(), record(7, 64));
        // Idempotent re-apply.
        heap.insert_record_at(rid, &record(7, 64)).unwrap();
        assert_eq!(heap.get_record(rid).unwrap(), record(7, 64));
        let (count, popcount) = heap.page_record_count(FIRST_RECORD_PAGE);
        assert_eq!((count, popcount), (1, 1));
    }
}
