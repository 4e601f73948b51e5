use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use crate::buffer::{BufferPoolManager, FileId, PageId, PageNo, INVALID_PAGE_NO, PAGE_SIZE};
use crate::catalog::data_type::ColType;
use crate::error::{MicaError, MicaResult};
use crate::index::node::{IxFileHeader, IxNode, CHILD_SLOT};
use crate::index::{Iid, IX_FILE_HDR_PAGE, IX_INIT_ROOT_PAGE, IX_LEAF_HEADER_PAGE};
use crate::storage::{DiskManager, Rid};

/// An ordered, unique, multi-column index stored as a B+-tree over
/// buffer-pool pages. Leaves form a doubly linked list terminated by a
/// sentinel page; one root latch serialises lookups and structural
/// modifications.
pub struct BPlusTree {
    fd: FileId,
    buffer: Arc<BufferPoolManager>,
    key_len: u32,
    hdr: RwLock<IxFileHeader>,
    root_latch: Mutex<()>,
}

impl BPlusTree {
    /// Create the index file: durable header, leaf-list sentinel, and an
    /// empty root leaf.
    pub fn create(
        disk: &DiskManager,
        name: &str,
        col_types: Vec<ColType>,
        col_lens: Vec<u32>,
    ) -> MicaResult<()> {
        disk.create_file(name)?;
        let fd = disk.open_file(name)?;
        let hdr = IxFileHeader::new(col_types, col_lens);

        let mut page = vec![0u8; PAGE_SIZE];
        let encoded = hdr.encode();
        page[8..8 + encoded.len()].copy_from_slice(&encoded);
        disk.write_page(fd, IX_FILE_HDR_PAGE, &page)?;

        let mut sentinel = IxNode::new_leaf(hdr.col_tot_len);
        sentinel.prev_leaf = IX_INIT_ROOT_PAGE;
        sentinel.next_leaf = IX_INIT_ROOT_PAGE;
        let mut page = vec![0u8; PAGE_SIZE];
        sentinel.encode_into(&mut page);
        disk.write_page(fd, IX_LEAF_HEADER_PAGE, &page)?;

        let mut root = IxNode::new_leaf(hdr.col_tot_len);
        root.prev_leaf = IX_LEAF_HEADER_PAGE;
        root.next_leaf = IX_LEAF_HEADER_PAGE;
        let mut page = vec![0u8; PAGE_SIZE];
        root.encode_into(&mut page);
        disk.write_page(fd, IX_INIT_ROOT_PAGE, &page)?;

        disk.close_file(fd)
    }

    pub fn open(
        disk: &DiskManager,
        buffer: Arc<BufferPoolManager>,
        name: &str,
    ) -> MicaResult<BPlusTree> {
        let fd = disk.open_file(name)?;
        let mut page = vec![0u8; PAGE_SIZE];
        disk.read_page(fd, IX_FILE_HDR_PAGE, &mut page)?;
        let mut hdr = IxFileHeader::decode(&page[8..])?;
        let disk_pages = disk.num_disk_pages(fd)?;
        if disk_pages > hdr.num_pages {
            hdr.num_pages = disk_pages;
        }
        disk.set_next_page_no(fd, disk_pages.max(hdr.num_pages))?;
        Ok(BPlusTree {
            fd,
            buffer,
            key_len: hdr.col_tot_len,
            hdr: RwLock::new(hdr),
            root_latch: Mutex::new(()),
        })
    }

    pub fn fd(&self) -> FileId {
        self.fd
    }

    fn fetch_node(&self, page_no: PageNo) -> MicaResult<IxNode> {
        let guard = self.buffer.fetch_page(PageId::new(self.fd, page_no))?;
        let page = guard
            .read()
            .map_err(|_| MicaError::Internal("page lock poisoned".to_string()))?;
        Ok(IxNode::decode(page.data(), self.key_len))
    }

    fn write_node(&self, page_no: PageNo, node: &IxNode) -> MicaResult<()> {
        let guard = self.buffer.fetch_page(PageId::new(self.fd, page_no))?;
        let mut page = guard
            .write()
            .map_err(|_| MicaError::Internal("page lock poisoned".to_string()))?;
        node.encode_into(page.data_mut());
        Ok(())
    }

    fn flush_header(&self, hdr: &IxFileHeader) -> MicaResult<()> {
        let guard = self.buffer.fetch_page(PageId::new(self.fd, IX_FILE_HDR_PAGE))?;
        let mut page = guard
            .write()
            .map_err(|_| MicaError::Internal("page lock poisoned".to_string()))?;
        let encoded = hdr.encode();
        page.data_mut()[8..8 + encoded.len()].copy_from_slice(&encoded);
        Ok(())
    }

    fn create_node_page(&self, hdr: &mut IxFileHeader) -> MicaResult<PageNo> {
        let guard = self.buffer.new_page(self.fd)?;
        let page_no = guard
            .read()
            .map_err(|_| MicaError::Internal("page lock poisoned".to_string()))?
            .page_id
            .page_no;
        if page_no + 1 > hdr.num_pages {
            hdr.num_pages = page_no + 1;
        }
        Ok(page_no)
    }

    /// Descend from the root to the leaf covering `key`.
    fn find_leaf(&self, hdr: &IxFileHeader, key: &[u8]) -> MicaResult<(PageNo, IxNode)> {
        let mut page_no = hdr.root_page;
        let mut node = self.fetch_node(page_no)?;
        while !node.is_leaf {
            page_no = node.internal_lookup(key, &hdr.col_types, &hdr.col_lens);
            node = self.fetch_node(page_no)?;
        }
        Ok((page_no, node))
    }

    /// Point lookup.
    pub fn get_value(&self, key: &[u8]) -> MicaResult<Option<Rid>> {
        let _latch = self.root_latch.lock();
        let hdr = self.hdr.read();
        let (_, leaf) = self.find_leaf(&hdr, key)?;
        Ok(leaf.leaf_lookup(key, &hdr.col_types, &hdr.col_lens))
    }

    pub fn contains(&self, key: &[u8]) -> MicaResult<bool> {
        Ok(self.get_value(key)?.is_some())
    }

    /// Insert a unique entry; splits propagate up to a new root if needed.
    pub fn insert_entry(&self, key: &[u8], rid: Rid) -> MicaResult<()> {
        let _latch = self.root_latch.lock();
        let mut hdr = self.hdr.write();
        let (leaf_no, mut leaf) = self.find_leaf(&hdr, key)?;
        leaf.insert(key, rid, &hdr.col_types, &hdr.col_lens)?;
        if leaf.num_key() == hdr.order {
            self.split_and_insert_parent(&mut hdr, leaf_no, leaf)?;
        } else {
            self.write_node(leaf_no, &leaf)?;
        }
        self.flush_header(&hdr)
    }

    /// Remove an entry; underflowing nodes redistribute with or merge
    /// into a sibling, recursively up the tree.
    pub fn delete_entry(&self, key: &[u8]) -> MicaResult<()> {
        let _latch = self.root_latch.lock();
        let mut hdr = self.hdr.write();
        let (leaf_no, mut leaf) = self.find_leaf(&hdr, key)?;
        if !leaf.remove(key, &hdr.col_types, &hdr.col_lens) {
            return Err(MicaError::IndexEntryNotFound);
        }
        self.write_node(leaf_no, &leaf)?;
        self.coalesce_or_redistribute(&mut hdr, leaf_no)?;
        self.flush_header(&hdr)
    }

    /// Split `node`, link the new right sibling into the tree, and push
    /// its first key up to the parent (recursively).
    fn split_and_insert_parent(
        &self,
        hdr: &mut IxFileHeader,
        node_no: PageNo,
        mut node: IxNode,
    ) -> MicaResult<()> {
        let new_no = self.create_node_page(hdr)?;
        let split_pos = node.num_key() / 2;
        let (keys, rids) = node.split_off(split_pos);
        let mut sibling = if node.is_leaf {
            IxNode::new_leaf(hdr.col_tot_len)
        } else {
            IxNode::new_internal(hdr.col_tot_len)
        };
        sibling.parent = node.parent;
        sibling.next_free = node.next_free;
        sibling.insert_pairs(0, &keys, &rids);

        if node.is_leaf {
            sibling.prev_leaf = node_no;
            sibling.next_leaf = node.next_leaf;
            let succ_no = node.next_leaf;
            let mut succ = self.fetch_node(succ_no)?;
            succ.prev_leaf = new_no;
            self.write_node(succ_no, &succ)?;
            node.next_leaf = new_no;
            if hdr.last_leaf == node_no {
                hdr.last_leaf = new_no;
            }
        } else {
            for i in 0..sibling.num_key() {
                self.maintain_child(new_no, &sibling, i)?;
            }
        }

        let sep_key = sibling.key_at(0).to_vec();
        self.insert_into_parent(hdr, node_no, node, sep_key, new_no, sibling)
    }

    fn insert_into_parent(
        &self,
        hdr: &mut IxFileHeader,
        old_no: PageNo,
        mut old: IxNode,
        key: Vec<u8>,
        new_no: PageNo,
        mut new: IxNode,
    ) -> MicaResult<()> {
        if old_no == hdr.root_page {
            let root_no = self.create_node_page(hdr)?;
            let mut root = IxNode::new_internal(hdr.col_tot_len);
            let old_min = old.key_at(0).to_vec();
            root.insert_pair(0, &old_min, Rid::new(old_no, CHILD_SLOT));
            root.insert_pair(1, &key, Rid::new(new_no, CHILD_SLOT));
            old.parent = root_no;
            new.parent = root_no;
            hdr.root_page = root_no;
            self.write_node(old_no, &old)?;
            self.write_node(new_no, &new)?;
            self.write_node(root_no, &root)
        } else {
            let parent_no = old.parent;
            let mut parent = self.fetch_node(parent_no)?;
            let pos = parent.find_child(old_no).ok_or_else(|| {
                MicaError::Internal(format!("node {old_no} missing from parent {parent_no}"))
            })?;
            parent.insert_pair(pos + 1, &key, Rid::new(new_no, CHILD_SLOT));
            new.parent = parent_no;
            self.write_node(old_no, &old)?;
            self.write_node(new_no, &new)?;
            if parent.num_key() == hdr.order {
                self.split_and_insert_parent(hdr, parent_no, parent)
            } else {
                self.write_node(parent_no, &parent)
            }
        }
    }

    fn coalesce_or_redistribute(&self, hdr: &mut IxFileHeader, node_no: PageNo) -> MicaResult<()> {
        let node = self.fetch_node(node_no)?;
        if node_no == hdr.root_page {
            return self.adjust_root(hdr, node_no, node);
        }
        if node.num_key() >= hdr.min_size() {
            return self.maintain_parent(node_no);
        }

        let parent_no = node.parent;
        let parent = self.fetch_node(parent_no)?;
        let index = parent.find_child(node_no).ok_or_else(|| {
            MicaError::Internal(format!("node {node_no} missing from parent {parent_no}"))
        })?;
        // Prefer the predecessor sibling; the successor only for the
        // leftmost child.
        let neighbor_pos = if index == 0 { 1 } else { index - 1 };
        let neighbor_no = parent.rid_at(neighbor_pos).page_no;
        let neighbor = self.fetch_node(neighbor_no)?;

        if node.num_key() + neighbor.num_key() >= 2 * hdr.min_size() {
            self.redistribute(neighbor_no, neighbor, node_no, node, index)
        } else {
            self.coalesce(hdr, neighbor_no, neighbor, node_no, node, parent_no, parent, index)
        }
    }

    /// Move one entry from the sibling and fix the parent separator.
    fn redistribute(
        &self,
        neighbor_no: PageNo,
        mut neighbor: IxNode,
        node_no: PageNo,
        mut node: IxNode,
        index: u32,
    ) -> MicaResult<()> {
        let is_pred = index > 0;
        let erase_pos = if is_pred { neighbor.num_key() - 1 } else { 0 };
        let insert_pos = if is_pred { 0 } else { node.num_key() };
        let moved_key = neighbor.key_at(erase_pos).to_vec();
        let moved_rid = neighbor.rid_at(erase_pos);
        node.insert_pair(insert_pos, &moved_key, moved_rid);
        neighbor.erase_pair(erase_pos);
        self.write_node(node_no, &node)?;
        self.write_node(neighbor_no, &neighbor)?;
        self.maintain_child(node_no, &node, insert_pos)?;
        self.maintain_parent(node_no)?;
        if !is_pred {
            self.maintain_parent(neighbor_no)?;
        }
        Ok(())
    }

    /// Merge the right node of the pair into the left one and delete the
    /// separator from the parent, recursing if the parent underflows.
    #[allow(clippy::too_many_arguments)]
    fn coalesce(
        &self,
        hdr: &mut IxFileHeader,
        neighbor_no: PageNo,
        neighbor: IxNode,
        node_no: PageNo,
        node: IxNode,
        parent_no: PageNo,
        mut parent: IxNode,
        index: u32,
    ) -> MicaResult<()> {
        // Arrange so the merge target is the left sibling.
        let (left_no, mut left, right_no, right, sep_index) = if index == 0 {
            (node_no, node, neighbor_no, neighbor, 1)
        } else {
            (neighbor_no, neighbor, node_no, node, index)
        };

        if right.is_leaf && hdr.last_leaf == right_no {
            hdr.last_leaf = left_no;
        }

        let insert_pos = left.num_key();
        let moved_keys = right.flat_keys().to_vec();
        let moved_rids = right.rids().to_vec();
        left.insert_pairs(insert_pos, &moved_keys, &moved_rids);

        if right.is_leaf {
            // Unlink the right leaf from the chain.
            left.next_leaf = right.next_leaf;
            let succ_no = right.next_leaf;
            let mut succ = self.fetch_node(succ_no)?;
            succ.prev_leaf = left_no;
            self.write_node(succ_no, &succ)?;
        }
        self.write_node(left_no, &left)?;
        if !left.is_leaf {
            for i in 0..moved_rids.len() as u32 {
                self.maintain_child(left_no, &left, insert_pos + i)?;
            }
        }
        hdr.num_pages = hdr.num_pages.saturating_sub(1);

        parent.erase_pair(sep_index);
        self.write_node(parent_no, &parent)?;
        self.coalesce_or_redistribute(hdr, parent_no)
    }

    /// Shrink the tree when the root underflows: promote a lone child, or
    /// leave an empty leaf root in place (the tree is simply empty).
    fn adjust_root(&self, hdr: &mut IxFileHeader, root_no: PageNo, root: IxNode) -> MicaResult<()> {
        if !root.is_leaf && root.num_key() == 1 {
            debug_assert_eq!(root_no, hdr.root_page);
            let child_no = root.rid_at(0).page_no;
            let mut child = self.fetch_node(child_no)?;
            child.parent = INVALID_PAGE_NO;
            self.write_node(child_no, &child)?;
            hdr.root_page = child_no;
            hdr.num_pages = hdr.num_pages.saturating_sub(1);
        }
        Ok(())
    }

    /// Bubble a changed minimum key up: each ancestor's separator must
    /// equal the first key of its subtree.
    fn maintain_parent(&self, start_no: PageNo) -> MicaResult<()> {
        let mut cur_no = start_no;
        loop {
            let cur = self.fetch_node(cur_no)?;
            if cur.parent == INVALID_PAGE_NO || cur.num_key() == 0 {
                break;
            }
            let parent_no = cur.parent;
            let mut parent = self.fetch_node(parent_no)?;
            let rank = parent.find_child(cur_no).ok_or_else(|| {
                MicaError::Internal(format!("node {cur_no} missing from parent {parent_no}"))
            })?;
            if parent.key_at(rank) == cur.key_at(0) {
                break;
            }
            let min_key = cur.key_at(0).to_vec();
            parent.set_key_at(rank, &min_key);
            self.write_node(parent_no, &parent)?;
            cur_no = parent_no;
        }
        Ok(())
    }

    /// Re-point a moved child at its new parent node.
    fn maintain_child(&self, node_no: PageNo, node: &IxNode, idx: u32) -> MicaResult<()> {
        if node.is_leaf {
            return Ok(());
        }
        let child_no = node.rid_at(idx).page_no;
        let mut child = self.fetch_node(child_no)?;
        child.parent = node_no;
        self.write_node(child_no, &child)
    }

    /// Cursor at the first entry with key >= `key`.
    pub fn lower_bound(&self, key: &[u8]) -> MicaResult<Iid> {
        let _latch = self.root_latch.lock();
        let hdr = self.hdr.read();
        let (leaf_no, leaf) = self.find_leaf(&hdr, key)?;
        let idx = leaf.lower_bound(key, &hdr.col_types, &hdr.col_lens);
        if idx == leaf.num_key() {
            if leaf.next_leaf == IX_LEAF_HEADER_PAGE {
                self.leaf_end_with(&hdr)
            } else {
                Ok(Iid {
                    page_no: leaf.next_leaf,
                    slot_no: 0,
                })
            }
        } else {
            Ok(Iid {
                page_no: leaf_no,
                slot_no: idx,
            })
        }
    }

    /// Cursor just past the last entry with key <= `key`.
    pub fn upper_bound(&self, key: &[u8]) -> MicaResult<Iid> {
        let _latch = self.root_latch.lock();
        let hdr = self.hdr.read();
        let (leaf_no, leaf) = self.find_leaf(&hdr, key)?;
        let idx = leaf.upper_bound(key, &hdr.col_types, &hdr.col_lens);
        if idx >= leaf.num_key() {
            if leaf.next_leaf == IX_LEAF_HEADER_PAGE {
                self.leaf_end_with(&hdr)
            } else {
                Ok(Iid {
                    page_no: leaf.next_leaf,
                    slot_no: 0,
                })
            }
        } else {
            Ok(Iid {
                page_no: leaf_no,
                slot_no: idx,
            })
        }
    }

    /// Cursor at the very first entry.
    pub fn leaf_begin(&self) -> MicaResult<Iid> {
        let hdr = self.hdr.read();
        Ok(Iid {
            page_no: hdr.first_leaf,
            slot_no: 0,
        })
    }

    /// Cursor one past the very last entry.
    pub fn leaf_end(&self) -> MicaResult<Iid> {
        let hdr = self.hdr.read();
        self.leaf_end_with(&hdr)
    }

    fn leaf_end_with(&self, hdr: &IxFileHeader) -> MicaResult<Iid> {
        let node = self.fetch_node(hdr.last_leaf)?;
        Ok(Iid {
            page_no: hdr.last_leaf,
            slot_no: node.num_key(),
        })
    }

    /// Resolve a cursor position to the record it points at.
    pub fn get_rid(&self, iid: Iid) -> MicaResult<Rid> {
        let node = self.fetch_node(iid.page_no)?;
        if iid.slot_no >= node.num_key() {
            return Err(MicaError::IndexEntryNotFound);
        }
        Ok(node.rid_at(iid.slot_no))
    }

    pub(crate) fn node_entry_count(&self, page_no: PageNo) -> MicaResult<u32> {
        Ok(self.fetch_node(page_no)?.num_key())
    }

    pub(crate) fn node_next_leaf(&self, page_no: PageNo) -> MicaResult<PageNo> {
        Ok(self.fetch_node(page_no)?.next_leaf)
    }

    #[cfg(test)]
    fn collect_leaf_keys(&self) -> Vec<Vec<u8>> {
        let hdr = self.hdr.read();
        let mut keys = Vec::new();
        let mut page_no = hdr.first_leaf;
        while page_no != IX_LEAF_HEADER_PAGE {
            let node = self.fetch_node(page_no).unwrap();
            for i in 0..node.num_key() {
                keys.push(node.key_at(i).to_vec());
            }
            page_no = node.next_leaf;
        }
        keys
    }

    #[cfg(test)]
    fn check_shape(&self) {
        let hdr = self.hdr.read();
        let mut stack = vec![hdr.root_page];
        while let Some(page_no) = stack.pop() {
            let node = self.fetch_node(page_no).unwrap();
            if page_no != hdr.root_page {
                assert!(
                    node.num_key() >= hdr.min_size() && node.num_key() < hdr.order,
                    "node {} has {} keys (min {}, max {})",
                    page_no,
                    node.num_key(),
                    hdr.min_size(),
                    hdr.order
                );
            }
            if !node.is_leaf {
                for i in 0..node.num_key() {
                    let child_no = node.rid_at(i).page_no;
                    let child = self.fetch_node(child_no).unwrap();
                    assert_eq!(child.parent, page_no);
                    assert_eq!(child.key_at(0), node.key_at(i), "separator out of sync");
                    stack.push(child_no);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<BPlusTree>) {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(DiskManager::new(dir.path()).unwrap());
        BPlusTree::create(&disk, "t_a.idx", vec![ColType::Int], vec![4]).unwrap();
        let buffer = Arc::new(BufferPoolManager::new(256, disk.clone()));
        let tree = Arc::new(BPlusTree::open(&disk, buffer, "t_a.idx").unwrap());
        (dir, tree)
    }

    fn key(v: i32) -> Vec<u8> {
        v.to_le_bytes().to_vec()
    }

    #[test]
    fn round_trip_with_deletes() {
        let (_dir, tree) = setup();
        let n = 2000i32;
        // Insert in a scrambled order.
        for i in 0..n {
            let k = (i * 37) % n;
            tree.insert_entry(&key(k), Rid::new(1, k as u32)).unwrap();
        }
        tree.check_shape();

        // Delete every third key.
        for k in (0..n).step_by(3) {
            tree.delete_entry(&key(k)).unwrap();
        }
        tree.check_shape();

        for k in 0..n {
            let found = tree.get_value(&key(k)).unwrap();
            if k % 3 == 0 {
                assert!(found.is_none(), "key {k} should be gone");
            } else {
                assert_eq!(found, Some(Rid::new(1, k as u32)), "key {k} lost");
            }
        }
    }

    #[test]
    fn leaf_walk_is_strictly_increasing() {
        let (_dir, tree) = setup();
        for k in [5i32, 1, 9, 3, 7, 2, 8, 4, 6, 0] {
            tree.insert_entry(&key(k), Rid::new(1, k as u32)).unwrap();
        }
        let keys = tree.collect_leaf_keys();
        assert_eq!(keys.len(), 10);
        for window in keys.windows(2) {
            assert!(
                crate::index::key_compare(&window[0], &window[1], &[ColType::Int], &[4])
                    == std::cmp::Ordering::Less
            );
        }
    }

    #[test]
    fn duplicate_insert_rejected() {
        let (_dir, tree) = setup();
        tree.insert_entry(&key(1), Rid::new(1, 0)).unwrap();
        assert!(matches!(
            tree.insert_entry(&key(1), Rid::new(1, 1)),
            Err(MicaError::UniqueConstraint)
        ));
        // The original entry is untouched.
        assert_eq!(tree.get_value(&key(1)).unwrap(), Some(Rid::new(1, 0)));
    }

    #[test]
    fn delete_missing_key_errors() {
        let (_dir, tree) = setup();
        tree.insert_entry(&key(1), Rid::new(1, 0)).unwrap();
        assert!(matches!(
            tree.delete_entry(&key(2)),
            Err(MicaError::IndexEntryNotFound)
        ));
    }

    #[test]
    fn range_bounds_cover_half_open_interval() {
        let (_dir, tree) = setup();
        for k in 0..1000i32 {
            tree.insert_entry(&key(k), Rid::new(1, k as u32)).unwrap();
        }
        let lo = tree.lower_bound(&key(100)).unwrap();
        let hi = tree.lower_bound(&key(200)).unwrap();

        // Walk [lo, hi) through the leaf chain.
        let mut count = 0u32;
        let mut iid = lo;
        while iid != hi && iid.page_no != IX_LEAF_HEADER_PAGE {
            let rid = tree.get_rid(iid).unwrap();
            assert_eq!(rid.slot_no, 100 + count);
            count += 1;
            iid.slot_no += 1;
            if iid.slot_no >= tree.node_entry_count(iid.page_no).unwrap() {
                iid = Iid {
                    page_no: tree.node_next_leaf(iid.page_no).unwrap(),
                    slot_no: 0,
                };
            }
        }
        assert_eq!(count, 100);

        // upper_bound(199) lands exactly where lower_bound(200) does.
        assert_eq!(tree.upper_bound(&key(199)).unwrap(), hi);
    }

    #[test]
    fn drain_to_empty_and_refill() {
        let (_dir, tree) = setup();
        for k in 0..500i32 {
            tree.insert_entry(&key(k), Rid::new(1, k as u32)).unwrap();
        }
        for k in 0..500i32 {
            tree.delete_entry(&key(k)).unwrap();
        }
        assert!(tree.collect_leaf_keys().is_empty());
        for k in 0..50i32 {
            tree.insert_entry(&key(k), Rid::new(2, k as u32)).unwrap();
        }
        assert_eq!(tree.get_value(&key(25)).unwrap(), Some(Rid::new(2, 25)));
        tree.check_shape();
    }
}
