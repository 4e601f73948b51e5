use std::sync::Arc;

use crate::error::MicaResult;
use crate::index::{BPlusTree, Iid, IX_LEAF_HEADER_PAGE};
use crate::storage::Rid;

/// Iterator between two cursor positions, walking the leaf chain until
/// the upper bound or the sentinel page.
pub struct IxScan {
    tree: Arc<BPlusTree>,
    iid: Iid,
    end: Iid,
}

impl IxScan {
    pub fn new(tree: Arc<BPlusTree>, begin: Iid, end: Iid) -> Self {
        Self {
            tree,
            iid: begin,
            end,
        }
    }

    pub fn is_end(&self) -> bool {
        self.iid == self.end || self.iid.page_no == IX_LEAF_HEADER_PAGE
    }

    pub fn rid(&self) -> MicaResult<Rid> {
        self.tree.get_rid(self.iid)
    }

    /// Advance one slot, hopping to the next leaf when this one is done.
    pub fn next(&mut self) -> MicaResult<()> {
        self.iid.slot_no += 1;
        if self.iid.page_no != IX_LEAF_HEADER_PAGE
            && self.iid != self.end
            && self.iid.slot_no >= self.tree.node_entry_count(self.iid.page_no)?
        {
            self.iid = Iid {
                page_no: self.tree.node_next_leaf(self.iid.page_no)?,
                slot_no: 0,
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPoolManager;
    use crate::catalog::data_type::ColType;
    use crate::storage::DiskManager;
    use tempfile::TempDir;

    #[test]
    fn scan_visits_exactly_the_range() {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(DiskManager::new(dir.path()).unwrap());
        BPlusTree::create(&disk, "t_a.idx", vec![ColType::Int], vec![4]).unwrap();
        let buffer = Arc::new(BufferPoolManager::new(256, disk.clone()));
        let tree = Arc::new(BPlusTree::open(&disk, buffer, "t_a.idx").unwrap());

        for k in 0..1000i32 {
            tree.insert_entry(&k.to_le_bytes(), Rid::new(1, k as u32))
                .unwrap();
        }

        let begin = tree.lower_bound(&100i32.to_le_bytes()).unwrap();
        let end = tree.upper_bound(&199i32.to_le_bytes()).unwrap();
        let mut scan = IxScan::new(tree, begin, end);
        let mut expected = 100u32;
        while !scan.is_end() {
            assert_eq!(scan.rid().unwrap(), Rid::new(1, expected));
            expected += 1;
            scan.next().unwrap();
        }
        assert_eq!(expected, 200);
    }

    #[test]
    fn full_scan_ends_at_sentinel() {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(DiskManager::new(dir.path()).unwrap());
        BPlusTree::create(&disk, "t_b.idx", vec![ColType::Int], vec![4]).unwrap();
        let buffer = Arc::new(BufferPoolManager::new(256, disk.clone()));
        let tree = Arc::new(BPlusTree::open(&disk, buffer, "t_b.idx").unwrap());

        for k in 0..10i32 {
            tree.insert_entry(&k.to_le_bytes(), Rid::new(1, k as u32))
                .unwrap();
        }
        let begin = tree.leaf_begin().unwrap();
        let end = tree.leaf_end().unwrap();
        let mut scan = IxScan::new(tree, begin, end);
        let mut count = 0;
        while !scan.is_end() {
            scan.rid().unwrap();
            count += 1;
            scan.next().unwrap();
        }
        assert_eq!(count, 10);
    }
}
