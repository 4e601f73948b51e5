use dashmap::DashMap;
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::catalog::data_type::ColType;
use crate::catalog::schema::{ColumnMeta, DbMeta, IndexMeta, TableMeta};
use crate::config::META_FILE_NAME;
use crate::error::{MicaError, MicaResult};
use crate::index::BPlusTree;
use crate::storage::{DiskManager, HeapFile, Rid};

/// The in-memory schema plus the open heap and index handles behind it.
/// DDL is serialised at the statement level; the maps themselves are
/// concurrent so DML threads resolve handles without a global lock.
pub struct Catalog {
    disk: Arc<DiskManager>,
    buffer: Arc<BufferPoolManager>,
    meta: RwLock<DbMeta>,
    heaps: DashMap<String, Arc<HeapFile>>,
    indexes: DashMap<String, Arc<BPlusTree>>,
    ddl_latch: Mutex<()>,
}

impl Catalog {
    /// Load (or initialise) the catalog for a database directory and open
    /// every table's heap and index files.
    pub fn open(
        disk: Arc<DiskManager>,
        buffer: Arc<BufferPoolManager>,
        db_name: &str,
    ) -> MicaResult<Catalog> {
        let meta_path = disk.db_dir().join(META_FILE_NAME);
        let meta = if meta_path.exists() {
            DbMeta::load(&meta_path)?
        } else {
            let meta = DbMeta::new(db_name.to_string());
            meta.save(&meta_path)?;
            meta
        };

        let catalog = Catalog {
            disk,
            buffer,
            meta: RwLock::new(meta),
            heaps: DashMap::new(),
            indexes: DashMap::new(),
            ddl_latch: Mutex::new(()),
        };

        let tables: Vec<TableMeta> = catalog.meta.read().tables.values().cloned().collect();
        for table in tables {
            let heap = HeapFile::open(&catalog.disk, catalog.buffer.clone(), &table.name)?;
            catalog.heaps.insert(table.name.clone(), Arc::new(heap));
            for index in &table.indexes {
                let tree =
                    BPlusTree::open(&catalog.disk, catalog.buffer.clone(), &index.file_name())?;
                catalog.indexes.insert(index.index_name(), Arc::new(tree));
            }
        }
        Ok(catalog)
    }

    fn meta_path(&self) -> PathBuf {
        self.disk.db_dir().join(META_FILE_NAME)
    }

    fn save_meta(&self) -> MicaResult<()> {
        self.meta.read().save(&self.meta_path())
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.meta.read().tables.contains_key(name)
    }

    pub fn table_meta(&self, name: &str) -> MicaResult<TableMeta> {
        self.meta.read().get_table(name).map(|t| t.clone())
    }

    pub fn table_names(&self) -> Vec<String> {
        self.meta.read().tables.keys().cloned().collect()
    }

    pub fn heap(&self, table: &str) -> MicaResult<Arc<HeapFile>> {
        self.heaps
            .get(table)
            .map(|h| h.clone())
            .ok_or_else(|| MicaError::TableNotFound(table.to_string()))
    }

    pub fn index(&self, index_name: &str) -> MicaResult<Arc<BPlusTree>> {
        self.indexes
            .get(index_name)
            .map(|i| i.clone())
            .ok_or_else(|| MicaError::IndexNotFound(index_name.to_string()))
    }

    /// Every index on a table, paired with its metadata.
    pub fn table_indexes(&self, table: &str) -> MicaResult<Vec<(IndexMeta, Arc<BPlusTree>)>> {
        let meta = self.table_meta(table)?;
        meta.indexes
            .iter()
            .map(|ix| Ok((ix.clone(), self.index(&ix.index_name())?)))
            .collect()
    }

    pub fn create_table(
        &self,
        name: &str,
        columns: Vec<(String, ColType, u32)>,
    ) -> MicaResult<()> {
        let _ddl = self.ddl_latch.lock();
        if self.has_table(name) {
            return Err(MicaError::TableExists(name.to_string()));
        }

        let mut cols = Vec::with_capacity(columns.len());
        let mut offset = 0u32;
        for (col_name, col_type, len) in columns {
            cols.push(ColumnMeta {
                name: col_name,
                col_type,
                len,
                offset,
                indexed: false,
            });
            offset += len;
        }
        let table = TableMeta {
            name: name.to_string(),
            cols,
            indexes: Vec::new(),
        };

        HeapFile::create(&self.disk, name, table.record_size())?;
        let heap = HeapFile::open(&self.disk, self.buffer.clone(), name)?;
        self.heaps.insert(name.to_string(), Arc::new(heap));
        self.meta.write().tables.insert(name.to_string(), table);
        self.save_meta()?;
        debug!("created table '{name}'");
        Ok(())
    }

    pub fn drop_table(&self, name: &str) -> MicaResult<()> {
        let _ddl = self.ddl_latch.lock();
        let table = self.table_meta(name)?;

        for index in &table.indexes {
            if let Some((_, tree)) = self.indexes.remove(&index.index_name()) {
                self.buffer.purge_file(tree.fd(), false)?;
                self.disk.close_file(tree.fd())?;
            }
            self.disk.destroy_file(&index.file_name())?;
        }
        if let Some((_, heap)) = self.heaps.remove(name) {
            self.buffer.purge_file(heap.fd(), false)?;
            self.disk.close_file(heap.fd())?;
        }
        self.disk.destroy_file(name)?;
        self.meta.write().tables.remove(name);
        self.save_meta()?;
        debug!("dropped table '{name}'");
        Ok(())
    }

    /// Create a unique index and backfill it from the existing records.
    pub fn create_index(&self, table: &str, col_names: &[String]) -> MicaResult<()> {
        let _ddl = self.ddl_latch.lock();
        let table_meta = self.table_meta(table)?;
        if table_meta.get_index(col_names).is_some() {
            return Err(MicaError::IndexExists(format!(
                "{}({})",
                table,
                col_names.join(",")
            )));
        }
        let mut cols = Vec::with_capacity(col_names.len());
        for col_name in col_names {
            cols.push(table_meta.get_col(col_name)?.clone());
        }
        let index_meta = IndexMeta::new(table.to_string(), cols);

        let col_types: Vec<ColType> = index_meta.cols.iter().map(|c| c.col_type).collect();
        let col_lens: Vec<u32> = index_meta.cols.iter().map(|c| c.len).collect();
        BPlusTree::create(&self.disk, &index_meta.file_name(), col_types, col_lens)?;
        let tree = Arc::new(BPlusTree::open(
            &self.disk,
            self.buffer.clone(),
            &index_meta.file_name(),
        )?);

        // Backfill; a duplicate key aborts the DDL and removes the file.
        let heap = self.heap(table)?;
        let mut scan = heap.scan();
        loop {
            match scan.next() {
                Ok(Some((rid, record))) => {
                    if let Err(err) = tree.insert_entry(&index_meta.build_key(&record), rid) {
                        self.buffer.purge_file(tree.fd(), false)?;
                        self.disk.close_file(tree.fd())?;
                        self.disk.destroy_file(&index_meta.file_name())?;
                        return Err(err);
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    self.buffer.purge_file(tree.fd(), false)?;
                    self.disk.close_file(tree.fd())?;
                    self.disk.destroy_file(&index_meta.file_name())?;
                    return Err(err);
                }
            }
        }

        self.indexes.insert(index_meta.index_name(), tree);
        {
            let mut meta = self.meta.write();
            let table_entry = meta.get_table_mut(table)?;
            for col in table_entry.cols.iter_mut() {
                if col_names.contains(&col.name) {
                    col.indexed = true;
                }
            }
            table_entry.indexes.push(index_meta);
        }
        self.save_meta()?;
        Ok(())
    }

    pub fn drop_index(&self, table: &str, col_names: &[String]) -> MicaResult<()> {
        let _ddl = self.ddl_latch.lock();
        let table_meta = self.table_meta(table)?;
        let Some(index_meta) = table_meta.get_index(col_names).cloned() else {
            return Err(MicaError::IndexNotFound(format!(
                "{}({})",
                table,
                col_names.join(",")
            )));
        };

        if let Some((_, tree)) = self.indexes.remove(&index_meta.index_name()) {
            self.buffer.purge_file(tree.fd(), false)?;
            self.disk.close_file(tree.fd())?;
        }
        self.disk.destroy_file(&index_meta.file_name())?;
        {
            let mut meta = self.meta.write();
            let table_entry = meta.get_table_mut(table)?;
            table_entry.indexes.retain(|ix| ix.col_names() != col_names);
            let remaining = table_entry.indexes.clone();
            for col in table_entry.cols.iter_mut() {
                col.indexed = remaining
                    .iter()
                    .any(|ix| ix.cols.iter().any(|c| c.name == col.name));
            }
        }
        self.save_meta()?;
        Ok(())
    }

    /// Undo an insert: remove the index entries, then free the slot. The
    /// insert may have died between heap and index writes, so an entry is
    /// only removed when it is this record's own.
    pub fn rollback_insert(&self, table: &str, rid: Rid) -> MicaResult<()> {
        let heap = self.heap(table)?;
        let record = heap.get_record(rid)?;
        for (index_meta, tree) in self.table_indexes(table)? {
            let key = index_meta.build_key(&record);
            if tree.get_value(&key)? == Some(rid) {
                tree.delete_entry(&key)?;
            }
        }
        heap.delete_record(rid)
    }

    /// Undo a delete: put the before-image back, entries included.
    pub fn rollback_delete(&self, table: &str, rid: Rid, record: &[u8]) -> MicaResult<()> {
        let heap = self.heap(table)?;
        heap.insert_record_at(rid, record)?;
        for (index_meta, tree) in self.table_indexes(table)? {
            tree.insert_entry(&index_meta.build_key(record), rid)?;
        }
        Ok(())
    }

    /// Undo an update: revert to the before-image, fixing changed keys.
    pub fn rollback_update(&self, table: &str, rid: Rid, old_record: &[u8]) -> MicaResult<()> {
        let heap = self.heap(table)?;
        let current = heap.get_record(rid)?;
        for (index_meta, tree) in self.table_indexes(table)? {
            let current_key = index_meta.build_key(&current);
            let old_key = index_meta.build_key(old_record);
            if current_key != old_key {
                tree.delete_entry(&current_key)?;
                tree.insert_entry(&old_key, rid)?;
            }
        }
        heap.update_record(rid, old_record)
    }

    /// Redo an insert idempotently; index entries are re-ensured even
    /// when the heap page already carried the change.
    pub fn recovery_insert(&self, table: &str, rid: Rid, record: &[u8]) -> MicaResult<()> {
        let heap = self.heap(table)?;
        heap.insert_record_at(rid, record)?;
        self.ensure_index_entries(table, rid, record)
    }

    pub fn recovery_delete(&self, table: &str, rid: Rid, old_record: &[u8]) -> MicaResult<()> {
        let heap = self.heap(table)?;
        if heap.get_record(rid).is_ok() {
            heap.delete_record(rid)?;
        }
        for (index_meta, tree) in self.table_indexes(table)? {
            let key = index_meta.build_key(old_record);
            if tree.contains(&key)? {
                tree.delete_entry(&key)?;
            }
        }
        Ok(())
    }

    pub fn recovery_update(
        &self,
        table: &str,
        rid: Rid,
        old_record: &[u8],
        new_record: &[u8],
    ) -> MicaResult<()> {
        let heap = self.heap(table)?;
        heap.insert_record_at(rid, new_record)?;
        for (index_meta, tree) in self.table_indexes(table)? {
            let old_key = index_meta.build_key(old_record);
            let new_key = index_meta.build_key(new_record);
            if old_key != new_key && tree.contains(&old_key)? {
                tree.delete_entry(&old_key)?;
            }
        }
        self.ensure_index_entries(table, rid, new_record)
    }

    fn ensure_index_entries(&self, table: &str, rid: Rid, record: &[u8]) -> MicaResult<()> {
        for (index_meta, tree) in self.table_indexes(table)? {
            let key = index_meta.build_key(record);
            if tree.get_value(&key)?.is_none() {
                tree.insert_entry(&key, rid)?;
            }
        }
        Ok(())
    }

    /// Post-recovery fixup: on-disk free lists may predate the crash.
    pub fn rebuild_free_lists(&self) -> MicaResult<()> {
        for entry in self.heaps.iter() {
            entry.value().rebuild_free_list()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Catalog) {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(DiskManager::new(dir.path()).unwrap());
        let buffer = Arc::new(BufferPoolManager::new(256, disk.clone()));
        let catalog = Catalog::open(disk, buffer, "testdb").unwrap();
        (dir, catalog)
    }

    fn int_cols() -> Vec<(String, ColType, u32)> {
        vec![
            ("a".to_string(), ColType::Int, 4),
            ("b".to_string(), ColType::Char, 8),
        ]
    }

    #[test]
    fn create_and_drop_table() {
        let (_dir, catalog) = setup();
        catalog.create_table("t", int_cols()).unwrap();
        assert!(matches!(
            catalog.create_table("t", int_cols()),
            Err(MicaError::TableExists(_))
        ));
        let meta = catalog.table_meta("t").unwrap();
        assert_eq!(meta.record_size(), 12);
        assert_eq!(meta.cols[1].offset, 4);

        catalog.drop_table("t").unwrap();
        assert!(matches!(
            catalog.table_meta("t"),
            Err(MicaError::TableNotFound(_))
        ));
        assert!(matches!(
            catalog.drop_table("t"),
            Err(MicaError::TableNotFound(_))
        ));
    }

    #[test]
    fn create_index_backfills_existing_records() {
        let (_dir, catalog) = setup();
        catalog.create_table("t", int_cols()).unwrap();
        let heap = catalog.heap("t").unwrap();
        for i in 0..10i32 {
            let mut record = vec![0u8; 12];
            record[..4].copy_from_slice(&i.to_le_bytes());
            heap.insert_record(&record).unwrap();
        }

        catalog.create_index("t", &["a".to_string()]).unwrap();
        let (index_meta, tree) = catalog.table_indexes("t").unwrap().pop().unwrap();
        assert_eq!(index_meta.index_name(), "t_a");
        for i in 0..10i32 {
            assert!(tree.contains(&i.to_le_bytes()).unwrap());
        }

        assert!(matches!(
            catalog.create_index("t", &["a".to_string()]),
            Err(MicaError::IndexExists(_))
        ));
        catalog.drop_index("t", &["a".to_string()]).unwrap();
        assert!(matches!(
            catalog.drop_index("t", &["a".to_string()]),
            Err(MicaError::IndexNotFound(_))
        ));
    }

    #[test]
    fn duplicate_keys_abort_index_creation() {
        let (_dir, catalog) = setup();
        catalog.create_table("t", int_cols()).unwrap();
        let heap = catalog.heap("t").unwrap();
        let mut record = vec![0u8; 12];
        record[..4].copy_from_slice(&1i32.to_le_bytes());
        heap.insert_record(&record).unwrap();
        heap.insert_record(&record).unwrap();

        assert!(matches!(
            catalog.create_index("t", &["a".to_string()]),
            Err(MicaError::UniqueConstraint)
        ));
        assert!(catalog.table_meta("t").unwrap().indexes.is_empty());
    }

    #[test]
    fn rollback_helpers_keep_heap_and_index_consistent() {
        let (_dir, catalog) = setup();
        catalog.create_table("t", int_cols()).unwrap();
        catalog.create_index("t", &["a".to_string()]).unwrap();
        let heap = catalog.heap("t").unwrap();
        let tree = catalog.index("t_a").unwrap();

        let mut record = vec![0u8; 12];
        record[..4].copy_from_slice(&1i32.to_le_bytes());
        let rid = heap.insert_record(&record).unwrap();
        tree.insert_entry(&1i32.to_le_bytes(), rid).unwrap();

        // Undo the insert: both heap and index forget the row.
        catalog.rollback_insert("t", rid).unwrap();
        assert!(heap.get_record(rid).is_err());
        assert!(!tree.contains(&1i32.to_le_bytes()).unwrap());

        // Undo a delete: the row comes back, entry included.
        catalog.rollback_delete("t", rid, &record).unwrap();
        assert_eq!(heap.get_record(rid).unwrap(), record);
        assert!(tree.contains(&1i32.to_le_bytes()).unwrap());

        // Undo an update that changed the key.
        let mut new_record = record.clone();
        new_record[..4].copy_from_slice(&2i32.to_le_bytes());
        heap.update_record(rid, &new_record).unwrap();
        tree.delete_entry(&1i32.to_le_bytes()).unwrap();
        tree.insert_entry(&2i32.to_le_bytes(), rid).unwrap();
        catalog.rollback_update("t", rid, &record).unwrap();
        assert_eq!(heap.get_record(rid).unwrap(), record);
        assert!(tree.contains(&1i32.to_le_bytes()).unwrap());
        assert!(!tree.contains(&2i32.to_le_bytes()).unwrap());
    }
}
