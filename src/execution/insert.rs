use std::sync::Arc;

use crate::catalog::data_type::Value;
use crate::catalog::{Catalog, IndexMeta, TableMeta};
use crate::error::{MicaError, MicaResult};
use crate::execution::{ExecutionContext, OutputCol, Tuple, VolcanoExecutor};
use crate::index::BPlusTree;
use crate::recovery::LogRecordBody;
use crate::storage::HeapFile;
use crate::transaction::WriteRecord;

/// Insert one row: widen the values, check every unique index before
/// touching anything, then heap, indexes, write set and log record.
pub struct InsertExecutor {
    table: String,
    meta: TableMeta,
    heap: Arc<HeapFile>,
    indexes: Vec<(IndexMeta, Arc<BPlusTree>)>,
    values: Vec<Value>,
    done: bool,
}

impl InsertExecutor {
    pub fn new(catalog: &Catalog, table: &str, values: Vec<Value>) -> MicaResult<Self> {
        let meta = catalog.table_meta(table)?;
        let heap = catalog.heap(table)?;
        let indexes = catalog.table_indexes(table)?;
        Ok(Self {
            table: table.to_string(),
            meta,
            heap,
            indexes,
            values,
            done: false,
        })
    }

    fn build_record(&self) -> MicaResult<Vec<u8>> {
        if self.values.len() != self.meta.cols.len() {
            return Err(MicaError::InvalidValueCount);
        }
        let mut record = vec![0u8; self.meta.record_size() as usize];
        for (value, col) in self.values.iter().zip(self.meta.cols.iter()) {
            let widened = value.widen_to(col.col_type)?;
            let bytes = widened.encode(col.len)?;
            let start = col.offset as usize;
            record[start..start + col.len as usize].copy_from_slice(&bytes);
        }
        Ok(record)
    }
}

impl VolcanoExecutor for InsertExecutor {
    fn init(&mut self, ctx: &mut ExecutionContext) -> MicaResult<()> {
        ctx.lock_manager.lock_ix_on_table(ctx.txn, self.heap.fd())?;
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> MicaResult<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let record = self.build_record()?;

        // Uniqueness must be settled before any index is touched, or a
        // later conflict would leave earlier indexes half-updated.
        for (index_meta, tree) in &self.indexes {
            if tree.contains(&index_meta.build_key(&record))? {
                return Err(MicaError::UniqueConstraint);
            }
        }

        let rid = self.heap.insert_record(&record)?;
        // The write record goes in before the row lock: if wait-die kills
        // this transaction here, rollback must already cover the slot.
        ctx.txn.append_write_record(WriteRecord::Insert {
            table: self.table.clone(),
            rid,
        });
        ctx.lock_manager
            .lock_exclusive_on_record(ctx.txn, self.heap.fd(), rid)?;

        for (index_meta, tree) in &self.indexes {
            tree.insert_entry(&index_meta.build_key(&record), rid)?;
        }

        let lsn = ctx.log_manager.append(
            ctx.txn.id(),
            ctx.txn.prev_lsn(),
            LogRecordBody::Insert {
                table: self.table.clone(),
                rid,
                new_record: record,
            },
        )?;
        ctx.txn.set_prev_lsn(lsn);
        self.heap.set_page_lsn(rid.page_no, lsn)?;
        Ok(None)
    }

    fn output_cols(&self) -> &[OutputCol] {
        &[]
    }
}
