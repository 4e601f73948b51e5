use std::sync::Arc;

use crate::catalog::{Catalog, IndexMeta};
use crate::error::{MicaError, MicaResult};
use crate::execution::{ExecutionContext, OutputCol, Tuple, VolcanoExecutor};
use crate::index::BPlusTree;
use crate::recovery::LogRecordBody;
use crate::storage::{HeapFile, Rid};
use crate::transaction::WriteRecord;

/// Delete matching rows: the child scan runs under the table IX lock and
/// collects rids; each row is then X-locked, removed from every index,
/// removed from the heap, and recorded for undo and redo.
pub struct DeleteExecutor {
    table: String,
    heap: Arc<HeapFile>,
    indexes: Vec<(IndexMeta, Arc<BPlusTree>)>,
    child: Box<dyn VolcanoExecutor>,
    done: bool,
}

impl DeleteExecutor {
    pub fn new(
        catalog: &Catalog,
        table: &str,
        child: Box<dyn VolcanoExecutor>,
    ) -> MicaResult<Self> {
        Ok(Self {
            table: table.to_string(),
            heap: catalog.heap(table)?,
            indexes: catalog.table_indexes(table)?,
            child,
            done: false,
        })
    }
}

impl VolcanoExecutor for DeleteExecutor {
    fn init(&mut self, ctx: &mut ExecutionContext) -> MicaResult<()> {
        self.child.init(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> MicaResult<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let mut rids: Vec<Rid> = Vec::new();
        while let Some(tuple) = self.child.next(ctx)? {
            let rid = tuple
                .rid
                .ok_or_else(|| MicaError::Internal("delete child lost the rid".to_string()))?;
            rids.push(rid);
        }

        for rid in rids {
            ctx.lock_manager
                .lock_exclusive_on_record(ctx.txn, self.heap.fd(), rid)?;
            let record = self.heap.get_record(rid)?;

            for (index_meta, tree) in &self.indexes {
                tree.delete_entry(&index_meta.build_key(&record))?;
            }
            self.heap.delete_record(rid)?;

            ctx.txn.append_write_record(WriteRecord::Delete {
                table: self.table.clone(),
                rid,
                record: record.clone(),
            });
            let lsn = ctx.log_manager.append(
                ctx.txn.id(),
                ctx.txn.prev_lsn(),
                LogRecordBody::Delete {
                    table: self.table.clone(),
                    rid,
                    old_record: record,
                },
            )?;
            ctx.txn.set_prev_lsn(lsn);
            self.heap.set_page_lsn(rid.page_no, lsn)?;
        }
        Ok(None)
    }

    fn output_cols(&self) -> &[OutputCol] {
        &[]
    }
}
