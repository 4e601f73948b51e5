use std::sync::Arc;

use crate::catalog::Catalog;
use crate::error::{MicaError, MicaResult};
use crate::execution::{eval_conds, table_output_cols, ExecutionContext, OutputCol, Tuple, VolcanoExecutor};
use crate::sql::Condition;
use crate::storage::{HeapFile, HeapScan};

/// Full-table scan: walks the heap in physical order, filtering with the
/// pushed-down predicates. Read scans take IS on the table and S on each
/// matching record; scans feeding a DML executor take IX and leave row
/// locking to their parent.
pub struct SeqScanExecutor {
    conds: Vec<Condition>,
    cols: Vec<OutputCol>,
    heap: Arc<HeapFile>,
    scan: Option<HeapScan>,
    lock_rows: bool,
}

impl SeqScanExecutor {
    pub fn new(
        catalog: &Catalog,
        table: &str,
        conds: Vec<Condition>,
        lock_rows: bool,
    ) -> MicaResult<Self> {
        let meta = catalog.table_meta(table)?;
        let heap = catalog.heap(table)?;
        Ok(Self {
            conds,
            cols: table_output_cols(&meta),
            heap,
            scan: None,
            lock_rows,
        })
    }
}

impl VolcanoExecutor for SeqScanExecutor {
    fn init(&mut self, ctx: &mut ExecutionContext) -> MicaResult<()> {
        if self.lock_rows {
            ctx.lock_manager.lock_is_on_table(ctx.txn, self.heap.fd())?;
        } else {
            ctx.lock_manager.lock_ix_on_table(ctx.txn, self.heap.fd())?;
        }
        self.scan = Some(self.heap.scan());
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> MicaResult<Option<Tuple>> {
        let scan = self
            .scan
            .as_mut()
            .ok_or_else(|| MicaError::Internal("scan used before init".to_string()))?;
        while let Some((rid, data)) = scan.next()? {
            if eval_conds(&self.cols, &self.conds, &data)? {
                if self.lock_rows {
                    ctx.lock_manager
                        .lock_shared_on_record(ctx.txn, self.heap.fd(), rid)?;
                }
                return Ok(Some(Tuple {
                    data,
                    rid: Some(rid),
                }));
            }
        }
        Ok(None)
    }

    fn output_cols(&self) -> &[OutputCol] {
        &self.cols
    }
}
