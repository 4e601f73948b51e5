use std::sync::Arc;

use crate::catalog::data_type::{type_max_bytes, type_min_bytes};
use crate::catalog::{Catalog, IndexMeta};
use crate::error::{MicaError, MicaResult};
use crate::execution::{eval_conds, table_output_cols, ExecutionContext, OutputCol, Tuple, VolcanoExecutor};
use crate::index::{BPlusTree, IxScan};
use crate::sql::{CompOp, CondRhs, Condition};
use crate::storage::HeapFile;

/// Range scan over a B+-tree index: equality predicates pin a key
/// prefix, one range predicate bounds the next column, and the remaining
/// columns pad out with type minimum/maximum. Predicates are re-checked
/// on the fetched records, so an over-wide key window only costs I/O.
pub struct IndexScanExecutor {
    index_meta: IndexMeta,
    conds: Vec<Condition>,
    cols: Vec<OutputCol>,
    heap: Arc<HeapFile>,
    tree: Arc<BPlusTree>,
    scan: Option<IxScan>,
    lock_rows: bool,
}

impl IndexScanExecutor {
    pub fn new(
        catalog: &Catalog,
        table: &str,
        index_meta: IndexMeta,
        conds: Vec<Condition>,
        lock_rows: bool,
    ) -> MicaResult<Self> {
        let meta = catalog.table_meta(table)?;
        let heap = catalog.heap(table)?;
        let tree = catalog.index(&index_meta.index_name())?;
        Ok(Self {
            index_meta,
            conds,
            cols: table_output_cols(&meta),
            heap,
            tree,
            scan: None,
            lock_rows,
        })
    }

    /// Derive the `[low, high]` key window from the predicates.
    fn build_key_window(&self) -> MicaResult<(Vec<u8>, Vec<u8>)> {
        let mut low = Vec::with_capacity(self.index_meta.col_tot_len as usize);
        let mut high = Vec::with_capacity(self.index_meta.col_tot_len as usize);
        let mut prefix_open = true;

        for col in &self.index_meta.cols {
            if prefix_open {
                let eq_value = self.conds.iter().find_map(|cond| {
                    match (&cond.rhs, cond.op, cond.lhs.col == col.name) {
                        (CondRhs::Value(v), CompOp::Eq, true) => Some(v.clone()),
                        _ => None,
                    }
                });
                if let Some(value) = eq_value {
                    let bytes = value.widen_to(col.col_type)?.encode(col.len)?;
                    low.extend_from_slice(&bytes);
                    high.extend_from_slice(&bytes);
                    continue;
                }

                let mut lo_bytes = type_min_bytes(col.col_type, col.len);
                let mut hi_bytes = type_max_bytes(col.col_type, col.len);
                for cond in &self.conds {
                    if cond.lhs.col != col.name {
                        continue;
                    }
                    let CondRhs::Value(value) = &cond.rhs else {
                        continue;
                    };
                    let bytes = value.widen_to(col.col_type)?.encode(col.len)?;
                    match cond.op {
                        CompOp::Gt | CompOp::Ge => lo_bytes = bytes,
                        CompOp::Lt | CompOp::Le => hi_bytes = bytes,
                        _ => {}
                    }
                }
                low.extend_from_slice(&lo_bytes);
                high.extend_from_slice(&hi_bytes);
                prefix_open = false;
            } else {
                low.extend_from_slice(&type_min_bytes(col.col_type, col.len));
                high.extend_from_slice(&type_max_bytes(col.col_type, col.len));
            }
        }
        Ok((low, high))
    }
}

impl VolcanoExecutor for IndexScanExecutor {
    fn init(&mut self, ctx: &mut ExecutionContext) -> MicaResult<()> {
        if self.lock_rows {
            ctx.lock_manager.lock_is_on_table(ctx.txn, self.heap.fd())?;
        } else {
            ctx.lock_manager.lock_ix_on_table(ctx.txn, self.heap.fd())?;
        }
        let (low, high) = self.build_key_window()?;
        let begin = self.tree.lower_bound(&low)?;
        let end = self.tree.upper_bound(&high)?;
        self.scan = Some(IxScan::new(self.tree.clone(), begin, end));
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> MicaResult<Option<Tuple>> {
        let scan = self
            .scan
            .as_mut()
            .ok_or_else(|| MicaError::Internal("scan used before init".to_string()))?;
        while !scan.is_end() {
            let rid = scan.rid()?;
            scan.next()?;
            let data = self.heap.get_record(rid)?;
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
