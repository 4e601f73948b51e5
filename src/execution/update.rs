use std::sync::Arc;

use crate::catalog::data_type::{ColType, Value};
use crate::catalog::{Catalog, IndexMeta, TableMeta};
use crate::error::{MicaError, MicaResult};
use crate::execution::{ExecutionContext, OutputCol, Tuple, VolcanoExecutor};
use crate::index::BPlusTree;
use crate::recovery::LogRecordBody;
use crate::storage::{HeapFile, Rid};
use crate::sql::SetClause;
use crate::transaction::WriteRecord;

/// Update matching rows in place. For each collected rid: X lock, build
/// the after-image (assignment or `col = col + v`), check uniqueness on
/// the index keys that actually change, swap the entries, overwrite the
/// heap slot, and record before/after images for undo and redo.
pub struct UpdateExecutor {
    table: String,
    meta: TableMeta,
    heap: Arc<HeapFile>,
    indexes: Vec<(IndexMeta, Arc<BPlusTree>)>,
    sets: Vec<SetClause>,
    child: Box<dyn VolcanoExecutor>,
    done: bool,
}

impl UpdateExecutor {
    pub fn new(
        catalog: &Catalog,
        table: &str,
        sets: Vec<SetClause>,
        child: Box<dyn VolcanoExecutor>,
    ) -> MicaResult<Self> {
        Ok(Self {
            table: table.to_string(),
            meta: catalog.table_meta(table)?,
            heap: catalog.heap(table)?,
            indexes: catalog.table_indexes(table)?,
            sets,
            child,
            done: false,
        })
    }

    fn apply_sets(&self, old_record: &[u8]) -> MicaResult<Vec<u8>> {
        let mut record = old_record.to_vec();
        for set in &self.sets {
            let col = self.meta.get_col(&set.col)?;
            let range = col.offset as usize..(col.offset + col.len) as usize;
            let new_value = if set.is_increment {
                let current = Value::decode(&old_record[range.clone()], col.col_type);
                let delta = set.value.widen_to(col.col_type)?;
                add_values(&current, &delta, col.col_type)?
            } else {
                set.value.widen_to(col.col_type)?
            };
            record[range].copy_from_slice(&new_value.encode(col.len)?);
        }
        Ok(record)
    }
}

fn add_values(current: &Value, delta: &Value, col_type: ColType) -> MicaResult<Value> {
    match (current, delta, col_type) {
        (Value::Int(a), Value::Int(b), ColType::Int) => Ok(Value::Int(a.wrapping_add(*b))),
        (Value::BigInt(a), Value::BigInt(b), ColType::BigInt) => {
            Ok(Value::BigInt(a.wrapping_add(*b)))
        }
        (Value::Float(a), Value::Float(b), ColType::Float) => Ok(Value::Float(a + b)),
        _ => Err(MicaError::IncompatibleType {
            expected: "a numeric column".to_string(),
            actual: col_type.name().to_string(),
        }),
    }
}

impl VolcanoExecutor for UpdateExecutor {
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
                .ok_or_else(|| MicaError::Internal("update child lost the rid".to_string()))?;
            rids.push(rid);
        }

        for rid in rids {
            ctx.lock_manager
                .lock_exclusive_on_record(ctx.txn, self.heap.fd(), rid)?;
            let old_record = self.heap.get_record(rid)?;
            let new_record = self.apply_sets(&old_record)?;

            // Uniqueness on changed keys only, settled before any index
            // is touched.
            for (index_meta, tree) in &self.indexes {
                let old_key = index_meta.build_key(&old_record);
                let new_key = index_meta.build_key(&new_record);
                if old_key != new_key && tree.contains(&new_key)? {
                    return Err(MicaError::UniqueConstraint);
                }
            }

            for (index_meta, tree) in &self.indexes {
                let old_key = index_meta.build_key(&old_record);
                let new_key = index_meta.build_key(&new_record);
                if old_key != new_key {
                    tree.delete_entry(&old_key)?;
                    tree.insert_entry(&new_key, rid)?;
                }
            }
            self.heap.update_record(rid, &new_record)?;

            ctx.txn.append_write_record(WriteRecord::Update {
                table: self.table.clone(),
                rid,
                old_record: old_record.clone(),
            });
            let lsn = ctx.log_manager.append(
                ctx.txn.id(),
                ctx.txn.prev_lsn(),
                LogRecordBody::Update {
                    table: self.table.clone(),
                    rid,
                    old_record,
                    new_record,
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
