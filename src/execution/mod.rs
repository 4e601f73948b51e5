mod delete;
mod index_scan;
mod insert;
mod nested_loop_join;
mod projection;
mod seq_scan;
mod sort;
mod update;

pub use delete::DeleteExecutor;
pub use index_scan::IndexScanExecutor;
pub use insert::InsertExecutor;
pub use nested_loop_join::NestedLoopJoinExecutor;
pub use projection::ProjectionExecutor;
pub use seq_scan::SeqScanExecutor;
pub use sort::SortExecutor;
pub use update::UpdateExecutor;

use std::cmp::Ordering;

use crate::catalog::data_type::{compare_column, ColType};
use crate::catalog::{Catalog, TableMeta};
use crate::error::{MicaError, MicaResult};
use crate::plan::PlanNode;
use crate::recovery::LogManager;
use crate::sql::{CompOp, CondRhs, Condition, TabCol};
use crate::storage::Rid;
use crate::transaction::{LockManager, Transaction};

/// One column of an executor's output record: identity plus its slice
/// position inside the produced tuple bytes.
#[derive(Debug, Clone)]
pub struct OutputCol {
    pub table: String,
    pub name: String,
    pub col_type: ColType,
    pub len: u32,
    pub offset: u32,
}

/// A produced record: raw fixed-width bytes, plus its heap identity when
/// the tuple still maps to a single table row.
#[derive(Debug, Clone)]
pub struct Tuple {
    pub data: Vec<u8>,
    pub rid: Option<Rid>,
}

/// Shared state threaded through every operator during execution.
pub struct ExecutionContext<'a> {
    pub catalog: &'a Catalog,
    pub txn: &'a mut Transaction,
    pub lock_manager: &'a LockManager,
    pub log_manager: &'a LogManager,
}

pub trait VolcanoExecutor {
    fn init(&mut self, ctx: &mut ExecutionContext) -> MicaResult<()>;

    fn next(&mut self, ctx: &mut ExecutionContext) -> MicaResult<Option<Tuple>>;

    fn output_cols(&self) -> &[OutputCol];

    fn tuple_len(&self) -> u32 {
        self.output_cols()
            .last()
            .map(|c| c.offset + c.len)
            .unwrap_or(0)
    }
}

pub fn table_output_cols(meta: &TableMeta) -> Vec<OutputCol> {
    meta.cols
        .iter()
        .map(|col| OutputCol {
            table: meta.name.clone(),
            name: col.name.clone(),
            col_type: col.col_type,
            len: col.len,
            offset: col.offset,
        })
        .collect()
}

pub fn find_col<'c>(cols: &'c [OutputCol], target: &TabCol) -> MicaResult<&'c OutputCol> {
    cols.iter()
        .find(|c| c.table == target.table && c.name == target.col)
        .ok_or_else(|| MicaError::ColumnNotFound(format!("{}.{}", target.table, target.col)))
}

fn col_slice<'d>(col: &OutputCol, data: &'d [u8]) -> &'d [u8] {
    &data[col.offset as usize..(col.offset + col.len) as usize]
}

fn ordering_matches(op: CompOp, ord: Ordering) -> bool {
    match op {
        CompOp::Eq => ord == Ordering::Equal,
        CompOp::Ne => ord != Ordering::Equal,
        CompOp::Lt => ord == Ordering::Less,
        CompOp::Gt => ord == Ordering::Greater,
        CompOp::Le => ord != Ordering::Greater,
        CompOp::Ge => ord != Ordering::Less,
    }
}

fn trim_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    &bytes[..end]
}

fn eval_cond(cols: &[OutputCol], cond: &Condition, data: &[u8]) -> MicaResult<bool> {
    let lhs_col = find_col(cols, &cond.lhs)?;
    let lhs = col_slice(lhs_col, data);
    let ord = match &cond.rhs {
        CondRhs::Value(value) => {
            let widened = value.widen_to(lhs_col.col_type)?;
            let rhs = widened.encode(lhs_col.len)?;
            compare_column(lhs, &rhs, lhs_col.col_type)
        }
        CondRhs::Col(target) => {
            let rhs_col = find_col(cols, target)?;
            if rhs_col.col_type != lhs_col.col_type {
                return Err(MicaError::IncompatibleType {
                    expected: lhs_col.col_type.name().to_string(),
                    actual: rhs_col.col_type.name().to_string(),
                });
            }
            let rhs = col_slice(rhs_col, data);
            if matches!(lhs_col.col_type, ColType::Char | ColType::Datetime) {
                // Columns of different widths compare without padding.
                trim_padding(lhs).cmp(trim_padding(rhs))
            } else {
                compare_column(lhs, rhs, lhs_col.col_type)
            }
        }
    };
    Ok(ordering_matches(cond.op, ord))
}

/// Conjunctive predicate evaluation over a produced tuple.
pub fn eval_conds(cols: &[OutputCol], conds: &[Condition], data: &[u8]) -> MicaResult<bool> {
    for cond in conds {
        if !eval_cond(cols, cond, data)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Build the executor tree mirroring a plan. `for_update` scans take IX
/// table locks and leave row locking to the owning DML executor.
pub fn build_executor(
    catalog: &Catalog,
    plan: &PlanNode,
    for_update: bool,
) -> MicaResult<Box<dyn VolcanoExecutor>> {
    match plan {
        PlanNode::SeqScan { table, conds } => Ok(Box::new(SeqScanExecutor::new(
            catalog,
            table,
            conds.clone(),
            !for_update,
        )?)),
        PlanNode::IndexScan {
            table,
            index,
            conds,
        } => Ok(Box::new(IndexScanExecutor::new(
            catalog,
            table,
            index.clone(),
            conds.clone(),
            !for_update,
        )?)),
        PlanNode::Join { left, right, conds } => {
            let left = build_executor(catalog, left, for_update)?;
            let right = build_executor(catalog, right, for_update)?;
            Ok(Box::new(NestedLoopJoinExecutor::new(
                left,
                right,
                conds.clone(),
            )))
        }
        PlanNode::Sort { child, keys } => {
            let child = build_executor(catalog, child, for_update)?;
            Ok(Box::new(SortExecutor::new(child, keys)?))
        }
        PlanNode::Project {
            child,
            cols,
            aggs,
            limit,
        } => {
            let child = build_executor(catalog, child, for_update)?;
            Ok(Box::new(ProjectionExecutor::new(
                child,
                cols,
                aggs.clone(),
                *limit,
            )?))
        }
    }
}

/// Drives an executor tree to completion, volcano style.
pub struct ExecutionEngine;

impl ExecutionEngine {
    pub fn execute(
        executor: &mut dyn VolcanoExecutor,
        ctx: &mut ExecutionContext,
    ) -> MicaResult<Vec<Tuple>> {
        executor.init(ctx)?;
        let mut result = Vec::new();
        while let Some(tuple) = executor.next(ctx)? {
            result.push(tuple);
        }
        Ok(result)
    }
}
