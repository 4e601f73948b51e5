use std::collections::{HashMap, HashSet};

use crate::catalog::{Catalog, IndexMeta};
use crate::error::MicaResult;
use crate::sql::{AggSpec, CompOp, CondRhs, Condition, SelectStmt, TabCol};

/// A physical access plan: scans at the leaves, joins/sort/projection
/// above them. Executors mirror this shape one-to-one.
#[derive(Debug)]
pub enum PlanNode {
    SeqScan {
        table: String,
        conds: Vec<Condition>,
    },
    IndexScan {
        table: String,
        index: IndexMeta,
        conds: Vec<Condition>,
    },
    Join {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        conds: Vec<Condition>,
    },
    Sort {
        child: Box<PlanNode>,
        keys: Vec<(TabCol, bool)>,
    },
    Project {
        child: Box<PlanNode>,
        cols: Vec<TabCol>,
        aggs: Vec<AggSpec>,
        limit: Option<usize>,
    },
}

/// Rule-based planner: single-table predicates are pushed into the
/// scans, an index scan is chosen whenever a prefix of some index's
/// columns is constrained, joins are left-deep in FROM order.
pub struct Planner<'a> {
    pub catalog: &'a Catalog,
}

impl<'a> Planner<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    pub fn plan_select(&self, stmt: &SelectStmt) -> MicaResult<PlanNode> {
        let mut table_conds: HashMap<String, Vec<Condition>> = HashMap::new();
        let mut cross_conds: Vec<Condition> = Vec::new();
        for cond in &stmt.conds {
            match &cond.rhs {
                CondRhs::Col(rhs) if rhs.table != cond.lhs.table => {
                    cross_conds.push(cond.clone());
                }
                _ => table_conds
                    .entry(cond.lhs.table.clone())
                    .or_default()
                    .push(cond.clone()),
            }
        }

        let mut in_scope: HashSet<String> = HashSet::new();
        let mut node: Option<PlanNode> = None;
        for table in &stmt.tables {
            let scan =
                self.plan_scan(table, table_conds.remove(table).unwrap_or_default())?;
            in_scope.insert(table.clone());
            node = Some(match node {
                None => scan,
                Some(left) => {
                    // Attach every cross-table predicate whose sides are
                    // now both in scope.
                    let (ready, rest): (Vec<Condition>, Vec<Condition>) =
                        cross_conds.into_iter().partition(|cond| {
                            let rhs_table = match &cond.rhs {
                                CondRhs::Col(col) => &col.table,
                                CondRhs::Value(_) => unreachable!("filtered above"),
                            };
                            in_scope.contains(&cond.lhs.table) && in_scope.contains(rhs_table)
                        });
                    cross_conds = rest;
                    PlanNode::Join {
                        left: Box::new(left),
                        right: Box::new(scan),
                        conds: ready,
                    }
                }
            });
        }
        let mut node = node.expect("analyzer guarantees at least one table");

        if !stmt.order_bys.is_empty() {
            node = PlanNode::Sort {
                child: Box::new(node),
                keys: stmt.order_bys.clone(),
            };
        }
        Ok(PlanNode::Project {
            child: Box::new(node),
            cols: stmt.cols.clone(),
            aggs: stmt.aggs.clone(),
            limit: stmt.limit,
        })
    }

    /// Scan choice for one table. An index qualifies when its leading
    /// column is constrained; equality predicates extend the usable
    /// prefix, a range predicate ends it.
    pub fn plan_scan(&self, table: &str, conds: Vec<Condition>) -> MicaResult<PlanNode> {
        let meta = self.catalog.table_meta(table)?;

        let has_value_cond = |col: &str, eq_only: bool| {
            conds.iter().any(|cond| {
                cond.lhs.col == col
                    && matches!(cond.rhs, CondRhs::Value(_))
                    && if eq_only {
                        cond.op == CompOp::Eq
                    } else {
                        matches!(cond.op, CompOp::Lt | CompOp::Gt | CompOp::Le | CompOp::Ge)
                    }
            })
        };

        let mut best: Option<(usize, IndexMeta)> = None;
        for index in &meta.indexes {
            let mut matched = 0usize;
            for col in &index.cols {
                if has_value_cond(&col.name, true) {
                    matched += 1;
                    continue;
                }
                if has_value_cond(&col.name, false) {
                    matched += 1;
                }
                break;
            }
            if matched > 0 && best.as_ref().map_or(true, |(m, _)| matched > *m) {
                best = Some((matched, index.clone()));
            }
        }

        Ok(match best {
            Some((_, index)) => PlanNode::IndexScan {
                table: table.to_string(),
                index,
                conds,
            },
            None => PlanNode::SeqScan {
                table: table.to_string(),
                conds,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPoolManager;
    use crate::catalog::ColType;
    use crate::sql::parser::parse_command;
    use crate::sql::{Analyzer, BoundStatement};
    use crate::storage::DiskManager;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Catalog) {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(DiskManager::new(dir.path()).unwrap());
        let buffer = Arc::new(BufferPoolManager::new(64, disk.clone()));
        let catalog = Catalog::open(disk, buffer, "testdb").unwrap();
        catalog
            .create_table(
                "t",
                vec![
                    ("a".to_string(), ColType::Int, 4),
                    ("b".to_string(), ColType::Char, 4),
                ],
            )
            .unwrap();
        catalog.create_index("t", &["a".to_string()]).unwrap();
        (dir, catalog)
    }

    fn plan(catalog: &Catalog, sql: &str) -> PlanNode {
        let stmt = Analyzer::new(catalog)
            .analyze(parse_command(sql).unwrap())
            .unwrap();
        let BoundStatement::Select(select) = stmt else {
            panic!("expected select");
        };
        Planner::new(catalog).plan_select(&select).unwrap()
    }

    #[test]
    fn indexed_predicate_picks_index_scan() {
        let (_dir, catalog) = setup();
        let node = plan(&catalog, "SELECT a FROM t WHERE a >= 5;");
        let PlanNode::Project { child, .. } = node else {
            panic!("expected projection on top");
        };
        assert!(matches!(*child, PlanNode::IndexScan { .. }));
    }

    #[test]
    fn unindexed_predicate_falls_back_to_seq_scan() {
        let (_dir, catalog) = setup();
        let node = plan(&catalog, "SELECT a FROM t WHERE b = 'x';");
        let PlanNode::Project { child, .. } = node else {
            panic!("expected projection on top");
        };
        assert!(matches!(*child, PlanNode::SeqScan { .. }));
    }

    #[test]
    fn order_by_adds_sort_above_scan() {
        let (_dir, catalog) = setup();
        let node = plan(&catalog, "SELECT a FROM t ORDER BY b;");
        let PlanNode::Project { child, .. } = node else {
            panic!("expected projection on top");
        };
        assert!(matches!(*child, PlanNode::Sort { .. }));
    }
}
