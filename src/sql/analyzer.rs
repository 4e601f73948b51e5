use sqlparser::ast;

use crate::catalog::data_type::{ColType, Value, DATETIME_LEN};
use crate::catalog::Catalog;
use crate::error::{MicaError, MicaResult};
use crate::sql::parser::Command;

/// A fully qualified column reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabCol {
    pub table: String,
    pub col: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompOp {
    /// The operator after swapping operand sides.
    pub fn swap(self) -> CompOp {
        match self {
            CompOp::Eq => CompOp::Eq,
            CompOp::Ne => CompOp::Ne,
            CompOp::Lt => CompOp::Gt,
            CompOp::Gt => CompOp::Lt,
            CompOp::Le => CompOp::Ge,
            CompOp::Ge => CompOp::Le,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CondRhs {
    Value(Value),
    Col(TabCol),
}

/// One conjunct of a WHERE clause, normalised column-on-the-left.
#[derive(Debug, Clone)]
pub struct Condition {
    pub lhs: TabCol,
    pub op: CompOp,
    pub rhs: CondRhs,
}

/// `SET col = value` or the arithmetic form `SET col = col + value`.
#[derive(Debug, Clone)]
pub struct SetClause {
    pub col: String,
    pub value: Value,
    pub is_increment: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Max,
    Min,
}

#[derive(Debug, Clone)]
pub struct AggSpec {
    pub func: AggFunc,
    /// None for COUNT(*).
    pub col: Option<TabCol>,
    pub alias: String,
}

#[derive(Debug, Clone)]
pub struct SelectStmt {
    pub tables: Vec<String>,
    /// Selected columns; empty means every column of every table.
    pub cols: Vec<TabCol>,
    /// Non-empty turns the statement into a single-row aggregate query.
    pub aggs: Vec<AggSpec>,
    pub conds: Vec<Condition>,
    pub order_bys: Vec<(TabCol, bool)>,
    pub limit: Option<usize>,
}

#[derive(Debug)]
pub enum BoundStatement {
    CreateTable {
        name: String,
        cols: Vec<(String, ColType, u32)>,
    },
    DropTable {
        name: String,
    },
    CreateIndex {
        table: String,
        cols: Vec<String>,
    },
    DropIndex {
        table: String,
        cols: Vec<String>,
    },
    ShowTables,
    ShowIndex {
        table: String,
    },
    Desc {
        table: String,
    },
    Help,
    Insert {
        table: String,
        values: Vec<Value>,
    },
    Delete {
        table: String,
        conds: Vec<Condition>,
    },
    Update {
        table: String,
        sets: Vec<SetClause>,
        conds: Vec<Condition>,
    },
    Select(SelectStmt),
    Begin,
    Commit,
    Abort,
    Load {
        path: String,
        table: String,
    },
}

/// Resolves names against the catalog and lowers the parser output into
/// typed, fully qualified statements.
pub struct Analyzer<'a> {
    catalog: &'a Catalog,
}

impl<'a> Analyzer<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    pub fn analyze(&self, command: Command) -> MicaResult<BoundStatement> {
        match command {
            Command::ShowTables => Ok(BoundStatement::ShowTables),
            Command::ShowIndex { table } => {
                self.check_table(&table)?;
                Ok(BoundStatement::ShowIndex { table })
            }
            Command::Desc { table } => {
                self.check_table(&table)?;
                Ok(BoundStatement::Desc { table })
            }
            Command::CreateIndex { table, cols } => {
                self.check_table(&table)?;
                Ok(BoundStatement::CreateIndex { table, cols })
            }
            Command::DropIndex { table, cols } => {
                self.check_table(&table)?;
                Ok(BoundStatement::DropIndex { table, cols })
            }
            Command::Begin => Ok(BoundStatement::Begin),
            Command::Commit => Ok(BoundStatement::Commit),
            Command::Abort => Ok(BoundStatement::Abort),
            Command::Help => Ok(BoundStatement::Help),
            Command::Load { path, table } => {
                self.check_table(&table)?;
                Ok(BoundStatement::Load { path, table })
            }
            Command::Sql(statement) => self.analyze_statement(statement),
        }
    }

    fn check_table(&self, table: &str) -> MicaResult<()> {
        if !self.catalog.has_table(table) {
            return Err(MicaError::TableNotFound(table.to_string()));
        }
        Ok(())
    }

    fn analyze_statement(&self, statement: ast::Statement) -> MicaResult<BoundStatement> {
        match statement {
            ast::Statement::CreateTable { name, columns, .. } => {
                self.analyze_create_table(&name, &columns)
            }
            ast::Statement::CreateIndex {
                table_name,
                columns,
                ..
            } => {
                let table = object_name(&table_name)?;
                self.check_table(&table)?;
                let cols = columns
                    .iter()
                    .map(|order_expr| match &order_expr.expr {
                        ast::Expr::Identifier(ident) => Ok(ident.value.clone()),
                        other => Err(MicaError::Internal(format!(
                            "unsupported index column expression: {other}"
                        ))),
                    })
                    .collect::<MicaResult<Vec<String>>>()?;
                Ok(BoundStatement::CreateIndex { table, cols })
            }
            ast::Statement::Drop {
                object_type, names, ..
            } => {
                if object_type != ast::ObjectType::Table {
                    return Err(MicaError::Internal(format!(
                        "unsupported DROP target: {object_type}"
                    )));
                }
                let name = names
                    .first()
                    .ok_or_else(|| MicaError::Internal("DROP without a name".to_string()))?;
                let table = object_name(name)?;
                self.check_table(&table)?;
                Ok(BoundStatement::DropTable { name: table })
            }
            ast::Statement::Insert {
                table_name, source, ..
            } => self.analyze_insert(&table_name, source.as_deref()),
            ast::Statement::Delete {
                from, selection, ..
            } => {
                let table = table_from_joins(&from)?;
                self.check_table(&table)?;
                let conds = self.bind_conditions(&[table.clone()], selection.as_ref())?;
                Ok(BoundStatement::Delete { table, conds })
            }
            ast::Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => self.analyze_update(&table, &assignments, selection.as_ref()),
            ast::Statement::Query(query) => self.analyze_query(&query),
            ast::Statement::StartTransaction { .. } => Ok(BoundStatement::Begin),
            ast::Statement::Commit { .. } => Ok(BoundStatement::Commit),
            ast::Statement::Rollback { .. } => Ok(BoundStatement::Abort),
            ast::Statement::ShowTables { .. } => Ok(BoundStatement::ShowTables),
            other => Err(MicaError::Internal(format!(
                "unsupported statement: {other}"
            ))),
        }
    }

    fn analyze_create_table(
        &self,
        name: &ast::ObjectName,
        columns: &[ast::ColumnDef],
    ) -> MicaResult<BoundStatement> {
        let table = object_name(name)?;
        let mut cols = Vec::with_capacity(columns.len());
        for def in columns {
            let (col_type, len) = bind_data_type(&def.data_type)?;
            cols.push((def.name.value.clone(), col_type, len));
        }
        Ok(BoundStatement::CreateTable { name: table, cols })
    }

    fn analyze_insert(
        &self,
        table_name: &ast::ObjectName,
        source: Option<&ast::Query>,
    ) -> MicaResult<BoundStatement> {
        let table = object_name(table_name)?;
        let meta = self.catalog.table_meta(&table)?;
        let source =
            source.ok_or_else(|| MicaError::Internal("INSERT without VALUES".to_string()))?;
        let ast::SetExpr::Values(values) = source.body.as_ref() else {
            return Err(MicaError::Internal(
                "only INSERT ... VALUES is supported".to_string(),
            ));
        };
        let row = values
            .rows
            .first()
            .ok_or_else(|| MicaError::Internal("empty VALUES".to_string()))?;
        if values.rows.len() != 1 {
            return Err(MicaError::Internal(
                "multi-row INSERT is not supported".to_string(),
            ));
        }
        if row.len() != meta.cols.len() {
            return Err(MicaError::InvalidValueCount);
        }
        let bound = row
            .iter()
            .map(bind_literal)
            .collect::<MicaResult<Vec<Value>>>()?;
        Ok(BoundStatement::Insert {
            table,
            values: bound,
        })
    }

    fn analyze_update(
        &self,
        table: &ast::TableWithJoins,
        assignments: &[ast::Assignment],
        selection: Option<&ast::Expr>,
    ) -> MicaResult<BoundStatement> {
        let table = table_factor_name(&table.relation)?;
        let meta = self.catalog.table_meta(&table)?;

        let mut sets = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let col = assignment
                .id
                .last()
                .ok_or_else(|| MicaError::Internal("SET without a column".to_string()))?
                .value
                .clone();
            if !meta.has_col(&col) {
                return Err(MicaError::ColumnNotFound(col));
            }
            match &assignment.value {
                // col = col + value / col = col - value
                ast::Expr::BinaryOp { left, op, right }
                    if matches!(op, ast::BinaryOperator::Plus | ast::BinaryOperator::Minus) =>
                {
                    let ast::Expr::Identifier(lhs_ident) = left.as_ref() else {
                        return Err(MicaError::Internal(
                            "unsupported SET expression".to_string(),
                        ));
                    };
                    if lhs_ident.value != col {
                        return Err(MicaError::Internal(
                            "SET expression must reference its own column".to_string(),
                        ));
                    }
                    let mut value = bind_literal(right)?;
                    if *op == ast::BinaryOperator::Minus {
                        value = negate(value)?;
                    }
                    sets.push(SetClause {
                        col,
                        value,
                        is_increment: true,
                    });
                }
                expr => {
                    sets.push(SetClause {
                        col,
                        value: bind_literal(expr)?,
                        is_increment: false,
                    });
                }
            }
        }

        let conds = self.bind_conditions(&[table.clone()], selection)?;
        Ok(BoundStatement::Update { table, sets, conds })
    }

    fn analyze_query(&self, query: &ast::Query) -> MicaResult<BoundStatement> {
        let ast::SetExpr::Select(select) = query.body.as_ref() else {
            return Err(MicaError::Internal(
                "only plain SELECT queries are supported".to_string(),
            ));
        };

        let mut tables = Vec::new();
        for table_with_joins in &select.from {
            if !table_with_joins.joins.is_empty() {
                return Err(MicaError::Internal(
                    "explicit JOIN syntax is not supported; list tables in FROM".to_string(),
                ));
            }
            let table = table_factor_name(&table_with_joins.relation)?;
            self.check_table(&table)?;
            tables.push(table);
        }
        if tables.is_empty() {
            return Err(MicaError::Internal("SELECT without FROM".to_string()));
        }

        let mut cols = Vec::new();
        let mut aggs = Vec::new();
        for item in &select.projection {
            match item {
                ast::SelectItem::Wildcard(_) => {}
                ast::SelectItem::UnnamedExpr(expr) => match expr {
                    ast::Expr::Function(func) => {
                        aggs.push(self.bind_aggregate(&tables, func, None)?)
                    }
                    _ => cols.push(self.bind_column_expr(&tables, expr)?),
                },
                ast::SelectItem::ExprWithAlias { expr, alias } => match expr {
                    ast::Expr::Function(func) => {
                        aggs.push(self.bind_aggregate(&tables, func, Some(alias.value.clone()))?)
                    }
                    _ => {
                        return Err(MicaError::Internal(
                            "column aliases are only supported on aggregates".to_string(),
                        ))
                    }
                },
                other => {
                    return Err(MicaError::Internal(format!(
                        "unsupported select item: {other}"
                    )))
                }
            }
        }
        if !aggs.is_empty() && !cols.is_empty() {
            return Err(MicaError::Internal(
                "cannot mix aggregates and plain columns".to_string(),
            ));
        }

        let conds = self.bind_conditions(&tables, select.selection.as_ref())?;

        let mut order_bys = Vec::new();
        for order in &query.order_by {
            let col = self.bind_column_expr(&tables, &order.expr)?;
            order_bys.push((col, order.asc.unwrap_or(true)));
        }

        let limit = match &query.limit {
            Some(expr) => match bind_literal(expr)? {
                Value::Int(n) if n >= 0 => Some(n as usize),
                Value::BigInt(n) if n >= 0 => Some(n as usize),
                other => {
                    return Err(MicaError::Internal(format!(
                        "invalid LIMIT value: {other}"
                    )))
                }
            },
            None => None,
        };

        Ok(BoundStatement::Select(SelectStmt {
            tables,
            cols,
            aggs,
            conds,
            order_bys,
            limit,
        }))
    }

    fn bind_aggregate(
        &self,
        tables: &[String],
        func: &ast::Function,
        alias: Option<String>,
    ) -> MicaResult<AggSpec> {
        let name = func.name.to_string().to_ascii_uppercase();
        let agg = match name.as_str() {
            "COUNT" => AggFunc::Count,
            "SUM" => AggFunc::Sum,
            "MAX" => AggFunc::Max,
            "MIN" => AggFunc::Min,
            other => {
                return Err(MicaError::Internal(format!(
                    "unsupported aggregate: {other}"
                )))
            }
        };
        let col = match func.args.first() {
            Some(ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Wildcard)) => {
                if agg != AggFunc::Count {
                    return Err(MicaError::Internal(format!("{name}(*) is not supported")));
                }
                None
            }
            Some(ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(expr))) => {
                Some(self.bind_column_expr(tables, expr)?)
            }
            _ => {
                return Err(MicaError::Internal(format!(
                    "unsupported aggregate argument in {name}"
                )))
            }
        };
        let alias = alias.unwrap_or_else(|| name.to_ascii_lowercase());
        Ok(AggSpec {
            func: agg,
            col,
            alias,
        })
    }

    /// Resolve a bare or qualified column against the statement's tables,
    /// surfacing ambiguity instead of guessing.
    fn resolve_column(
        &self,
        tables: &[String],
        qualifier: Option<&str>,
        col: &str,
    ) -> MicaResult<TabCol> {
        if let Some(table) = qualifier {
            if !tables.iter().any(|t| t == table) {
                return Err(MicaError::TableNotFound(table.to_string()));
            }
            let meta = self.catalog.table_meta(table)?;
            if !meta.has_col(col) {
                return Err(MicaError::ColumnNotFound(col.to_string()));
            }
            return Ok(TabCol {
                table: table.to_string(),
                col: col.to_string(),
            });
        }

        let mut owner: Option<String> = None;
        for table in tables {
            if self.catalog.table_meta(table)?.has_col(col) {
                if owner.is_some() {
                    return Err(MicaError::AmbiguousColumn(col.to_string()));
                }
                owner = Some(table.clone());
            }
        }
        match owner {
            Some(table) => Ok(TabCol {
                table,
                col: col.to_string(),
            }),
            None => Err(MicaError::ColumnNotFound(col.to_string())),
        }
    }

    fn bind_column_expr(&self, tables: &[String], expr: &ast::Expr) -> MicaResult<TabCol> {
        match expr {
            ast::Expr::Identifier(ident) => self.resolve_column(tables, None, &ident.value),
            ast::Expr::CompoundIdentifier(parts) if parts.len() == 2 => {
                self.resolve_column(tables, Some(&parts[0].value), &parts[1].value)
            }
            other => Err(MicaError::Internal(format!(
                "unsupported column expression: {other}"
            ))),
        }
    }

    /// Flatten a conjunctive WHERE clause into normalised conditions.
    fn bind_conditions(
        &self,
        tables: &[String],
        selection: Option<&ast::Expr>,
    ) -> MicaResult<Vec<Condition>> {
        let mut conds = Vec::new();
        if let Some(expr) = selection {
            self.collect_conditions(tables, expr, &mut conds)?;
        }
        Ok(conds)
    }

    fn collect_conditions(
        &self,
        tables: &[String],
        expr: &ast::Expr,
        out: &mut Vec<Condition>,
    ) -> MicaResult<()> {
        match expr {
            ast::Expr::BinaryOp { left, op, right } if *op == ast::BinaryOperator::And => {
                self.collect_conditions(tables, left, out)?;
                self.collect_conditions(tables, right, out)
            }
            ast::Expr::BinaryOp { left, op, right } => {
                let comp = bind_comp_op(op)?;
                let lhs_col = self.try_bind_column(tables, left)?;
                let rhs_col = self.try_bind_column(tables, right)?;
                let cond = match (lhs_col, rhs_col) {
                    (Some(lhs), Some(rhs)) => Condition {
                        lhs,
                        op: comp,
                        rhs: CondRhs::Col(rhs),
                    },
                    (Some(lhs), None) => Condition {
                        lhs,
                        op: comp,
                        rhs: CondRhs::Value(bind_literal(right)?),
                    },
                    // Value on the left: swap so the column leads.
                    (None, Some(rhs)) => Condition {
                        lhs: rhs,
                        op: comp.swap(),
                        rhs: CondRhs::Value(bind_literal(left)?),
                    },
                    (None, None) => {
                        return Err(MicaError::Internal(
                            "conditions must reference a column".to_string(),
                        ))
                    }
                };
                out.push(cond);
                Ok(())
            }
            ast::Expr::Nested(inner) => self.collect_conditions(tables, inner, out),
            other => Err(MicaError::Internal(format!(
                "unsupported WHERE clause: {other}"
            ))),
        }
    }

    fn try_bind_column(
        &self,
        tables: &[String],
        expr: &ast::Expr,
    ) -> MicaResult<Option<TabCol>> {
        match expr {
            ast::Expr::Identifier(_) | ast::Expr::CompoundIdentifier(_) => {
                self.bind_column_expr(tables, expr).map(Some)
            }
            _ => Ok(None),
        }
    }
}

fn object_name(name: &ast::ObjectName) -> MicaResult<String> {
    match name.0.as_slice() {
        [table] => Ok(table.value.clone()),
        _ => Err(MicaError::Internal(format!(
            "qualified table names are not supported: {name}"
        ))),
    }
}

fn table_factor_name(factor: &ast::TableFactor) -> MicaResult<String> {
    match factor {
        ast::TableFactor::Table { name, .. } => object_name(name),
        other => Err(MicaError::Internal(format!(
            "unsupported table factor: {other}"
        ))),
    }
}

fn table_from_joins(from: &[ast::TableWithJoins]) -> MicaResult<String> {
    let first = from
        .first()
        .ok_or_else(|| MicaError::Internal("statement without a table".to_string()))?;
    if from.len() != 1 || !first.joins.is_empty() {
        return Err(MicaError::Internal(
            "exactly one target table is supported".to_string(),
        ));
    }
    table_factor_name(&first.relation)
}

fn bind_data_type(data_type: &ast::DataType) -> MicaResult<(ColType, u32)> {
    match data_type {
        ast::DataType::Int(_) | ast::DataType::Integer(_) => Ok((ColType::Int, 4)),
        ast::DataType::BigInt(_) => Ok((ColType::BigInt, 8)),
        ast::DataType::Float(_) | ast::DataType::Real => Ok((ColType::Float, 4)),
        ast::DataType::Char(len) | ast::DataType::Character(len) => {
            let n = len
                .as_ref()
                .map(|l| match l {
                    ast::CharacterLength::IntegerLength { length, .. } => *length,
                    ast::CharacterLength::Max => 1,
                })
                .unwrap_or(1) as u32;
            Ok((ColType::Char, n.max(1)))
        }
        ast::DataType::Datetime(_) => Ok((ColType::Datetime, DATETIME_LEN)),
        other => Err(MicaError::Internal(format!(
            "unsupported column type: {other}"
        ))),
    }
}

fn bind_comp_op(op: &ast::BinaryOperator) -> MicaResult<CompOp> {
    match op {
        ast::BinaryOperator::Eq => Ok(CompOp::Eq),
        ast::BinaryOperator::NotEq => Ok(CompOp::Ne),
        ast::BinaryOperator::Lt => Ok(CompOp::Lt),
        ast::BinaryOperator::Gt => Ok(CompOp::Gt),
        ast::BinaryOperator::LtEq => Ok(CompOp::Le),
        ast::BinaryOperator::GtEq => Ok(CompOp::Ge),
        other => Err(MicaError::Internal(format!(
            "unsupported comparison operator: {other}"
        ))),
    }
}

/// Literal binding: integers that fit stay INT, wider ones become
/// BIGINT, decimals become FLOAT, strings stay CHAR until a DATETIME
/// column claims them.
pub fn bind_literal(expr: &ast::Expr) -> MicaResult<Value> {
    match expr {
        ast::Expr::Value(ast::Value::Number(text, _)) => {
            if !text.contains('.') && !text.contains(['e', 'E']) {
                if let Ok(n) = text.parse::<i32>() {
                    return Ok(Value::Int(n));
                }
                if let Ok(n) = text.parse::<i64>() {
                    return Ok(Value::BigInt(n));
                }
            }
            text.parse::<f32>().map(Value::Float).map_err(|_| {
                MicaError::Internal(format!("failed to parse number literal: {text}"))
            })
        }
        ast::Expr::Value(ast::Value::SingleQuotedString(s)) => Ok(Value::Str(s.clone())),
        ast::Expr::UnaryOp {
            op: ast::UnaryOperator::Minus,
            expr,
        } => negate(bind_literal(expr)?),
        other => Err(MicaError::Internal(format!(
            "unsupported literal: {other}"
        ))),
    }
}

fn negate(value: Value) -> MicaResult<Value> {
    match value {
        Value::Int(v) => Ok(Value::Int(-v)),
        Value::BigInt(v) => Ok(Value::BigInt(-v)),
        Value::Float(v) => Ok(Value::Float(-v)),
        other => Err(MicaError::IncompatibleType {
            expected: "a numeric value".to_string(),
            actual: other.col_type().name().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPoolManager;
    use crate::sql::parser::parse_command;
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
        catalog
            .create_table(
                "u",
                vec![
                    ("a".to_string(), ColType::Int, 4),
                    ("c".to_string(), ColType::Float, 4),
                ],
            )
            .unwrap();
        (dir, catalog)
    }

    fn analyze(catalog: &Catalog, sql: &str) -> MicaResult<BoundStatement> {
        Analyzer::new(catalog).analyze(parse_command(sql)?)
    }

    #[test]
    fn create_table_types() {
        let (_dir, catalog) = setup();
        let stmt = analyze(
            &catalog,
            "CREATE TABLE w (x INT, y BIGINT, z FLOAT, s CHAR(8), d DATETIME);",
        )
        .unwrap();
        match stmt {
            BoundStatement::CreateTable { name, cols } => {
                assert_eq!(name, "w");
                assert_eq!(cols[0], ("x".to_string(), ColType::Int, 4));
                assert_eq!(cols[1], ("y".to_string(), ColType::BigInt, 8));
                assert_eq!(cols[2], ("z".to_string(), ColType::Float, 4));
                assert_eq!(cols[3], ("s".to_string(), ColType::Char, 8));
                assert_eq!(cols[4], ("d".to_string(), ColType::Datetime, DATETIME_LEN));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn insert_value_count_checked() {
        let (_dir, catalog) = setup();
        assert!(matches!(
            analyze(&catalog, "INSERT INTO t VALUES (1);"),
            Err(MicaError::InvalidValueCount)
        ));
        match analyze(&catalog, "INSERT INTO t VALUES (1, 'ab');").unwrap() {
            BoundStatement::Insert { values, .. } => {
                assert_eq!(values[0], Value::Int(1));
                assert_eq!(values[1], Value::Str("ab".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn where_clause_normalises_value_on_left() {
        let (_dir, catalog) = setup();
        match analyze(&catalog, "SELECT b FROM t WHERE 3 < a AND b = 'x';").unwrap() {
            BoundStatement::Select(select) => {
                assert_eq!(select.conds.len(), 2);
                assert_eq!(select.conds[0].lhs.col, "a");
                assert_eq!(select.conds[0].op, CompOp::Gt);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ambiguous_and_missing_columns() {
        let (_dir, catalog) = setup();
        assert!(matches!(
            analyze(&catalog, "SELECT a FROM t, u;"),
            Err(MicaError::AmbiguousColumn(_))
        ));
        assert!(matches!(
            analyze(&catalog, "SELECT nosuch FROM t;"),
            Err(MicaError::ColumnNotFound(_))
        ));
        assert!(matches!(
            analyze(&catalog, "SELECT a FROM missing;"),
            Err(MicaError::TableNotFound(_))
        ));
        // Qualified reference resolves the ambiguity.
        assert!(analyze(&catalog, "SELECT t.a FROM t, u;").is_ok());
    }

    #[test]
    fn aggregates_with_alias() {
        let (_dir, catalog) = setup();
        match analyze(&catalog, "SELECT COUNT(*) AS n, MAX(a) AS m FROM t;").unwrap() {
            BoundStatement::Select(select) => {
                assert_eq!(select.aggs.len(), 2);
                assert_eq!(select.aggs[0].func, AggFunc::Count);
                assert!(select.aggs[0].col.is_none());
                assert_eq!(select.aggs[0].alias, "n");
                assert_eq!(select.aggs[1].func, AggFunc::Max);
                assert_eq!(select.aggs[1].alias, "m");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn update_set_expression() {
        let (_dir, catalog) = setup();
        match analyze(&catalog, "UPDATE t SET a = a + 2 WHERE b = 'x';").unwrap() {
            BoundStatement::Update { sets, conds, .. } => {
                assert!(sets[0].is_increment);
                assert_eq!(sets[0].value, Value::Int(2));
                assert_eq!(conds.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        match analyze(&catalog, "UPDATE t SET a = a - 2;").unwrap() {
            BoundStatement::Update { sets, .. } => {
                assert!(sets[0].is_increment);
                assert_eq!(sets[0].value, Value::Int(-2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn order_by_and_limit() {
        let (_dir, catalog) = setup();
        match analyze(&catalog, "SELECT a FROM t ORDER BY a DESC, b LIMIT 10;").unwrap() {
            BoundStatement::Select(select) => {
                assert_eq!(select.order_bys.len(), 2);
                assert!(!select.order_bys[0].1);
                assert!(select.order_bys[1].1);
                assert_eq!(select.limit, Some(10));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
