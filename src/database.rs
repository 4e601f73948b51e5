use log::{error, info};
use std::path::Path;
use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::catalog::data_type::{ColType, Value};
use crate::catalog::Catalog;
use crate::config::BUFFER_POOL_SIZE;
use crate::error::{MicaError, MicaResult};
use crate::execution::{
    build_executor, DeleteExecutor, ExecutionContext, ExecutionEngine, InsertExecutor,
    UpdateExecutor, VolcanoExecutor,
};
use crate::plan::Planner;
use crate::recovery::{LogManager, RecoveryManager};
use crate::sql::{parse_command, Analyzer, BoundStatement};
use crate::storage::DiskManager;
use crate::transaction::{LockManager, Transaction, TransactionManager};

const HELP_TEXT: &str = "\
supported statements:
  CREATE TABLE t (col TYPE, ...);      TYPE: INT BIGINT FLOAT CHAR(n) DATETIME
  DROP TABLE t;
  CREATE INDEX t(col, ...);            DROP INDEX t(col, ...);
  SHOW TABLES;  SHOW INDEX FROM t;  DESC t;
  INSERT INTO t VALUES (...);
  DELETE FROM t [WHERE ...];
  UPDATE t SET col = val [WHERE ...];
  SELECT [cols|*|aggs] FROM t [, t2 ...] [WHERE ...] [ORDER BY ...] [LIMIT n];
  BEGIN; COMMIT; ABORT; ROLLBACK;
  LOAD <path> INTO <table>;
  HELP; EXIT;";

/// Per-connection state: at most one open explicit transaction.
#[derive(Default)]
pub struct Session {
    txn: Option<Transaction>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    pub fn take_txn(&mut self) -> Option<Transaction> {
        self.txn.take()
    }
}

/// What a statement produced: a result table and/or a short message.
#[derive(Debug, Default)]
pub struct QueryResult {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub message: Option<String>,
}

impl QueryResult {
    fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    fn with_rows(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            headers,
            rows,
            message: None,
        }
    }
}

/// The whole engine wired together: disk, buffer pool, log, catalog,
/// locks and transactions. Opening a database directory runs recovery
/// before anything else touches the files.
pub struct Database {
    disk: Arc<DiskManager>,
    buffer: Arc<BufferPoolManager>,
    catalog: Arc<Catalog>,
    lock_manager: Arc<LockManager>,
    log_manager: Arc<LogManager>,
    txn_manager: Arc<TransactionManager>,
}

impl Database {
    pub fn open(db_dir: impl AsRef<Path>) -> MicaResult<Database> {
        let db_dir = db_dir.as_ref();
        let db_name = db_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "db".to_string());

        let disk = Arc::new(DiskManager::new(db_dir)?);
        let buffer = Arc::new(BufferPoolManager::new(BUFFER_POOL_SIZE, disk.clone()));
        let log_manager = Arc::new(LogManager::new(disk.clone()));
        buffer.set_log_manager(log_manager.clone());
        let catalog = Arc::new(Catalog::open(disk.clone(), buffer.clone(), &db_name)?);

        let recovery = RecoveryManager::new(disk.clone(), catalog.clone(), log_manager.clone());
        let max_txn_id = recovery.max_txn_id()?;
        recovery.recover()?;

        let lock_manager = Arc::new(LockManager::new());
        let txn_manager = Arc::new(TransactionManager::new(
            lock_manager.clone(),
            log_manager.clone(),
        ));
        txn_manager.resume_txn_ids_after(max_txn_id);

        info!("database '{db_name}' is open");
        Ok(Database {
            disk,
            buffer,
            catalog,
            lock_manager,
            log_manager,
            txn_manager,
        })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn db_dir(&self) -> &Path {
        self.disk.db_dir()
    }

    pub fn txn_manager(&self) -> &Arc<TransactionManager> {
        &self.txn_manager
    }

    /// Clean-shutdown convenience; crash consistency never depends on it.
    pub fn flush(&self) -> MicaResult<()> {
        self.log_manager.flush()?;
        self.buffer.flush_all_pages()
    }

    /// Roll back whatever a disappearing session left open.
    pub fn abandon_session(&self, session: &mut Session) {
        if let Some(mut txn) = session.take_txn() {
            if let Err(err) = self.txn_manager.abort(&mut txn, &self.catalog) {
                error!("failed to abort abandoned txn {}: {err}", txn.id());
            }
        }
    }

    pub fn execute(&self, session: &mut Session, sql: &str) -> MicaResult<QueryResult> {
        let command = parse_command(sql)?;
        let statement = Analyzer::new(&self.catalog).analyze(command)?;
        self.execute_statement(session, statement)
    }

    fn execute_statement(
        &self,
        session: &mut Session,
        statement: BoundStatement,
    ) -> MicaResult<QueryResult> {
        match statement {
            BoundStatement::Begin => {
                if session.in_transaction() {
                    return Err(MicaError::Internal(
                        "a transaction is already active".to_string(),
                    ));
                }
                session.txn = Some(self.txn_manager.begin(true)?);
                Ok(QueryResult::with_message("begin"))
            }
            BoundStatement::Commit => match session.txn.take() {
                Some(mut txn) => {
                    self.txn_manager.commit(&mut txn, &self.catalog)?;
                    Ok(QueryResult::with_message("commit"))
                }
                None => Err(MicaError::Internal("no active transaction".to_string())),
            },
            BoundStatement::Abort => match session.txn.take() {
                Some(mut txn) => {
                    self.txn_manager.abort(&mut txn, &self.catalog)?;
                    Ok(QueryResult::with_message("rollback"))
                }
                None => Err(MicaError::Internal("no active transaction".to_string())),
            },
            BoundStatement::Help => Ok(QueryResult::with_message(HELP_TEXT)),
            BoundStatement::ShowTables => {
                let headers = vec!["Tables".to_string()];
                let rows = self
                    .catalog
                    .table_names()
                    .into_iter()
                    .map(|name| vec![name])
                    .collect();
                Ok(QueryResult::with_rows(headers, rows))
            }
            BoundStatement::ShowIndex { table } => {
                let meta = self.catalog.table_meta(&table)?;
                let headers = vec![
                    "Table".to_string(),
                    "Non_unique".to_string(),
                    "Key_name".to_string(),
                    "Column_name".to_string(),
                ];
                let rows = meta
                    .indexes
                    .iter()
                    .map(|ix| {
                        vec![
                            table.clone(),
                            // There is no non-unique index kind; the label
                            // is fixed for output-file compatibility.
                            "unique".to_string(),
                            ix.index_name(),
                            ix.col_names().join(","),
                        ]
                    })
                    .collect();
                Ok(QueryResult::with_rows(headers, rows))
            }
            BoundStatement::Desc { table } => {
                let meta = self.catalog.table_meta(&table)?;
                let headers = vec!["Field".to_string(), "Type".to_string(), "Index".to_string()];
                let rows = meta
                    .cols
                    .iter()
                    .map(|col| {
                        let type_text = match col.col_type {
                            ColType::Char => format!("CHAR({})", col.len),
                            other => other.name().to_string(),
                        };
                        let indexed = if col.indexed { "YES" } else { "NO" };
                        vec![col.name.clone(), type_text, indexed.to_string()]
                    })
                    .collect();
                Ok(QueryResult::with_rows(headers, rows))
            }
            BoundStatement::CreateTable { name, cols } => {
                self.catalog.create_table(&name, cols)?;
                Ok(QueryResult::with_message("create table"))
            }
            BoundStatement::DropTable { name } => {
                self.catalog.drop_table(&name)?;
                Ok(QueryResult::with_message("drop table"))
            }
            BoundStatement::CreateIndex { table, cols } => {
                self.catalog.create_index(&table, &cols)?;
                Ok(QueryResult::with_message("create index"))
            }
            BoundStatement::DropIndex { table, cols } => {
                self.catalog.drop_index(&table, &cols)?;
                Ok(QueryResult::with_message("drop index"))
            }
            BoundStatement::Load { path, table } => self.execute_load(session, &path, &table),
            dml => self.execute_dml(session, dml),
        }
    }

    /// DML and SELECT run inside a transaction: the session's explicit
    /// one, or a fresh auto-commit transaction for this statement.
    fn execute_dml(
        &self,
        session: &mut Session,
        statement: BoundStatement,
    ) -> MicaResult<QueryResult> {
        let auto_commit = !session.in_transaction();
        if auto_commit {
            session.txn = Some(self.txn_manager.begin(false)?);
        }
        let txn = session.txn.as_mut().expect("transaction installed above");
        let result = self.run_statement(txn, &statement);
        match result {
            Ok(output) => {
                if auto_commit {
                    let mut txn = session.txn.take().expect("auto-commit txn");
                    self.txn_manager.commit(&mut txn, &self.catalog)?;
                }
                Ok(output)
            }
            Err(err) => {
                // A deadlock-prevention abort always rolls the whole
                // transaction back; statement errors do too when the
                // statement was auto-committed.
                if err.aborts_transaction() || auto_commit {
                    if let Some(mut txn) = session.txn.take() {
                        if let Err(abort_err) = self.txn_manager.abort(&mut txn, &self.catalog) {
                            error!("rollback after failed statement failed: {abort_err}");
                        }
                    }
                }
                Err(err)
            }
        }
    }

    fn run_statement(
        &self,
        txn: &mut Transaction,
        statement: &BoundStatement,
    ) -> MicaResult<QueryResult> {
        let mut ctx = ExecutionContext {
            catalog: &self.catalog,
            txn,
            lock_manager: &self.lock_manager,
            log_manager: &self.log_manager,
        };
        match statement {
            BoundStatement::Insert { table, values } => {
                let mut executor = InsertExecutor::new(&self.catalog, table, values.clone())?;
                ExecutionEngine::execute(&mut executor, &mut ctx)?;
                Ok(QueryResult::with_message("insert ok"))
            }
            BoundStatement::Delete { table, conds } => {
                let scan = Planner::new(&self.catalog).plan_scan(table, conds.clone())?;
                let child = build_executor(&self.catalog, &scan, true)?;
                let mut executor = DeleteExecutor::new(&self.catalog, table, child)?;
                ExecutionEngine::execute(&mut executor, &mut ctx)?;
                Ok(QueryResult::with_message("delete ok"))
            }
            BoundStatement::Update { table, sets, conds } => {
                let scan = Planner::new(&self.catalog).plan_scan(table, conds.clone())?;
                let child = build_executor(&self.catalog, &scan, true)?;
                let mut executor =
                    UpdateExecutor::new(&self.catalog, table, sets.clone(), child)?;
                ExecutionEngine::execute(&mut executor, &mut ctx)?;
                Ok(QueryResult::with_message("update ok"))
            }
            BoundStatement::Select(select) => {
                let plan = Planner::new(&self.catalog).plan_select(select)?;
                let mut executor = build_executor(&self.catalog, &plan, false)?;
                let tuples = ExecutionEngine::execute(executor.as_mut(), &mut ctx)?;

                let cols = executor.output_cols();
                let headers = cols.iter().map(|c| c.name.clone()).collect();
                let rows = tuples
                    .iter()
                    .map(|tuple| {
                        cols.iter()
                            .map(|col| {
                                let start = col.offset as usize;
                                let slice = &tuple.data[start..start + col.len as usize];
                                Value::decode(slice, col.col_type).to_string()
                            })
                            .collect()
                    })
                    .collect();
                Ok(QueryResult::with_rows(headers, rows))
            }
            other => Err(MicaError::Internal(format!(
                "statement is not DML: {other:?}"
            ))),
        }
    }

    /// Bulk CSV ingestion through the normal insert path, one transaction
    /// for the whole file. The first line is the header.
    fn execute_load(
        &self,
        session: &mut Session,
        path: &str,
        table: &str,
    ) -> MicaResult<QueryResult> {
        let meta = self.catalog.table_meta(table)?;
        let text = std::fs::read_to_string(path)?;
        let mut lines = text.lines();
        let _header = lines.next();

        let auto_commit = !session.in_transaction();
        if auto_commit {
            session.txn = Some(self.txn_manager.begin(false)?);
        }
        let mut loaded = 0usize;
        let result: MicaResult<()> = (|| {
            for line in lines {
                if line.trim().is_empty() {
                    continue;
                }
                let fields: Vec<&str> = line.split(',').collect();
                if fields.len() != meta.cols.len() {
                    return Err(MicaError::InvalidValueCount);
                }
                let values = fields
                    .iter()
                    .zip(meta.cols.iter())
                    .map(|(field, col)| parse_csv_value(field.trim(), col.col_type))
                    .collect::<MicaResult<Vec<Value>>>()?;
                let txn = session.txn.as_mut().expect("transaction installed above");
                let mut ctx = ExecutionContext {
                    catalog: &self.catalog,
                    txn,
                    lock_manager: &self.lock_manager,
                    log_manager: &self.log_manager,
                };
                let mut executor = InsertExecutor::new(&self.catalog, table, values)?;
                ExecutionEngine::execute(&mut executor, &mut ctx)?;
                loaded += 1;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                if auto_commit {
                    let mut txn = session.txn.take().expect("load txn");
                    self.txn_manager.commit(&mut txn, &self.catalog)?;
                }
                Ok(QueryResult::with_message(format!("loaded {loaded} rows")))
            }
            Err(err) => {
                if err.aborts_transaction() || auto_commit {
                    if let Some(mut txn) = session.txn.take() {
                        if let Err(abort_err) = self.txn_manager.abort(&mut txn, &self.catalog) {
                            error!("rollback after failed load failed: {abort_err}");
                        }
                    }
                }
                Err(err)
            }
        }
    }
}

fn parse_csv_value(text: &str, col_type: ColType) -> MicaResult<Value> {
    match col_type {
        ColType::Int => text
            .parse::<i32>()
            .map(Value::Int)
            .map_err(|_| bad_field(text, col_type)),
        ColType::BigInt => text
            .parse::<i64>()
            .map(Value::BigInt)
            .map_err(|_| bad_field(text, col_type)),
        ColType::Float => text
            .parse::<f32>()
            .map(Value::Float)
            .map_err(|_| bad_field(text, col_type)),
        ColType::Char => Ok(Value::Str(text.to_string())),
        ColType::Datetime => Ok(Value::Datetime(text.to_string())),
    }
}

fn bad_field(text: &str, col_type: ColType) -> MicaError {
    MicaError::IncompatibleType {
        expected: col_type.name().to_string(),
        actual: format!("'{text}'"),
    }
}
