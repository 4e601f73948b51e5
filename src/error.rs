use crate::transaction::TxnId;
use thiserror::Error;

pub type MicaResult<T, E = MicaError> = Result<T, E>;

/// Why a transaction was forcibly aborted by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    DeadlockPrevention,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::DeadlockPrevention => write!(f, "deadlock prevention"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MicaError {
    #[error("Table '{0}' does not exist")]
    TableNotFound(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Column '{0}' does not exist")]
    ColumnNotFound(String),

    #[error("Column '{0}' is ambiguous")]
    AmbiguousColumn(String),

    #[error("Index '{0}' does not exist")]
    IndexNotFound(String),

    #[error("Index '{0}' already exists")]
    IndexExists(String),

    #[error("Incompatible types: expected {expected}, got {actual}")]
    IncompatibleType { expected: String, actual: String },

    #[error("String '{0}' exceeds column width")]
    StringOverflow(String),

    #[error("Value count does not match column count")]
    InvalidValueCount,

    #[error("Unique constraint violated")]
    UniqueConstraint,

    #[error("Record not found at page {page_no} slot {slot_no}")]
    RecordNotFound { page_no: u32, slot_no: u32 },

    #[error("Page {0} does not exist")]
    PageNotExist(u32),

    #[error("Index entry not found")]
    IndexEntryNotFound,

    #[error("Transaction {txn_id} aborted: {reason}")]
    TransactionAbort { txn_id: TxnId, reason: AbortReason },

    #[error("File '{0}' already exists")]
    FileExists(String),

    #[error("File '{0}' not found")]
    FileNotFound(String),

    #[error("File '{0}' is not closed")]
    FileNotClosed(String),

    #[error("File is not open")]
    FileNotOpen,

    #[error("Parser error: {0}")]
    Parser(#[from] sqlparser::parser::ParserError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MicaError {
    /// True when the error must roll back the whole transaction rather
    /// than just the statement that raised it.
    pub fn aborts_transaction(&self) -> bool {
        matches!(self, MicaError::TransactionAbort { .. })
    }
}
