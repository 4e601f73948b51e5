pub mod analyzer;
pub mod parser;

pub use analyzer::{
    AggFunc, AggSpec, Analyzer, BoundStatement, CompOp, CondRhs, Condition, SelectStmt, SetClause,
    TabCol,
};
pub use parser::{parse_command, Command};
