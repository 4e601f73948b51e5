use sqlparser::ast::Statement;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::error::{MicaError, MicaResult};

/// A parsed client command: either a standard SQL statement (sqlparser
/// AST) or one of the commands the grammar predates sqlparser on —
/// `SHOW INDEX FROM t`, `DESC t`, `CREATE INDEX t(a,b)`, transaction
/// words, `LOAD`, `HELP`.
#[derive(Debug)]
pub enum Command {
    Sql(Statement),
    ShowTables,
    ShowIndex { table: String },
    Desc { table: String },
    CreateIndex { table: String, cols: Vec<String> },
    DropIndex { table: String, cols: Vec<String> },
    Begin,
    Commit,
    Abort,
    Help,
    Load { path: String, table: String },
}

/// Parse `t(a,b)` into a table name and column list.
fn parse_index_target(input: &str) -> MicaResult<(String, Vec<String>)> {
    let open = input
        .find('(')
        .ok_or_else(|| MicaError::Internal(format!("Malformed index target: {input}")))?;
    let close = input
        .rfind(')')
        .ok_or_else(|| MicaError::Internal(format!("Malformed index target: {input}")))?;
    let table = input[..open].trim().to_string();
    let cols: Vec<String> = input[open + 1..close]
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if table.is_empty() || cols.is_empty() {
        return Err(MicaError::Internal(format!(
            "Malformed index target: {input}"
        )));
    }
    Ok((table, cols))
}

pub fn parse_command(input: &str) -> MicaResult<Command> {
    let trimmed = input.trim().trim_end_matches(';').trim();
    let lower = trimmed.to_ascii_lowercase();

    if lower == "help" {
        return Ok(Command::Help);
    }
    if lower == "show tables" {
        return Ok(Command::ShowTables);
    }
    if let Some(rest) = lower.strip_prefix("show index from ") {
        let table = trimmed[trimmed.len() - rest.len()..].trim().to_string();
        return Ok(Command::ShowIndex { table });
    }
    if let Some(rest) = lower.strip_prefix("desc ") {
        let table = trimmed[trimmed.len() - rest.len()..].trim().to_string();
        return Ok(Command::Desc { table });
    }
    if lower == "begin" || lower == "start transaction" {
        return Ok(Command::Begin);
    }
    if lower == "commit" {
        return Ok(Command::Commit);
    }
    if lower == "abort" || lower == "rollback" {
        return Ok(Command::Abort);
    }
    if let Some(rest) = lower.strip_prefix("load ") {
        let Some(into_pos) = rest.find(" into ") else {
            return Err(MicaError::Internal(format!(
                "Malformed LOAD command: {trimmed}"
            )));
        };
        let offset = trimmed.len() - rest.len();
        let path = trimmed[offset..offset + into_pos].trim().to_string();
        let table = trimmed[offset + into_pos + " into ".len()..].trim().to_string();
        return Ok(Command::Load { path, table });
    }
    // `CREATE INDEX t(a,b)` — the unnamed form the wire grammar uses.
    if let Some(rest) = lower.strip_prefix("create index ") {
        if !rest.contains(" on ") {
            let target = &trimmed[trimmed.len() - rest.len()..];
            let (table, cols) = parse_index_target(target)?;
            return Ok(Command::CreateIndex { table, cols });
        }
    }
    if let Some(rest) = lower.strip_prefix("drop index ") {
        if rest.contains('(') {
            let target = &trimmed[trimmed.len() - rest.len()..];
            let (table, cols) = parse_index_target(target)?;
            return Ok(Command::DropIndex { table, cols });
        }
    }

    let statements = Parser::parse_sql(&PostgreSqlDialect {}, trimmed)?;
    if statements.len() != 1 {
        return Err(MicaError::Internal(
            "expected exactly one SQL statement".to_string(),
        ));
    }
    Ok(Command::Sql(statements.into_iter().next().expect("one statement")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pseudo_commands() {
        assert!(matches!(parse_command("help;"), Ok(Command::Help)));
        assert!(matches!(parse_command("SHOW TABLES;"), Ok(Command::ShowTables)));
        assert!(matches!(parse_command("begin;"), Ok(Command::Begin)));
        assert!(matches!(parse_command("ABORT;"), Ok(Command::Abort)));
        assert!(matches!(parse_command("rollback;"), Ok(Command::Abort)));

        match parse_command("show index from orders;").unwrap() {
            Command::ShowIndex { table } => assert_eq!(table, "orders"),
            other => panic!("unexpected {other:?}"),
        }
        match parse_command("desc orders;").unwrap() {
            Command::Desc { table } => assert_eq!(table, "orders"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unnamed_index_form() {
        match parse_command("create index t(a, b);").unwrap() {
            Command::CreateIndex { table, cols } => {
                assert_eq!(table, "t");
                assert_eq!(cols, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        match parse_command("drop index t(a);").unwrap() {
            Command::DropIndex { table, cols } => {
                assert_eq!(table, "t");
                assert_eq!(cols, vec!["a".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn load_command() {
        match parse_command("load /tmp/data.csv into warehouse;").unwrap() {
            Command::Load { path, table } => {
                assert_eq!(path, "/tmp/data.csv");
                assert_eq!(table, "warehouse");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn standard_sql_goes_through_sqlparser() {
        assert!(matches!(
            parse_command("SELECT a FROM t WHERE a >= 1;"),
            Ok(Command::Sql(_))
        ));
        assert!(parse_command("SELEC nonsense").is_err());
    }
}
