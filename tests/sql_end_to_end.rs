use micadb::database::{Database, QueryResult, Session};
use micadb::error::MicaError;
use tempfile::TempDir;

fn open_db() -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path().join("testdb")).unwrap();
    (dir, db)
}

fn exec(db: &Database, session: &mut Session, sql: &str) -> QueryResult {
    db.execute(session, sql)
        .unwrap_or_else(|e| panic!("'{sql}' failed: {e}"))
}

fn rows(db: &Database, session: &mut Session, sql: &str) -> Vec<Vec<String>> {
    exec(db, session, sql).rows
}

#[test]
fn create_insert_select() {
    let (_dir, db) = open_db();
    let mut s = Session::new();

    exec(&db, &mut s, "CREATE TABLE t (a INT, b CHAR(4));");
    exec(&db, &mut s, "INSERT INTO t VALUES (1, 'ab');");
    exec(&db, &mut s, "INSERT INTO t VALUES (2, 'cd');");

    let result = rows(&db, &mut s, "SELECT a, b FROM t WHERE a >= 1;");
    assert_eq!(
        result,
        vec![
            vec!["1".to_string(), "ab".to_string()],
            vec!["2".to_string(), "cd".to_string()],
        ]
    );
}

#[test]
fn unique_index_rejects_duplicates() {
    let (_dir, db) = open_db();
    let mut s = Session::new();

    exec(&db, &mut s, "CREATE TABLE t (a INT, b CHAR(4));");
    exec(&db, &mut s, "INSERT INTO t VALUES (1, 'ab');");
    exec(&db, &mut s, "INSERT INTO t VALUES (2, 'cd');");
    exec(&db, &mut s, "CREATE INDEX t(a);");
    exec(&db, &mut s, "INSERT INTO t VALUES (3, 'xy');");

    let err = db
        .execute(&mut s, "INSERT INTO t VALUES (1, 'zz');")
        .unwrap_err();
    assert!(matches!(err, MicaError::UniqueConstraint));

    // Only the rows accepted earlier are visible.
    let result = rows(&db, &mut s, "SELECT a FROM t ORDER BY a;");
    assert_eq!(result, vec![vec!["1"], vec!["2"], vec!["3"]]);
}

#[test]
fn update_rolls_back_on_abort() {
    let (_dir, db) = open_db();
    let mut s = Session::new();

    exec(&db, &mut s, "CREATE TABLE t (a INT, b CHAR(4));");
    exec(&db, &mut s, "INSERT INTO t VALUES (1, 'ab');");

    exec(&db, &mut s, "BEGIN;");
    exec(&db, &mut s, "UPDATE t SET b = 'zz' WHERE a = 1;");
    exec(&db, &mut s, "ABORT;");

    let result = rows(&db, &mut s, "SELECT b FROM t WHERE a = 1;");
    assert_eq!(result, vec![vec!["ab"]]);
}

#[test]
fn update_rolls_back_index_keys_on_abort() {
    let (_dir, db) = open_db();
    let mut s = Session::new();

    exec(&db, &mut s, "CREATE TABLE t (a INT, b CHAR(4));");
    exec(&db, &mut s, "CREATE INDEX t(a);");
    exec(&db, &mut s, "INSERT INTO t VALUES (1, 'ab');");

    exec(&db, &mut s, "BEGIN;");
    exec(&db, &mut s, "UPDATE t SET a = 9 WHERE a = 1;");
    exec(&db, &mut s, "ROLLBACK;");

    // The index still finds the row under its old key.
    assert_eq!(
        rows(&db, &mut s, "SELECT b FROM t WHERE a = 1;"),
        vec![vec!["ab"]]
    );
    assert!(rows(&db, &mut s, "SELECT b FROM t WHERE a = 9;").is_empty());
}

#[test]
fn range_scan_with_and_without_index() {
    let (_dir, db) = open_db();
    let mut s = Session::new();

    exec(&db, &mut s, "CREATE TABLE t (a INT, b CHAR(8));");
    for i in 1..=1000 {
        exec(
            &db,
            &mut s,
            &format!("INSERT INTO t VALUES ({i}, 'v{i}');"),
        );
    }

    let expected: Vec<Vec<String>> = (100..200).map(|i| vec![i.to_string()]).collect();
    let seq = rows(
        &db,
        &mut s,
        "SELECT a FROM t WHERE a >= 100 AND a < 200 ORDER BY a ASC;",
    );
    assert_eq!(seq, expected);

    exec(&db, &mut s, "CREATE INDEX t(a);");
    let indexed = rows(
        &db,
        &mut s,
        "SELECT a FROM t WHERE a >= 100 AND a < 200 ORDER BY a ASC;",
    );
    assert_eq!(indexed, expected);
}

#[test]
fn delete_with_predicate() {
    let (_dir, db) = open_db();
    let mut s = Session::new();

    exec(&db, &mut s, "CREATE TABLE t (a INT, b CHAR(4));");
    exec(&db, &mut s, "CREATE INDEX t(a);");
    for i in 0..10 {
        exec(&db, &mut s, &format!("INSERT INTO t VALUES ({i}, 'x');"));
    }
    exec(&db, &mut s, "DELETE FROM t WHERE a < 5;");

    assert_eq!(
        rows(&db, &mut s, "SELECT a FROM t ORDER BY a;"),
        (5..10)
            .map(|i| vec![i.to_string()])
            .collect::<Vec<Vec<String>>>()
    );
    // The deleted keys are gone from the index as well.
    assert!(rows(&db, &mut s, "SELECT a FROM t WHERE a = 3;").is_empty());
}

#[test]
fn aggregates_and_limit() {
    let (_dir, db) = open_db();
    let mut s = Session::new();

    exec(&db, &mut s, "CREATE TABLE t (a INT, b CHAR(4));");
    for i in 1..=10 {
        exec(&db, &mut s, &format!("INSERT INTO t VALUES ({i}, 'x');"));
    }

    let result = exec(
        &db,
        &mut s,
        "SELECT COUNT(*) AS n, SUM(a) AS s, MIN(a) AS lo, MAX(a) AS hi FROM t;",
    );
    assert_eq!(result.headers, vec!["n", "s", "lo", "hi"]);
    assert_eq!(result.rows, vec![vec!["10", "55", "1", "10"]]);

    let limited = rows(&db, &mut s, "SELECT a FROM t ORDER BY a DESC LIMIT 3;");
    assert_eq!(limited, vec![vec!["10"], vec!["9"], vec!["8"]]);
}

#[test]
fn join_two_tables() {
    let (_dir, db) = open_db();
    let mut s = Session::new();

    exec(&db, &mut s, "CREATE TABLE emp (id INT, dept INT);");
    exec(&db, &mut s, "CREATE TABLE dept (dno INT, dname CHAR(8));");
    exec(&db, &mut s, "INSERT INTO emp VALUES (1, 10);");
    exec(&db, &mut s, "INSERT INTO emp VALUES (2, 20);");
    exec(&db, &mut s, "INSERT INTO emp VALUES (3, 10);");
    exec(&db, &mut s, "INSERT INTO dept VALUES (10, 'eng');");
    exec(&db, &mut s, "INSERT INTO dept VALUES (20, 'ops');");

    let result = rows(
        &db,
        &mut s,
        "SELECT id, dname FROM emp, dept WHERE dept = dno ORDER BY id;",
    );
    assert_eq!(
        result,
        vec![
            vec!["1".to_string(), "eng".to_string()],
            vec!["2".to_string(), "ops".to_string()],
            vec!["3".to_string(), "eng".to_string()],
        ]
    );
}

#[test]
fn type_widening_and_errors() {
    let (_dir, db) = open_db();
    let mut s = Session::new();

    exec(
        &db,
        &mut s,
        "CREATE TABLE t (a BIGINT, f FLOAT, d DATETIME);",
    );
    // INT literals widen into BIGINT and FLOAT; the string becomes a
    // DATETIME payload.
    exec(
        &db,
        &mut s,
        "INSERT INTO t VALUES (1, 2, '2024-01-02 03:04:05');",
    );
    assert_eq!(
        rows(&db, &mut s, "SELECT a, f, d FROM t;"),
        vec![vec![
            "1".to_string(),
            "2".to_string(),
            "2024-01-02 03:04:05".to_string()
        ]]
    );

    let err = db
        .execute(&mut s, "CREATE TABLE u (x CHAR(2));")
        .and_then(|_| db.execute(&mut s, "INSERT INTO u VALUES ('toolong');"))
        .unwrap_err();
    assert!(matches!(err, MicaError::StringOverflow(_)));

    let err = db.execute(&mut s, "SELECT a FROM missing;").unwrap_err();
    assert!(matches!(err, MicaError::TableNotFound(_)));

    let err = db
        .execute(&mut s, "INSERT INTO t VALUES (1, 2);")
        .unwrap_err();
    assert!(matches!(err, MicaError::InvalidValueCount));
}

#[test]
fn utility_statements() {
    let (_dir, db) = open_db();
    let mut s = Session::new();

    exec(&db, &mut s, "CREATE TABLE t (a INT, b CHAR(4));");
    exec(&db, &mut s, "CREATE INDEX t(a);");

    let tables = exec(&db, &mut s, "SHOW TABLES;");
    assert_eq!(tables.rows, vec![vec!["t"]]);

    let desc = exec(&db, &mut s, "DESC t;");
    assert_eq!(
        desc.rows,
        vec![
            vec!["a".to_string(), "INT".to_string(), "YES".to_string()],
            vec!["b".to_string(), "CHAR(4)".to_string(), "NO".to_string()],
        ]
    );

    let index = exec(&db, &mut s, "SHOW INDEX FROM t;");
    assert_eq!(
        index.rows,
        vec![vec![
            "t".to_string(),
            "unique".to_string(),
            "t_a".to_string(),
            "a".to_string()
        ]]
    );

    exec(&db, &mut s, "DROP INDEX t(a);");
    assert!(exec(&db, &mut s, "SHOW INDEX FROM t;").rows.is_empty());
    exec(&db, &mut s, "DROP TABLE t;");
    assert!(exec(&db, &mut s, "SHOW TABLES;").rows.is_empty());
}

#[test]
fn load_csv_into_table() {
    let (dir, db) = open_db();
    let mut s = Session::new();

    exec(&db, &mut s, "CREATE TABLE t (a INT, b CHAR(8));");
    let csv_path = dir.path().join("data.csv");
    std::fs::write(&csv_path, "a,b\n1,foo\n2,bar\n3,baz\n").unwrap();

    let result = exec(
        &db,
        &mut s,
        &format!("LOAD {} INTO t;", csv_path.display()),
    );
    assert_eq!(result.message.as_deref(), Some("loaded 3 rows"));
    assert_eq!(
        rows(&db, &mut s, "SELECT b FROM t ORDER BY a;"),
        vec![vec!["foo"], vec!["bar"], vec!["baz"]]
    );
}

#[test]
fn set_expression_update() {
    let (_dir, db) = open_db();
    let mut s = Session::new();

    exec(&db, &mut s, "CREATE TABLE t (a INT, b FLOAT);");
    exec(&db, &mut s, "INSERT INTO t VALUES (10, 5);");
    exec(&db, &mut s, "UPDATE t SET a = a + 5, b = b - 1;");
    assert_eq!(
        rows(&db, &mut s, "SELECT a, b FROM t;"),
        vec![vec!["15".to_string(), "4".to_string()]]
    );
}
