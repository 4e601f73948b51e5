use std::process::exit;
use std::sync::Arc;

use micadb::config::DEFAULT_PORT;
use micadb::database::Database;
use micadb::server;

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let Some(db_dir) = args.next() else {
        eprintln!("usage: server <database-name>");
        exit(1);
    };
    if args.next().is_some() {
        eprintln!("usage: server <database-name>");
        exit(1);
    }

    let port = std::env::var("MICADB_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);

    let db = match Database::open(&db_dir) {
        Ok(db) => Arc::new(db),
        Err(err) => {
            eprintln!("failed to open database '{db_dir}': {err}");
            exit(1);
        }
    };

    if let Err(err) = server::serve(db, port) {
        eprintln!("server error: {err}");
        exit(1);
    }
}
