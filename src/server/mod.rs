use comfy_table::Cell;
use log::{debug, info, warn};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use crate::config::BUFFER_LENGTH;
use crate::database::{Database, QueryResult, Session};
use crate::error::MicaResult;

/// Accept loop: one OS thread per client connection, as the engine's
/// locking model expects.
pub fn serve(db: Arc<Database>, port: u16) -> MicaResult<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    info!(
        "serving database at {:?} on port {port}",
        db.db_dir()
    );
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let db = db.clone();
                thread::spawn(move || {
                    if let Err(err) = handle_client(db, stream) {
                        warn!("client connection ended with error: {err}");
                    }
                });
            }
            Err(err) => warn!("failed to accept connection: {err}"),
        }
    }
    Ok(())
}

/// Read one null-terminated command from the stream. Returns None on a
/// clean disconnect.
fn read_command(stream: &mut TcpStream, buf: &mut Vec<u8>) -> MicaResult<Option<String>> {
    loop {
        if let Some(pos) = buf.iter().position(|&b| b == 0) {
            let command = String::from_utf8_lossy(&buf[..pos]).into_owned();
            buf.drain(..=pos);
            return Ok(Some(command));
        }
        if buf.len() >= BUFFER_LENGTH {
            // Oversized command: drop the connection.
            return Ok(None);
        }
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            // EOF. A trailing newline-terminated command still counts.
            if buf.iter().all(|&b| b == b'\n' || b == b'\r' || b == b' ') {
                return Ok(None);
            }
            let command = String::from_utf8_lossy(buf).into_owned();
            buf.clear();
            return Ok(Some(command));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn handle_client(db: Arc<Database>, mut stream: TcpStream) -> MicaResult<()> {
    let peer = stream.peer_addr()?;
    debug!("client connected: {peer}");
    let mut session = Session::new();
    let mut buf: Vec<u8> = Vec::new();
    let mut output_enabled = true;

    loop {
        let Some(command) = read_command(&mut stream, &mut buf)? else {
            break;
        };
        let trimmed = command.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lower = trimmed.trim_end_matches(';').trim().to_ascii_lowercase();

        if lower == "exit" {
            break;
        }
        if lower == "crash" {
            // Die without flushing anything: recovery's problem.
            std::process::abort();
        }
        if lower == "set output_file off" {
            output_enabled = false;
            reply(&mut stream, "ok\n")?;
            continue;
        }
        if lower == "set output_file on" {
            output_enabled = true;
            reply(&mut stream, "ok\n")?;
            continue;
        }

        let response = match db.execute(&mut session, trimmed) {
            Ok(result) => {
                if output_enabled {
                    render_result(&result)
                } else {
                    "ok\n".to_string()
                }
            }
            Err(err) if err.aborts_transaction() => "abort\n".to_string(),
            Err(err) => format!("{err}\n"),
        };
        reply(&mut stream, &response)?;
    }

    db.abandon_session(&mut session);
    debug!("client disconnected: {peer}");
    Ok(())
}

fn reply(stream: &mut TcpStream, text: &str) -> MicaResult<()> {
    stream.write_all(text.as_bytes())?;
    stream.write_all(&[0u8])?;
    stream.flush()?;
    Ok(())
}

fn render_result(result: &QueryResult) -> String {
    if let Some(message) = &result.message {
        return format!("{message}\n");
    }
    if result.headers.is_empty() {
        return "ok\n".to_string();
    }
    let mut table = comfy_table::Table::new();
    table.load_preset("||--+-++|    ++++++");
    table.set_header(result.headers.iter().map(Cell::new).collect::<Vec<Cell>>());
    for row in &result.rows {
        table.add_row(row.iter().map(Cell::new).collect::<Vec<Cell>>());
    }
    format!("{table}\nTotal record(s): {}\n", result.rows.len())
}
