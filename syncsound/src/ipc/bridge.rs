//! IPC bridge: stdin reader and stdout event emitter.
//!
//! A blocking stdin reader thread sends deserialized commands through an
//! mpsc channel; events go out as JSON lines on stdout.

use std::io::{self, BufRead, Write};

use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{SimCommand, SimEvent};

/// Emit a `SimEvent` as a JSON line on stdout and flush.
pub fn emit_event(event: &SimEvent) {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            error!("Failed to serialize event: {}", e);
            return;
        }
    };
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    // Pipe may be closed.
    let _ = writeln!(handle, "{}", json);
    let _ = handle.flush();
}

pub fn emit_error(message: &str, errno: Option<i32>) {
    emit_event(&SimEvent::Error {
        message: message.to_string(),
        errno,
    });
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<SimCommand>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some)
}

/// Spawn a blocking thread that reads JSON lines from stdin and forwards
/// the parsed commands through the returned channel.
///
/// The thread exits when stdin is closed or the receiver is dropped.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<SimCommand> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let text = match line {
                Ok(text) => text,
                Err(e) => {
                    error!("stdin read error: {}", e);
                    break;
                }
            };
            match parse_command(&text) {
                Ok(Some(cmd)) => {
                    debug!(?cmd, "Received command");
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Invalid JSON command: {} (input: {})", e, text.trim());
                    emit_error(&format!("Invalid JSON command: {}", e), None);
                }
            }
        }
        debug!("stdin reader thread exiting");
    });

    rx
}
