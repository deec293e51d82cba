mod backup;
mod calc;
mod db;
mod grading;
mod ipc;
mod logging;
mod model;
mod repo;
mod service;

use log::{info, warn};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

const WORKSPACE_ENV: &str = "ATTENDANCED_WORKSPACE";

/// Answers one request line. A line that is not a valid request still gets a
/// `bad_json` reply, carrying the id when one can be recovered.
fn reply_to_line(state: &mut ipc::AppState, line: &str) -> serde_json::Value {
    match serde_json::from_str::<ipc::Request>(line) {
        Ok(req) => ipc::handle_request(state, req),
        Err(e) => {
            let id = serde_json::from_str::<serde_json::Value>(line)
                .ok()
                .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_string))
                .unwrap_or_default();
            ipc::err(&id, "bad_json", e.to_string(), None)
        }
    }
}

/// One JSON response line per non-blank input line, flushed immediately.
fn serve<R: BufRead, W: Write>(
    input: R,
    mut output: W,
    state: &mut ipc::AppState,
) -> io::Result<()> {
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let resp = reply_to_line(state, &line);
        writeln!(output, "{}", resp)?;
        output.flush()?;
    }
    Ok(())
}

fn main() {
    let _logger = match logging::init_logging() {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("attendanced: logging disabled: {}", e);
            None
        }
    };

    let mut state = ipc::AppState::default();
    if let Some(path) = std::env::var_os(WORKSPACE_ENV).filter(|v| !v.is_empty()) {
        let path = PathBuf::from(path);
        if let Err(e) = ipc::select_workspace(&mut state, &path) {
            warn!(
                "event=workspace_preselect module=core status=error path={} error={e:#}",
                path.display()
            );
        }
    }

    if let Err(e) = serve(io::stdin().lock(), io::stdout().lock(), &mut state) {
        warn!("event=app_stop module=core status=error error={}", e);
        return;
    }
    info!("event=app_stop module=core status=ok");
}
