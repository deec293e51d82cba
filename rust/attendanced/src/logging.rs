//! Process logging.
//!
//! stdout carries the IPC protocol, so every log line goes to stderr. The
//! filter comes from `RUST_LOG`, defaulting to `info`. Events use a
//! `event=<name> key=value` layout.

use flexi_logger::{Logger, LoggerHandle};
use log::{error, info};
use std::sync::Once;

const DEFAULT_LEVEL: &str = "info";
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;

static PANIC_HOOK: Once = Once::new();

/// Starts the stderr logger. Keep the returned handle alive for the life of
/// the process.
pub fn init_logging() -> Result<LoggerHandle, String> {
    let handle = Logger::try_with_env_or_str(DEFAULT_LEVEL)
        .map_err(|err| format!("invalid log spec: {err}"))?
        .log_to_stderr()
        .format(flexi_logger::detailed_format)
        .start()
        .map_err(|err| format!("failed to start logger: {err}"))?;

    install_panic_hook();
    info!(
        "event=app_start module=core status=ok platform={} version={}",
        std::env::consts::OS,
        env!("CARGO_PKG_VERSION")
    );
    Ok(handle)
}

fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            let payload = panic_info
                .payload()
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            let location = panic_info
                .location()
                .map(|l| format!("{}:{}", l.file(), l.line()))
                .unwrap_or_else(|| "unknown".to_string());
            error!(
                "event=panic module=core status=error location={} payload={}",
                location,
                truncate_chars(&payload, MAX_PANIC_PAYLOAD_CHARS)
            );
            previous(panic_info);
        }));
    });
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::truncate_chars;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("ééééé", 2), "éé...");
    }
}
