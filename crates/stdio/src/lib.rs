//! # stdio
//!
//! Terminal output helpers for the `phpbox` command line.
//!
//! ## Format
//!
//! ```text
//! [action] message
//! ```
//!
//! ## Log Levels
//!
//! Control output with the `LOG_LEVEL` environment variable:
//! - `error` - Errors only
//! - `info` - Default (progress + results)
//! - `debug` - Verbose output
//!
//! Library crates log through `tracing`; this crate is only for lines a
//! person reads on the terminal.

use std::env;
use std::sync::OnceLock;

/// Log level for terminal output
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum LogLevel {
    Error = 0,
    Info = 1,
    Debug = 2,
}

impl LogLevel {
    fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "debug" => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }
}

static LOG_LEVEL: OnceLock<LogLevel> = OnceLock::new();

fn emit_line(line: &str) {
    eprintln!("{}", line);
}

/// Get the current log level (cached from LOG_LEVEL env var)
pub fn log_level() -> LogLevel {
    *LOG_LEVEL.get_or_init(|| {
        env::var("LOG_LEVEL")
            .map(|s| LogLevel::from_str(&s))
            .unwrap_or(LogLevel::Info)
    })
}

/// Force a level, e.g. from a `--debug` flag. Ignored once the level was read.
pub fn set_log_level(level: LogLevel) {
    let _ = LOG_LEVEL.set(level);
}

/// Log an action with a message
/// Format: `[action] message`
///
/// # Example
/// ```
/// stdio::log("install", "fetching archive...");
/// // Output: [install] fetching archive...
/// ```
pub fn log(action: &str, message: &str) {
    if log_level() >= LogLevel::Info {
        emit_line(&format!("[{}] {}", action, message));
    }
}

/// Log an error. Always shown.
pub fn error(action: &str, message: &str) {
    emit_line(&format!("[{}] {}", action, message));
}

/// Format: `[ok] message`
pub fn success(message: &str) {
    if log_level() >= LogLevel::Info {
        emit_line(&format!("[ok] {}", message));
    }
}

/// Info line with label
/// Format: `  label      value`
///
/// # Example
/// ```
/// stdio::info("workers", "2");
/// // Output:   workers    2
/// ```
pub fn info(label: &str, value: &str) {
    if log_level() >= LogLevel::Info {
        emit_line(&format!("  {:<10} {}", label, value));
    }
}

/// Detail line with arrow
/// Format: `    -> message`
pub fn detail(message: &str) {
    if log_level() >= LogLevel::Info {
        emit_line(&format!("    -> {}", message));
    }
}

/// Debug log (only shown when LOG_LEVEL=debug)
pub fn debug(action: &str, message: &str) {
    if log_level() >= LogLevel::Debug {
        emit_line(&format!("[{}] {}", action, message));
    }
}

/// Human readable byte count, e.g. `12.4 MiB`.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from_str("error"), LogLevel::Error);
        assert_eq!(LogLevel::from_str("info"), LogLevel::Info);
        assert_eq!(LogLevel::from_str("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("DEBUG"), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("unknown"), LogLevel::Info);
    }

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.0 KiB");
        assert_eq!(human_bytes(5 * 1024 * 1024 + 512 * 1024), "5.5 MiB");
    }
}
