//! FILENAME: cube-demo/src/logging.rs
// PURPOSE: Unified log output for the demo and the cube engine's `log` records.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record};
use once_cell::sync::Lazy;

// ============================================================================
// UNIFIED LOGGING SYSTEM
// ============================================================================

/// Global sequence counter; every line gets the next number.
static LOG_SEQ: AtomicU64 = AtomicU64::new(0);

/// Optional log file, mirrored to stderr.
static LOG_FILE: Lazy<Mutex<Option<File>>> = Lazy::new(|| Mutex::new(None));

static LOGGER: UnifiedLogger = UnifiedLogger;

pub fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst) + 1
}

fn level_code(level: Level) -> &'static str {
    match level {
        Level::Error => "E",
        Level::Warn => "W",
        Level::Info => "I",
        Level::Debug => "D",
        Level::Trace => "T",
    }
}

/// Level from `CUBE_LOG` (error, warn, info, debug, trace, off). Defaults to info.
pub fn level_from_env() -> LevelFilter {
    std::env::var("CUBE_LOG")
        .ok()
        .and_then(|v| v.trim().parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info)
}

/// Installs the logger. With a path, lines are also written to that file
/// (truncated on start).
pub fn init(log_path: Option<&Path>) -> Result<Option<PathBuf>, String> {
    let opened = match log_path {
        Some(path) => {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
                .map_err(|e| format!("Failed to create log file {:?}: {}", path, e))?;
            let mut guard = LOG_FILE.lock().map_err(|e| format!("Lock error: {}", e))?;
            *guard = Some(file);
            Some(path.to_path_buf())
        }
        None => None,
    };

    log::set_logger(&LOGGER).map_err(|e| format!("Logger already set: {}", e))?;
    log::set_max_level(level_from_env());
    Ok(opened)
}

/// Write a log line in unified format: `seq|LEVEL|CATEGORY|message`.
pub fn write_log(level: &str, category: &str, message: &str) {
    let seq = next_seq();
    let line = format!("{}|{}|{}|{}", seq, level, category, message);

    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some(ref mut file) = *guard {
            if let Err(e) = writeln!(file, "{}", line) {
                eprintln!("[LOG_ERROR] Failed to write: {}", e);
            }
            let _ = file.flush();
        }
    }

    eprintln!("{}", line);
}

/// Write an ENTER line for the start of a phase.
pub fn write_log_enter(level: &str, category: &str, phase: &str, params: &str) {
    let message = if params.is_empty() {
        format!("ENTER {}", phase)
    } else {
        format!("ENTER {} {}", phase, params)
    };
    write_log(level, category, &message);
}

/// Write an EXIT line for the end of a phase.
pub fn write_log_exit(level: &str, category: &str, phase: &str, result: &str) {
    let message = if result.is_empty() {
        format!("EXIT {}", phase)
    } else {
        format!("EXIT {} {}", phase, result)
    };
    write_log(level, category, &message);
}

// ============================================================================
// LOG FACADE BRIDGE
// ============================================================================

/// Routes `log` records (e.g. the engine's "CUBE" target) into the unified format.
struct UnifiedLogger;

impl Log for UnifiedLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            write_log(level_code(record.level()), record.target(), &record.args().to_string());
        }
    }

    fn flush(&self) {
        if let Ok(mut guard) = LOG_FILE.lock() {
            if let Some(ref mut file) = *guard {
                let _ = file.flush();
            }
        }
    }
}

// ============================================================================
// MACRO DEFINITIONS & EXPORTS
// ============================================================================

#[macro_export]
macro_rules! log_enter_info {
    ($cat:expr, $phase:expr) => {
        $crate::logging::write_log_enter("I", $cat, $phase, "")
    };
    ($cat:expr, $phase:expr, $($arg:tt)*) => {
        $crate::logging::write_log_enter("I", $cat, $phase, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_exit_info {
    ($cat:expr, $phase:expr) => {
        $crate::logging::write_log_exit("I", $cat, $phase, "")
    };
    ($cat:expr, $phase:expr, $($arg:tt)*) => {
        $crate::logging::write_log_exit("I", $cat, $phase, &format!($($arg)*))
    };
}

pub use log_enter_info;
pub use log_exit_info;
