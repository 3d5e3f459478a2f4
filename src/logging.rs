//! Logging utilities for the hotplug service.
//!
//! Provides file-based and console logging with automatic log file rotation by date.
//! Decisions go to `logs/YYYYMMDD.log`, collaborator failures to `logs/YYYYMMDD.fail.log`.

use chrono::{DateTime, Datelike, Local};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::PathBuf,
};

/// Global timestamp buffer, updated each loop iteration.
pub static LOCALTIME_BUFFER: Lazy<Mutex<DateTime<Local>>> = Lazy::new(|| Mutex::new(Local::now()));

/// Failure keys already written to the fail log (to avoid repeating the same error every cycle).
pub static FAIL_SET: Lazy<Mutex<FxHashSet<String>>> = Lazy::new(|| Mutex::new(FxHashSet::default()));

/// Whether to output to console instead of log files. Tests always use the console.
static USE_CONSOLE: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(cfg!(test)));

/// Main log file handle. `None` when the file could not be opened.
static LOG_FILE: Lazy<Mutex<Option<File>>> = Lazy::new(|| Mutex::new(open_log_file("")));

/// Failure log file handle.
static FAIL_LOG_FILE: Lazy<Mutex<Option<File>>> = Lazy::new(|| Mutex::new(open_log_file(".fail")));

/// Returns a reference to the console mode flag.
pub fn use_console() -> &'static Mutex<bool> {
    &USE_CONSOLE
}

/// Generates the log file path based on current date.
fn get_log_path(suffix: &str) -> PathBuf {
    let (year, month, day) = {
        let time = LOCALTIME_BUFFER.lock();
        (time.year(), time.month(), time.day())
    };
    let log_dir = PathBuf::from("logs");
    if !log_dir.exists() {
        let _ = fs::create_dir_all(&log_dir);
    }
    log_dir.join(format!("{:04}{:02}{:02}{}.log", year, month, day, suffix))
}

fn open_log_file(suffix: &str) -> Option<File> {
    OpenOptions::new().append(true).create(true).open(get_log_path(suffix)).ok()
}

/// Macro for convenient logging with format strings.
#[macro_export]
macro_rules! log {
    ($($arg:tt)*) => {
        $crate::logging::log_message(format!($($arg)*).as_str())
    };
}

fn write_line(file: &Mutex<Option<File>>, line: &str) {
    if *use_console().lock() {
        println!("{}", line);
    } else if let Some(file) = file.lock().as_mut() {
        let _ = writeln!(file, "{}", line);
    } else {
        eprintln!("{}", line);
    }
}

fn time_prefix() -> String {
    LOCALTIME_BUFFER.lock().format("%H:%M:%S").to_string()
}

/// Logs a message with prefix added to either console or log file based on current mode.
pub fn log_message(args: &str) {
    write_line(&LOG_FILE, &format!("[{}]{}", time_prefix(), args));
}

/// Logs a message to the fail log.
pub fn log_to_fail(msg: &str) {
    write_line(&FAIL_LOG_FILE, &format!("[{}]{}", time_prefix(), msg));
}

/// Logs a failure once per `key` until [`clear_failure`] is called for that key.
///
/// Returns true when the message was written.
pub fn log_failure_once(key: &str, msg: &str) -> bool {
    if FAIL_SET.lock().insert(key.to_string()) {
        log_to_fail(msg);
        true
    } else {
        false
    }
}

/// Forgets every failure key starting with `prefix`, so the next failure is logged again.
pub fn clear_failure(prefix: &str) {
    let mut set = FAIL_SET.lock();
    if !set.is_empty() {
        set.retain(|key| !key.starts_with(prefix));
    }
}

/// Refreshes the timestamp buffer used as log prefix.
pub fn refresh_localtime() {
    *LOCALTIME_BUFFER.lock() = Local::now();
}

/// Flushes both log files.
pub fn flush() {
    for file in [&LOG_FILE, &FAIL_LOG_FILE] {
        if let Some(file) = file.lock().as_mut() {
            let _ = file.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_logged_once_until_cleared() {
        assert!(log_failure_once("test-cpu7:online:EBUSY", "cpu7 busy"));
        assert!(!log_failure_once("test-cpu7:online:EBUSY", "cpu7 busy"));
        clear_failure("test-cpu7:");
        assert!(log_failure_once("test-cpu7:online:EBUSY", "cpu7 busy"));
        clear_failure("test-cpu7:");
    }

    #[test]
    fn test_log_in_match_arm() {
        for value in [Some(3), None] {
            match value {
                Some(v) => log!("value {}", v),
                None => log!("no value"),
            }
        }
    }
}
