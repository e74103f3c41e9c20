//! Session logger: all log output goes to one file in the OS data directory.
//!
//! The file is **truncated at each launch**, so it only ever holds the
//! most recent run. Lines carry the time since the session started, which
//! is what matters when reading render and segmentation timings.
//!
//! Log location:
//!   Windows:  `%APPDATA%\TextBehind\textbehind.log`
//!   Linux:    `$XDG_DATA_HOME/TextBehind/textbehind.log` (or `~/.local/share/...`)
//!   macOS:    `~/Library/Application Support/TextBehind/textbehind.log`
//!
//! Use the `log_info!` / `log_warn!` / `log_err!` macros anywhere in the
//! crate. Before `init()` is called they are silent no-ops, so library
//! users and tests pay nothing for them.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

struct Session {
    file: Mutex<File>,
    path: PathBuf,
    started: Instant,
}

static SESSION: OnceLock<Session> = OnceLock::new();
static ECHO_STDERR: AtomicBool = AtomicBool::new(false);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

/// Path of the active session log, once `init` has succeeded.
pub fn log_path() -> Option<&'static Path> {
    SESSION.get().map(|s| s.path.as_path())
}

/// Mirror every log line to stderr as well (CLI `--verbose`).
pub fn set_echo(enabled: bool) {
    ECHO_STDERR.store(enabled, Ordering::Relaxed);
}

fn emit(line: &str) {
    if ECHO_STDERR.load(Ordering::Relaxed) {
        eprintln!("{}", line);
    }
    if let Some(session) = SESSION.get()
        && let Ok(mut file) = session.file.lock()
    {
        let _ = writeln!(file, "{}", line);
    }
}

/// Append one level-tagged line. I/O errors are swallowed.
pub fn write(level: Level, msg: &str) {
    let elapsed = SESSION
        .get()
        .map(|s| s.started.elapsed().as_secs_f64())
        .unwrap_or(0.0);
    emit(&format!("[+{:>9.3}s] [{}] {}", elapsed, level.tag(), msg));
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Warn, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Error, &format!($($arg)*))
    };
}

/// Start the session log at the default location.
pub fn init() {
    init_at(&default_log_path());
}

/// Start the session log at `path`. Only the first successful call counts.
///
/// Truncates the file, writes a header and chains a panic hook that records
/// the panic before the previous hook runs.
pub fn init_at(path: &Path) {
    if SESSION.get().is_some() {
        return;
    }
    if let Some(dir) = path.parent() {
        let _ = std::fs::create_dir_all(dir);
    }

    let file = match OpenOptions::new().create(true).write(true).truncate(true).open(path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("[logger] cannot open {}: {}", path.display(), e);
            return;
        }
    };
    let session = Session {
        file: Mutex::new(file),
        path: path.to_path_buf(),
        started: Instant::now(),
    };
    if SESSION.set(session).is_err() {
        return;
    }

    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    emit(&format!("=== TextBehind session started (unix {}) ===", unix));
    emit(&format!("log: {}", path.display()));

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write(Level::Error, &format!("panic: {}", info));
        prev(info);
    }));
}

fn default_log_path() -> PathBuf {
    let env_dir = |key: &str| std::env::var_os(key).map(PathBuf::from);
    let base = if cfg!(target_os = "windows") {
        env_dir("APPDATA")
    } else if cfg!(target_os = "macos") {
        env_dir("HOME").map(|h| h.join("Library").join("Application Support"))
    } else {
        env_dir("XDG_DATA_HOME").or_else(|| env_dir("HOME").map(|h| h.join(".local").join("share")))
    };
    base.unwrap_or_else(|| PathBuf::from("."))
        .join("TextBehind")
        .join("textbehind.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_land_in_the_session_file() {
        let path = std::env::temp_dir()
            .join(format!("textbehind-log-{}", std::process::id()))
            .join("session.log");
        init_at(&path);
        // Another test may have won the race to initialise
        let Some(active) = log_path() else { return };
        crate::log_warn!("mask {}x{} rejected", 3, 4);
        let content = std::fs::read_to_string(active).unwrap();
        assert!(content.contains("[WARN] mask 3x4 rejected"));
        assert!(content.contains("session started"));
    }

    #[test]
    fn default_path_ends_in_app_folder() {
        let p = default_log_path();
        assert!(p.ends_with(Path::new("TextBehind").join("textbehind.log")));
    }
}
