// src/logging.rs
//
// `tlog!`: local-time stamped lines on stderr, optionally copied to a file.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Name of the link that tracks the newest log file
const LINK_NAME: &str = "tripdesk.log";

static LOG_FILE: Mutex<Option<File>> = Mutex::new(None);

fn stamp() -> impl fmt::Display {
    chrono::Local::now().format("%H:%M:%S%.3f")
}

/// Write one stamped line. Use `tlog!` rather than calling this directly.
pub(crate) fn emit(args: fmt::Arguments<'_>) {
    let line = format!("{} {}", stamp(), args);
    eprintln!("{}", line);
    if let Ok(mut slot) = LOG_FILE.lock() {
        if let Some(file) = slot.as_mut() {
            let _ = writeln!(file, "{}", line);
        }
    }
}

/// Start copying log lines into `<log_dir>/<YYYYmmdd-HHMMSS>-tripdesk.log`.
/// On Unix, `<log_dir>/tripdesk.log` is repointed at the new file.
pub fn init_file_logging(log_dir: &Path) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(log_dir)?;

    let name = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-tripdesk.log")
        .to_string();
    let path = log_dir.join(&name);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    #[cfg(unix)]
    {
        let link = log_dir.join(LINK_NAME);
        let _ = std::fs::remove_file(&link);
        if let Err(e) = std::os::unix::fs::symlink(&name, &link) {
            emit(format_args!("[logging] Could not link {}: {}", LINK_NAME, e));
        }
    }

    if let Ok(mut slot) = LOG_FILE.lock() {
        *slot = Some(file);
    }
    emit(format_args!("[logging] Writing to {}", path.display()));
    Ok(path)
}

/// Close the log file; later lines go to stderr only.
pub fn stop_file_logging() {
    let closed = LOG_FILE
        .lock()
        .map(|mut slot| slot.take().is_some())
        .unwrap_or(false);
    if closed {
        emit(format_args!("[logging] File logging stopped"));
    }
}

/// `tlog!("[component] message {}", arg)`
macro_rules! tlog {
    ($($arg:tt)*) => {
        $crate::logging::emit(format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_logging_writes_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = init_file_logging(&dir.path().join("logs")).unwrap();
        tlog!("[test] hello {}", 42);
        stop_file_logging();
        tlog!("[test] after stop");

        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with("-tripdesk.log"))
            .unwrap_or(false));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[test] hello 42"));
        assert!(!content.contains("[test] after stop"));

        #[cfg(unix)]
        assert_eq!(
            std::fs::read_to_string(dir.path().join("logs").join(LINK_NAME)).unwrap(),
            content
        );
    }
}
