use serde::Serialize;
use std::cell::RefCell;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Severity levels accepted by the collector logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Returns the canonical uppercase representation.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_uppercase().as_str() {
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARN" => Some(LogLevel::Warn),
            "ERROR" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rotation policy for file targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRotationPolicy {
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for LogRotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 4 << 20,
            max_files: 4,
        }
    }
}

/// Errors emitted while opening log targets.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open log file {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
}

#[derive(Serialize)]
struct LogLine<'a> {
    ts: u64,
    level: &'a str,
    component: &'a str,
    message: &'a str,
}

enum LogTarget {
    Stderr,
    File {
        path: PathBuf,
        policy: LogRotationPolicy,
        file: File,
        bytes_written: u64,
    },
}

/// JSON-line logger. One line per entry: timestamp (seconds), level,
/// component, message. File targets rotate by size, keeping a bounded set
/// of numbered segments next to the active file.
pub struct CollectorLogger {
    level: LogLevel,
    target: LogTarget,
}

impl CollectorLogger {
    pub fn stderr(level: LogLevel) -> Self {
        Self {
            level,
            target: LogTarget::Stderr,
        }
    }

    pub fn file(
        path: PathBuf,
        level: LogLevel,
        policy: LogRotationPolicy,
    ) -> Result<Self, LoggingError> {
        let file = open_append(&path)?;
        let bytes_written = file.metadata().map(|meta| meta.len()).unwrap_or(0);
        Ok(Self {
            level,
            target: LogTarget::File {
                path,
                policy,
                file,
                bytes_written,
            },
        })
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn set_level(&mut self, level: LogLevel) {
        self.level = level;
    }

    pub fn log(&mut self, level: LogLevel, component: &str, message: &str) {
        if level < self.level {
            return;
        }
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let line = LogLine {
            ts,
            level: level.as_str(),
            component,
            message,
        };
        let Ok(mut encoded) = serde_json::to_string(&line) else {
            return;
        };
        encoded.push('\n');
        // A logging failure must never take down collection.
        let _ = self.write_line(encoded.as_bytes());
    }

    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        match &mut self.target {
            LogTarget::Stderr => io::stderr().write_all(line),
            LogTarget::File {
                path,
                policy,
                file,
                bytes_written,
            } => {
                if *bytes_written + line.len() as u64 > policy.max_bytes {
                    rotate(path, policy.max_files);
                    *file = open_append(path)
                        .map_err(|_| io::Error::new(io::ErrorKind::Other, "reopen failed"))?;
                    *bytes_written = 0;
                }
                file.write_all(line)?;
                *bytes_written += line.len() as u64;
                Ok(())
            }
        }
    }
}

fn open_append(path: &Path) -> Result<File, LoggingError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LoggingError::Open {
            path: path.to_path_buf(),
            source,
        })
}

fn segment_path(path: &Path, idx: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{idx}"));
    PathBuf::from(name)
}

fn rotate(path: &Path, max_files: usize) {
    if max_files == 0 {
        let _ = fs::remove_file(path);
        return;
    }
    let _ = fs::remove_file(segment_path(path, max_files));
    for idx in (1..max_files).rev() {
        let _ = fs::rename(segment_path(path, idx), segment_path(path, idx + 1));
    }
    let _ = fs::rename(path, segment_path(path, 1));
}

/// Cloneable handle shared across components; the process is single
/// threaded so interior mutability is sufficient.
#[derive(Clone)]
pub struct LogHandle {
    inner: Rc<RefCell<CollectorLogger>>,
}

impl LogHandle {
    pub fn new(logger: CollectorLogger) -> Self {
        Self {
            inner: Rc::new(RefCell::new(logger)),
        }
    }

    pub fn debug(&self, component: &str, message: &str) {
        self.inner
            .borrow_mut()
            .log(LogLevel::Debug, component, message);
    }

    pub fn info(&self, component: &str, message: &str) {
        self.inner
            .borrow_mut()
            .log(LogLevel::Info, component, message);
    }

    pub fn warn(&self, component: &str, message: &str) {
        self.inner
            .borrow_mut()
            .log(LogLevel::Warn, component, message);
    }

    pub fn error(&self, component: &str, message: &str) {
        self.inner
            .borrow_mut()
            .log(LogLevel::Error, component, message);
    }

    pub fn set_level(&self, level: LogLevel) {
        self.inner.borrow_mut().set_level(level);
    }
}
