use crate::config::{ConfigError, ConfigView};
use crate::event::bus::Sink;
use crate::event::Event;
use crate::observability::logging::LogHandle;
use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::rc::Rc;

/// Stateless flat-file sink: every event becomes one JSON line appended to
/// the configured dump file.
pub struct FileSink {
    path: PathBuf,
    file: RefCell<File>,
    log: LogHandle,
}

impl FileSink {
    pub fn from_config(view: &ConfigView, log: LogHandle) -> Result<Rc<Self>, ConfigError> {
        let path = view.required_path("path")?;
        Self::open(path, log).map_err(|err| ConfigError::Invalid {
            key: "path".to_string(),
            reason: err.to_string(),
        })
    }

    pub fn open(path: PathBuf, log: LogHandle) -> io::Result<Rc<Self>> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Rc::new(Self {
            path,
            file: RefCell::new(file),
            log,
        }))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Sink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    fn handle(&self, event: &Event) {
        let Ok(mut line) = serde_json::to_string(event) else {
            return;
        };
        line.push('\n');
        if let Err(err) = self.file.borrow_mut().write_all(line.as_bytes()) {
            self.log.warn("file", &format!("dump write failed: {err}"));
        }
    }
}
