use crate::config::{ConfigError, ConfigView};
use crate::event::bus::Sink;
use crate::event::Event;
use crate::observability::logging::LogHandle;
use std::cell::{Cell, RefCell};
use std::io::{self, Write};
use std::net::TcpStream;
use std::rc::Rc;

/// Stateless pub/sub frame sink: republishes each event as a
/// `<category> <json>` line on a connected stream.
///
/// The stream is non-blocking; a frame that cannot be written without
/// blocking is dropped and counted, because the relay feed is lossy by
/// contract and the reactor thread must never stall inside a sink.
pub struct RelaySink {
    stream: RefCell<TcpStream>,
    log: LogHandle,
    frames_sent: Cell<u64>,
    frames_dropped: Cell<u64>,
}

impl RelaySink {
    pub fn from_config(view: &ConfigView, log: LogHandle) -> Result<Rc<Self>, ConfigError> {
        let address = view.required_str("connect")?;
        Self::connect(&address, log).map_err(|err| ConfigError::Invalid {
            key: "connect".to_string(),
            reason: err.to_string(),
        })
    }

    pub fn connect(address: &str, log: LogHandle) -> io::Result<Rc<Self>> {
        let stream = TcpStream::connect(address)?;
        stream.set_nonblocking(true)?;
        Ok(Rc::new(Self {
            stream: RefCell::new(stream),
            log,
            frames_sent: Cell::new(0),
            frames_dropped: Cell::new(0),
        }))
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.get()
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.get()
    }
}

impl Sink for RelaySink {
    fn name(&self) -> &str {
        "relay"
    }

    fn handle(&self, event: &Event) {
        let Ok(body) = serde_json::to_string(event) else {
            return;
        };
        let frame = format!("{} {body}\n", event.category().as_str());
        match self.stream.borrow_mut().write_all(frame.as_bytes()) {
            Ok(()) => self.frames_sent.set(self.frames_sent.get() + 1),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                self.frames_dropped.set(self.frames_dropped.get() + 1);
            }
            Err(err) => {
                self.frames_dropped.set(self.frames_dropped.get() + 1);
                self.log.warn("relay", &format!("frame send failed: {err}"));
            }
        }
    }
}
