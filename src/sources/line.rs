use crate::event::bus::EventBus;
use crate::observability::logging::LogHandle;
use crate::reactor::core::IoHandler;
use crate::reactor::poll::{Multiplexer, ReactorError};
use crate::reactor::{Reactor, HANGUP, READABLE};
use crate::sources::decode::decode_frame;
use std::cell::{Cell, RefCell};
use std::io::{self, Read};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;

/// Upper bound on one buffered line; a feed that exceeds it is discarded up
/// to the next newline instead of growing without limit.
const MAX_LINE_BYTES: usize = 16 * 1024;

/// Line-oriented stream source: GPS receivers and monitoring agents that
/// speak one JSON frame per line over a local stream connection.
///
/// Reads are non-blocking and partial; the accumulated buffer is an
/// explicit state machine driven by repeated readiness callbacks, so the
/// reactor thread is never stalled by a slow peer.
pub struct LineSource {
    name: String,
    stream: RefCell<TcpStream>,
    buffer: RefCell<Vec<u8>>,
    bus: Rc<EventBus>,
    log: LogHandle,
    closed: Cell<bool>,
    frames_decoded: Cell<u64>,
    frames_rejected: Cell<u64>,
}

impl LineSource {
    pub fn connect(
        name: impl Into<String>,
        address: &str,
        bus: Rc<EventBus>,
        log: LogHandle,
    ) -> io::Result<Rc<Self>> {
        let stream = TcpStream::connect(address)?;
        stream.set_nonblocking(true)?;
        Ok(Rc::new(Self {
            name: name.into(),
            stream: RefCell::new(stream),
            buffer: RefCell::new(Vec::new()),
            bus,
            log,
            closed: Cell::new(false),
            frames_decoded: Cell::new(0),
            frames_rejected: Cell::new(0),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    pub fn attach<M: Multiplexer>(
        self: &Rc<Self>,
        reactor: &Reactor<M>,
    ) -> Result<(), ReactorError> {
        let fd = self.stream.borrow().as_raw_fd();
        reactor.register(fd, READABLE, Rc::clone(self) as Rc<dyn IoHandler>)
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded.get()
    }

    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected.get()
    }

    fn drain_lines(&self) {
        let mut buffer = self.buffer.borrow_mut();
        while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=newline).collect();
            let line = &line[..line.len() - 1];
            let line = match line.last() {
                Some(&b'\r') => &line[..line.len() - 1],
                _ => line,
            };
            if line.is_empty() {
                continue;
            }
            match decode_frame(line) {
                Ok(event) => {
                    self.frames_decoded.set(self.frames_decoded.get() + 1);
                    self.bus.publish(event);
                }
                Err(err) => {
                    self.frames_rejected.set(self.frames_rejected.get() + 1);
                    self.log.warn(&self.name, &format!("line rejected: {err}"));
                }
            }
        }
        if buffer.len() > MAX_LINE_BYTES {
            self.log.warn(&self.name, "oversized line discarded");
            buffer.clear();
        }
    }
}

impl IoHandler for LineSource {
    fn on_ready(&self, _fd: RawFd, mask: u8) {
        if mask & HANGUP != 0 {
            self.closed.set(true);
            self.log.warn(&self.name, "feed closed by peer");
            return;
        }
        let mut chunk = [0u8; 4096];
        loop {
            let read = self.stream.borrow_mut().read(&mut chunk);
            match read {
                Ok(0) => {
                    self.closed.set(true);
                    self.log.warn(&self.name, "feed reached end of stream");
                    break;
                }
                Ok(len) => {
                    self.buffer.borrow_mut().extend_from_slice(&chunk[..len]);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.log.warn(&self.name, &format!("read failed: {err}"));
                    break;
                }
            }
        }
        self.drain_lines();
    }
}
