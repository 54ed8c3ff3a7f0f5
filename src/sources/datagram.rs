use crate::event::bus::EventBus;
use crate::observability::logging::LogHandle;
use crate::reactor::core::IoHandler;
use crate::reactor::poll::{Multiplexer, ReactorError};
use crate::reactor::{Reactor, READABLE};
use crate::sources::decode::decode_frame;
use std::cell::Cell;
use std::io;
use std::net::UdpSocket;
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;

/// Datagram-based source: one JSON frame per datagram, as delivered by the
/// kernel feed and pub/sub relay bridges. The socket is non-blocking; the
/// readiness callback drains it completely each cycle.
pub struct DatagramSource {
    name: String,
    socket: UdpSocket,
    bus: Rc<EventBus>,
    log: LogHandle,
    frames_decoded: Cell<u64>,
    frames_rejected: Cell<u64>,
}

impl DatagramSource {
    pub fn bind(
        name: impl Into<String>,
        listen: &str,
        bus: Rc<EventBus>,
        log: LogHandle,
    ) -> io::Result<Rc<Self>> {
        let socket = UdpSocket::bind(listen)?;
        socket.set_nonblocking(true)?;
        Ok(Rc::new(Self {
            name: name.into(),
            socket,
            bus,
            log,
            frames_decoded: Cell::new(0),
            frames_rejected: Cell::new(0),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attach<M: Multiplexer>(
        self: &Rc<Self>,
        reactor: &Reactor<M>,
    ) -> Result<(), ReactorError> {
        reactor.register(self.socket.as_raw_fd(), READABLE, Rc::clone(self) as Rc<dyn IoHandler>)
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded.get()
    }

    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected.get()
    }
}

impl IoHandler for DatagramSource {
    fn on_ready(&self, _fd: RawFd, _mask: u8) {
        let mut buf = [0u8; 8192];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, _peer)) => match decode_frame(&buf[..len]) {
                    Ok(event) => {
                        self.frames_decoded.set(self.frames_decoded.get() + 1);
                        self.bus.publish(event);
                    }
                    Err(err) => {
                        self.frames_rejected.set(self.frames_rejected.get() + 1);
                        self.log
                            .warn(&self.name, &format!("frame rejected: {err}"));
                    }
                },
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    // Transient read error: no event this cycle, keep going.
                    self.log.warn(&self.name, &format!("recv failed: {err}"));
                    break;
                }
            }
        }
    }
}
