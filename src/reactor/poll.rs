use std::io;
use std::os::unix::io::RawFd;
use thiserror::Error;

/// Readiness bits reported to I/O handlers.
pub const READABLE: u8 = 0x1;
pub const WRITABLE: u8 = 0x2;
pub const HANGUP: u8 = 0x4;

/// Errors surfaced by reactor-level registration and waiting.
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("descriptor {0} is already registered")]
    AlreadyRegistered(RawFd),
    #[error("descriptor {0} is not registered")]
    NotRegistered(RawFd),
    #[error("multiplexer wait failed: {0}")]
    Wait(#[source] io::Error),
}

/// Readiness multiplexer seam. The production implementation wraps
/// `poll(2)`; tests drive the reactor with a scripted implementation.
pub trait Multiplexer {
    fn register(&mut self, fd: RawFd, mask: u8) -> Result<(), ReactorError>;
    fn deregister(&mut self, fd: RawFd) -> Result<(), ReactorError>;

    /// Blocks for at most `timeout_ms` (`None` = until an event arrives) and
    /// appends ready `(fd, mask)` pairs to `ready`. Returns the number of
    /// ready descriptors; a timeout yields zero.
    fn wait(&mut self, timeout_ms: Option<u64>, ready: &mut Vec<(RawFd, u8)>)
        -> Result<usize, ReactorError>;
}

/// `poll(2)`-backed multiplexer. Descriptor count is small (one or two per
/// source), so the pollfd array is rebuilt per registration change only.
pub struct PollMultiplexer {
    fds: Vec<libc::pollfd>,
}

impl PollMultiplexer {
    pub fn new() -> Self {
        Self { fds: Vec::new() }
    }

    fn events_for(mask: u8) -> i16 {
        let mut events = 0;
        if mask & READABLE != 0 {
            events |= libc::POLLIN;
        }
        if mask & WRITABLE != 0 {
            events |= libc::POLLOUT;
        }
        events
    }

    fn mask_for(revents: i16) -> u8 {
        let mut mask = 0;
        if revents & (libc::POLLIN | libc::POLLPRI) != 0 {
            mask |= READABLE;
        }
        if revents & libc::POLLOUT != 0 {
            mask |= WRITABLE;
        }
        if revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            mask |= HANGUP;
        }
        mask
    }
}

impl Default for PollMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Multiplexer for PollMultiplexer {
    fn register(&mut self, fd: RawFd, mask: u8) -> Result<(), ReactorError> {
        if self.fds.iter().any(|entry| entry.fd == fd) {
            return Err(ReactorError::AlreadyRegistered(fd));
        }
        self.fds.push(libc::pollfd {
            fd,
            events: Self::events_for(mask),
            revents: 0,
        });
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> Result<(), ReactorError> {
        match self.fds.iter().position(|entry| entry.fd == fd) {
            Some(pos) => {
                self.fds.remove(pos);
                Ok(())
            }
            None => Err(ReactorError::NotRegistered(fd)),
        }
    }

    fn wait(
        &mut self,
        timeout_ms: Option<u64>,
        ready: &mut Vec<(RawFd, u8)>,
    ) -> Result<usize, ReactorError> {
        let timeout = match timeout_ms {
            Some(ms) => ms.min(i32::MAX as u64) as i32,
            None => -1,
        };
        for entry in &mut self.fds {
            entry.revents = 0;
        }
        let rc = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout,
            )
        };
        if rc < 0 {
            return Err(ReactorError::Wait(io::Error::last_os_error()));
        }
        let mut count = 0;
        for entry in &self.fds {
            if entry.revents != 0 {
                ready.push((entry.fd, Self::mask_for(entry.revents)));
                count += 1;
            }
        }
        Ok(count)
    }
}
