//! Single-threaded readiness/timer reactor.

pub mod clock;
pub mod core;
pub mod poll;
pub mod timer;

pub use clock::{Clock, SystemClock, SystemTimeSource, TimeSource};
pub use core::{IoHandler, IterationHook, Reactor};
pub use poll::{Multiplexer, PollMultiplexer, ReactorError, HANGUP, READABLE, WRITABLE};
pub use timer::{Scheduler, TimerHandler, TimerQueue, TimerToken};
