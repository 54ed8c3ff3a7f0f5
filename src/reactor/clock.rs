use std::fs;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Monotonic clock driving the timer queue, in milliseconds.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Production clock anchored at process start.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Wall-clock and uptime view used for event stamping and boot-time
/// derivation. Split from [`Clock`] so tests can shift wall time without
/// disturbing timer deadlines.
pub trait TimeSource {
    /// Seconds since the Unix epoch.
    fn wall_seconds(&self) -> u64;
    /// Seconds since system boot.
    fn uptime_seconds(&self) -> u64;
}

/// Reads wall time from the OS and uptime from `/proc/uptime`.
#[derive(Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn wall_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn uptime_seconds(&self) -> u64 {
        let Ok(text) = fs::read_to_string("/proc/uptime") else {
            return 0;
        };
        text.split_whitespace()
            .next()
            .and_then(|field| field.split('.').next())
            .and_then(|secs| secs.parse().ok())
            .unwrap_or(0)
    }
}
