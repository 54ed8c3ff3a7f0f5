use crate::reactor::TimeSource;
use crate::store::db::BootIdentity;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

/// Tracks the boot/session identity file. The file holds one line,
/// `<boot-generation> <multiplier>`; it is consumed once and the parsed
/// identity held in memory. Rows stored before the identity is known carry
/// placeholder zeroes and are backfilled retroactively.
pub struct IdentityTracker {
    path: Option<PathBuf>,
    identity: Option<BootIdentity>,
}

impl IdentityTracker {
    pub fn new(path: Option<PathBuf>) -> Self {
        let mut tracker = Self {
            path,
            identity: None,
        };
        let _ = tracker.poll();
        tracker
    }

    pub fn identity(&self) -> Option<BootIdentity> {
        self.identity
    }

    /// Re-reads the identity file when the identity is still unknown.
    /// Returns the identity the first time it becomes readable.
    pub fn poll(&mut self) -> Option<BootIdentity> {
        if self.identity.is_some() {
            return None;
        }
        let path = self.path.as_ref()?;
        let text = fs::read_to_string(path).ok()?;
        let identity = parse_identity(&text)?;
        self.identity = Some(identity);
        Some(identity)
    }
}

fn parse_identity(text: &str) -> Option<BootIdentity> {
    let mut fields = text.split_whitespace();
    let count = fields.next()?.parse().ok()?;
    let multiplier = fields.next()?.parse().ok()?;
    Some(BootIdentity { count, multiplier })
}

/// Outcome of a validation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Validation already succeeded earlier in this process.
    AlreadyValid,
    /// Validation succeeded now; stored rows must be shifted by the delta
    /// (seconds) between the assumed and the confirmed boot time.
    Validated { delta_seconds: i64 },
    /// The trust marker is still missing; export stays deferred.
    NotYet,
}

/// Gates export on a trustworthy wall clock.
///
/// At construction the boot time is derived as wall clock minus uptime and
/// recorded as the assumed value. Validation requires the external trust
/// marker (when configured) to exist; once it does, the boot time is
/// re-derived and the delta against the assumption is reported exactly once
/// so rows written before time synchronization can be repaired. File-based
/// exports never need repair because export is gated on validation.
pub struct TimestampValidator {
    time: Rc<dyn TimeSource>,
    marker_path: Option<PathBuf>,
    assumed_boot: i64,
    validated: bool,
}

impl TimestampValidator {
    pub fn new(time: Rc<dyn TimeSource>, marker_path: Option<PathBuf>) -> Self {
        let assumed_boot = derive_boot(time.as_ref());
        Self {
            time,
            marker_path,
            assumed_boot,
            validated: false,
        }
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    pub fn try_validate(&mut self) -> ValidationOutcome {
        if self.validated {
            return ValidationOutcome::AlreadyValid;
        }
        if let Some(marker) = &self.marker_path {
            if !marker.exists() {
                return ValidationOutcome::NotYet;
            }
        }
        let confirmed_boot = derive_boot(self.time.as_ref());
        self.validated = true;
        ValidationOutcome::Validated {
            delta_seconds: confirmed_boot - self.assumed_boot,
        }
    }
}

fn derive_boot(time: &dyn TimeSource) -> i64 {
    time.wall_seconds() as i64 - time.uptime_seconds() as i64
}

/// Precondition gate guarding every export attempt: a validated wall-clock
/// timestamp, and a known boot identity when one is configured. Not an
/// error state; export is simply deferred and the gate re-checked from the
/// maintenance hook until it opens.
pub struct ExportGate {
    identity: IdentityTracker,
    validator: TimestampValidator,
    identity_required: bool,
}

impl ExportGate {
    pub fn new(
        identity: IdentityTracker,
        validator: TimestampValidator,
        identity_required: bool,
    ) -> Self {
        Self {
            identity,
            validator,
            identity_required,
        }
    }

    pub fn identity(&self) -> Option<BootIdentity> {
        self.identity.identity()
    }

    /// Re-reads the identity file; returns the identity when it first
    /// becomes known so placeholder rows can be backfilled.
    pub fn poll_identity(&mut self) -> Option<BootIdentity> {
        self.identity.poll()
    }

    pub fn try_validate(&mut self) -> ValidationOutcome {
        self.validator.try_validate()
    }

    pub fn is_open(&self) -> bool {
        self.validator.is_validated()
            && (!self.identity_required || self.identity.identity().is_some())
    }
}

/// Export watermark for the session group, persisted across restarts so a
/// restarted collector resumes where the last confirmed export ended.
pub struct ExportWatermark {
    path: Option<PathBuf>,
    value: u64,
}

impl ExportWatermark {
    pub fn load(path: Option<PathBuf>) -> Self {
        let value = path
            .as_ref()
            .and_then(|p| fs::read_to_string(p).ok())
            .and_then(|text| text.trim().parse().ok())
            .unwrap_or(0);
        Self { path, value }
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    /// Advances the watermark after a confirmed export and persists it.
    /// Persistence failures are non-fatal: the watermark only trims the
    /// next export window, it never guards correctness.
    pub fn advance(&mut self, value: u64) {
        if value <= self.value {
            return;
        }
        self.value = value;
        self.persist();
    }

    /// Applies the timestamp-repair delta so the watermark keeps matching
    /// the shifted rows. A backward shift must lower the watermark or rows
    /// below it would never be exported.
    pub fn shift(&mut self, delta_seconds: i64) {
        if delta_seconds == 0 || self.value == 0 {
            return;
        }
        self.value = self.value.saturating_add_signed(delta_seconds);
        self.persist();
    }

    fn persist(&self) {
        if let Some(path) = &self.path {
            let _ = fs::write(path, format!("{}\n", self.value));
        }
    }
}
