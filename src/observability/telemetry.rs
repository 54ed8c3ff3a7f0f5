use serde::Serialize;

/// Counters accumulated by the reactor loop.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReactorTelemetry {
    pub iterations: u64,
    pub timers_fired: u64,
    pub transient_errors: u64,
}

/// Counters accumulated by the durable store sink.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct StoreTelemetry {
    pub session_rows: u64,
    pub gps_rows: u64,
    pub system_rows: u64,
    pub monitor_rows: u64,
    pub synthetic_events: u64,
    pub exports_completed: u64,
    pub exports_failed: u64,
    pub exports_deferred: u64,
    pub rows_rejected: u64,
    pub gps_throttled: u64,
}

impl StoreTelemetry {
    pub fn rows_total(&self) -> u64 {
        self.session_rows + self.gps_rows + self.system_rows + self.monitor_rows
    }
}
