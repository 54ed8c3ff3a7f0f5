//! Durable batched-export engine backing the relational sink.

pub mod db;
pub mod export;
pub mod identity;
pub mod reconcile;
pub mod schema;
pub mod sink;

pub use db::{
    BootIdentity, GpsFixRow, MetaStore, MonitorSampleRow, NetworkEventRow, RowIdentity, SessionKey,
    SessionStateRow, StoreError, SystemEventRow,
};
pub use export::{
    BatchPublisher, ExportBatch, ExportError, ExportFormat, FilePublisher, TableGroup,
};
pub use identity::{
    ExportGate, ExportWatermark, IdentityTracker, TimestampValidator, ValidationOutcome,
};
pub use reconcile::{
    packed_state_field, ReconcileOutcome, Reconciler, FIRST_OBSERVATION_WINDOW_SECS,
};
pub use sink::{
    StoreOptions, StoreSink, StoreSinkConfig, StoreSinkInitError, DEFAULT_FLUSH_EVENT_LIMIT,
    DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_GPS_MIN_INTERVAL_SECS, DEFAULT_RETRY_DELAY_MS,
    MIN_MONITOR_SESSION_START,
};
