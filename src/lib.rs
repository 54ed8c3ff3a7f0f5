//! Telemetry collector runtime for mobile-network nodes: a single-threaded
//! reactor, a sequencing fan-out event bus, and a durable batched-export
//! sink backed by an embedded relational store.

pub mod app;
pub mod config;
pub mod event;
pub mod observability;
pub mod reactor;
pub mod sinks;
pub mod sources;
pub mod store;

pub use config::{ConfigError, ConfigView};
pub use event::{
    Category, Event, EventBus, EventKind, InterfaceUpdate, MonitorSample, PositionFix, RelayFrame,
    SessionEvent, SessionParam, SharedSequence, Sink, SystemEvent,
};
pub use observability::{
    CollectorLogger, LogHandle, LogLevel, LogRotationPolicy, LoggingError, ReactorTelemetry,
    StoreTelemetry,
};
pub use reactor::{
    Clock, IoHandler, IterationHook, Multiplexer, PollMultiplexer, Reactor, ReactorError,
    Scheduler, SystemClock, SystemTimeSource, TimeSource, TimerHandler, TimerQueue, TimerToken,
    HANGUP, READABLE, WRITABLE,
};
pub use sinks::{FileSink, RelaySink};
pub use sources::{decode_frame, decode_value, DatagramSource, DecodeError, LineSource};
pub use store::{
    packed_state_field, BatchPublisher, BootIdentity, ExportBatch, ExportError, ExportFormat,
    ExportGate, ExportWatermark, FilePublisher, GpsFixRow, IdentityTracker, MetaStore,
    MonitorSampleRow, NetworkEventRow, ReconcileOutcome, Reconciler, RowIdentity, SessionKey,
    SessionStateRow, StoreError, StoreOptions, StoreSink, StoreSinkConfig, StoreSinkInitError,
    SystemEventRow, TableGroup, TimestampValidator, ValidationOutcome, DEFAULT_FLUSH_EVENT_LIMIT,
    DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_GPS_MIN_INTERVAL_SECS, DEFAULT_RETRY_DELAY_MS,
    FIRST_OBSERVATION_WINDOW_SECS, MIN_MONITOR_SESSION_START,
};
