use crate::config::{ConfigError, ConfigView};
use crate::event::bus::{SharedSequence, Sink};
use crate::event::{
    Event, EventKind, MonitorSample, PositionFix, SessionEvent, SessionParam, SystemEvent,
};
use crate::observability::logging::LogHandle;
use crate::observability::telemetry::StoreTelemetry;
use crate::reactor::timer::{Scheduler, TimerHandler, TimerToken};
use crate::reactor::TimeSource;
use crate::store::db::{MetaStore, RowIdentity, StoreError};
use crate::store::export::{
    BatchPublisher, ExportBatch, ExportError, ExportFormat, FilePublisher, TableGroup,
};
use crate::store::identity::{
    ExportGate, ExportWatermark, IdentityTracker, TimestampValidator, ValidationOutcome,
};
use crate::store::reconcile::Reconciler;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use thiserror::Error;

/// Time from the first unflushed row until the batch is exported.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 5_000;
/// Unflushed-row threshold that triggers an immediate export.
pub const DEFAULT_FLUSH_EVENT_LIMIT: u64 = 10;
/// Fixed delay before a failed export is retried.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
/// Minimum spacing between stored position fixes; some receivers report
/// far more often than the timeline needs.
pub const DEFAULT_GPS_MIN_INTERVAL_SECS: u64 = 10;
/// Monitoring samples whose reported session start predates this are from
/// agents whose clock was never set and are rejected.
pub const MIN_MONITOR_SESSION_START: i64 = 1_400_000_000;

/// Tunables for the durable sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub format: ExportFormat,
    pub flush_interval_ms: u64,
    pub flush_event_limit: u64,
    pub retry_delay_ms: u64,
    pub gps_min_interval_secs: u64,
    pub node_id: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            format: ExportFormat::SqlText,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            flush_event_limit: DEFAULT_FLUSH_EVENT_LIMIT,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            gps_min_interval_secs: DEFAULT_GPS_MIN_INTERVAL_SECS,
            node_id: 0,
        }
    }
}

/// Full configuration for the durable sink, as read from its section.
#[derive(Debug, Clone)]
pub struct StoreSinkConfig {
    pub database: PathBuf,
    pub export_dir: PathBuf,
    pub prefix: String,
    pub options: StoreOptions,
    pub identity_file: Option<PathBuf>,
    pub ntp_marker: Option<PathBuf>,
    pub watermark_file: Option<PathBuf>,
}

impl StoreSinkConfig {
    pub fn from_config(view: &ConfigView) -> Result<Self, ConfigError> {
        let format_name = view.opt_str("format")?.unwrap_or_else(|| "sql".to_string());
        let format = ExportFormat::from_name(&format_name).ok_or(ConfigError::Invalid {
            key: "format".to_string(),
            reason: "expected 'sql' or 'json'".to_string(),
        })?;
        Ok(Self {
            database: view.required_path("database")?,
            export_dir: view.required_path("export_dir")?,
            prefix: view.required_str("prefix")?,
            options: StoreOptions {
                format,
                flush_interval_ms: view
                    .positive_u64_or("flush_interval_ms", DEFAULT_FLUSH_INTERVAL_MS)?,
                flush_event_limit: view
                    .positive_u64_or("flush_event_limit", DEFAULT_FLUSH_EVENT_LIMIT)?,
                retry_delay_ms: view.positive_u64_or("retry_delay_ms", DEFAULT_RETRY_DELAY_MS)?,
                gps_min_interval_secs: view
                    .u64_or("gps_min_interval_secs", DEFAULT_GPS_MIN_INTERVAL_SECS)?,
                node_id: view.u64_or("node_id", 0)? as u32,
            },
            identity_file: view.opt_path("identity_file")?,
            ntp_marker: view.opt_path("ntp_marker")?,
            watermark_file: view.opt_path("watermark_file")?,
        })
    }
}

/// Errors raised while bringing the durable sink up. Fatal for this sink
/// only; the process keeps running with the sinks that initialized.
#[derive(Debug, Error)]
pub enum StoreSinkInitError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
enum GroupExportError {
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

struct SinkState {
    store: MetaStore,
    publisher: Box<dyn BatchPublisher>,
    options: StoreOptions,
    gate: ExportGate,
    watermark: ExportWatermark,
    reconciler: Reconciler,
    unflushed_session: u64,
    unflushed_gps: u64,
    unflushed_system: u64,
    unflushed_monitor: u64,
    newest_session_timestamp: u64,
    last_gps_stored: u64,
    export_failed: bool,
    export_deferred: bool,
    timer: Option<TimerToken>,
    telemetry: StoreTelemetry,
}

impl SinkState {
    fn unflushed_total(&self) -> u64 {
        self.unflushed_session + self.unflushed_gps + self.unflushed_system + self.unflushed_monitor
    }

    fn row_identity(&self) -> RowIdentity {
        RowIdentity {
            node_id: self.options.node_id,
            boot: self.gate.identity(),
        }
    }
}

/// The durable relational sink: accumulates events in the embedded store
/// and exports them in crash-safe batches.
///
/// State machine per table group: accumulating, export-triggered (count
/// threshold or flush timer), publishing (serialize, atomic publish, clear)
/// and, on any durability error, retry-scheduled with a fixed delay. Rows
/// are deleted only after the export file is visible under its permanent
/// name, so no row is ever lost; a deletion failure after a successful
/// publish can duplicate an already-written file, which consumers must
/// tolerate.
pub struct StoreSink {
    state: RefCell<SinkState>,
    scheduler: Scheduler,
    time: Rc<dyn TimeSource>,
    log: LogHandle,
    self_ref: Weak<StoreSink>,
}

impl StoreSink {
    /// Opens the database and wires the production publisher.
    pub fn open(
        config: StoreSinkConfig,
        scheduler: Scheduler,
        sequence: SharedSequence,
        time: Rc<dyn TimeSource>,
        log: LogHandle,
    ) -> Result<Rc<Self>, StoreSinkInitError> {
        let store = MetaStore::open(&config.database)?;
        if config.options.node_id != 0 {
            store.backfill_node_id(config.options.node_id)?;
        }
        let publisher = Box::new(FilePublisher::new(config.export_dir, config.prefix));
        let identity_required = config.identity_file.is_some();
        let gate = ExportGate::new(
            IdentityTracker::new(config.identity_file),
            TimestampValidator::new(Rc::clone(&time), config.ntp_marker),
            identity_required,
        );
        let watermark = ExportWatermark::load(config.watermark_file);
        Ok(Self::assemble(
            store,
            publisher,
            config.options,
            gate,
            watermark,
            scheduler,
            sequence,
            time,
            log,
        ))
    }

    /// Assembles a sink from explicit parts. Tests inject an in-memory
    /// store, scripted publishers, and manual clocks here.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        store: MetaStore,
        publisher: Box<dyn BatchPublisher>,
        options: StoreOptions,
        gate: ExportGate,
        watermark: ExportWatermark,
        scheduler: Scheduler,
        sequence: SharedSequence,
        time: Rc<dyn TimeSource>,
        log: LogHandle,
    ) -> Rc<Self> {
        Rc::new_cyclic(|self_ref| Self {
            state: RefCell::new(SinkState {
                store,
                publisher,
                options,
                gate,
                watermark,
                reconciler: Reconciler::new(sequence),
                unflushed_session: 0,
                unflushed_gps: 0,
                unflushed_system: 0,
                unflushed_monitor: 0,
                newest_session_timestamp: 0,
                last_gps_stored: 0,
                export_failed: false,
                export_deferred: false,
                timer: None,
                telemetry: StoreTelemetry::default(),
            }),
            scheduler,
            time,
            log,
            self_ref: self_ref.clone(),
        })
    }

    pub fn telemetry(&self) -> StoreTelemetry {
        self.state.borrow().telemetry.clone()
    }

    /// Unflushed row counters per group: (session, gps, system, monitor).
    pub fn unflushed(&self) -> (u64, u64, u64, u64) {
        let state = self.state.borrow();
        (
            state.unflushed_session,
            state.unflushed_gps,
            state.unflushed_system,
            state.unflushed_monitor,
        )
    }

    /// Read-only access to the backing store, for tests and tooling.
    pub fn with_store<R>(&self, f: impl FnOnce(&MetaStore) -> R) -> R {
        f(&self.state.borrow().store)
    }

    /// Forces an export attempt, as the flush timer would.
    pub fn flush_now(&self) {
        let mut state = self.state.borrow_mut();
        self.try_export(&mut state, true);
    }

    fn arm_timer(&self, state: &mut SinkState, delay_ms: u64) {
        if state.timer.is_some() {
            return;
        }
        let Some(handler) = self.self_ref.upgrade() else {
            return;
        };
        state.timer = Some(self.scheduler.schedule(delay_ms, None, handler));
    }

    fn handle_session(&self, event: &Event, session: &SessionEvent) {
        let mut state = self.state.borrow_mut();
        if event.timestamp > state.newest_session_timestamp {
            state.newest_session_timestamp = event.timestamp;
        }
        let identity = state.row_identity();
        let now_wall = self.time.wall_seconds();
        let outcome = {
            let SinkState {
                store, reconciler, ..
            } = &mut *state;
            if session.param == SessionParam::StateUpdate {
                reconciler
                    .apply_update(
                        store,
                        &identity,
                        session,
                        event.timestamp,
                        event.sequence,
                        now_wall,
                    )
                    .map(|outcome| outcome.synthesized)
            } else {
                store
                    .insert_network_event(
                        &identity,
                        session,
                        event.timestamp,
                        event.sequence,
                        session.param,
                        session.value.map(i64::from),
                        session.value_text.as_deref(),
                    )
                    .map(|()| 0)
            }
        };
        match outcome {
            Ok(synthesized) => {
                state.unflushed_session += 1;
                state.telemetry.session_rows += 1;
                state.telemetry.synthetic_events += u64::from(synthesized);
            }
            Err(err) => {
                state.telemetry.rows_rejected += 1;
                self.log.error("store", &format!("session row failed: {err}"));
                return;
            }
        }
        self.after_row(&mut state);
    }

    fn handle_position(&self, event: &Event, fix: &PositionFix) {
        let mut state = self.state.borrow_mut();
        let min_interval = state.options.gps_min_interval_secs;
        if state.last_gps_stored > event.timestamp
            || event.timestamp - state.last_gps_stored < min_interval
        {
            state.telemetry.gps_throttled += 1;
            return;
        }
        let identity = state.row_identity();
        match state
            .store
            .insert_gps_fix(&identity, fix, event.timestamp, event.sequence)
        {
            Ok(()) => {
                state.last_gps_stored = event.timestamp;
                state.unflushed_gps += 1;
                state.telemetry.gps_rows += 1;
            }
            Err(err) => {
                state.telemetry.rows_rejected += 1;
                self.log.error("store", &format!("gps row failed: {err}"));
                return;
            }
        }
        self.after_row(&mut state);
    }

    fn handle_system(&self, event: &Event, system: &SystemEvent) {
        let mut state = self.state.borrow_mut();
        let payload = match serde_json::to_string(&system.payload) {
            Ok(payload) => payload,
            Err(err) => {
                state.telemetry.rows_rejected += 1;
                self.log
                    .error("store", &format!("system payload failed: {err}"));
                return;
            }
        };
        let identity = state.row_identity();
        match state
            .store
            .insert_system_event(&identity, &payload, event.timestamp, event.sequence)
        {
            Ok(()) => {
                state.unflushed_system += 1;
                state.telemetry.system_rows += 1;
            }
            Err(err) => {
                state.telemetry.rows_rejected += 1;
                self.log.error("store", &format!("system row failed: {err}"));
                return;
            }
        }
        self.after_row(&mut state);
    }

    fn handle_monitor(&self, event: &Event, sample: &MonitorSample) {
        let mut state = self.state.borrow_mut();
        let session_start = sample
            .payload
            .get("session")
            .and_then(|session| session.get("start"))
            .and_then(serde_json::Value::as_i64);
        let session_start = match session_start {
            Some(start) if start >= MIN_MONITOR_SESSION_START => start,
            _ => {
                state.telemetry.rows_rejected += 1;
                self.log
                    .warn("store", "monitor sample without a valid session start");
                return;
            }
        };
        let identity = state.row_identity();
        match state
            .store
            .insert_monitor_sample(&identity, session_start, event.timestamp, event.sequence)
        {
            Ok(()) => {
                state.unflushed_monitor += 1;
                state.telemetry.monitor_rows += 1;
            }
            Err(err) => {
                state.telemetry.rows_rejected += 1;
                self.log
                    .error("store", &format!("monitor row failed: {err}"));
                return;
            }
        }
        self.after_row(&mut state);
    }

    /// Export trigger check after every accepted row. A failed export is
    /// owned by the retry timer; the two paths never race because both run
    /// on the reactor thread.
    fn after_row(&self, state: &mut SinkState) {
        if state.export_failed {
            return;
        }
        if state.unflushed_total() >= state.options.flush_event_limit {
            self.try_export(state, false);
        } else if state.timer.is_none() {
            let delay = state.options.flush_interval_ms;
            self.arm_timer(state, delay);
        }
    }

    /// Attempts to export every group with unflushed rows, behind the
    /// precondition gate.
    fn try_export(&self, state: &mut SinkState, from_timer: bool) {
        if let Some(identity) = state.gate.poll_identity() {
            match state.store.backfill_boot_identity(identity) {
                Ok(patched) => {
                    self.log.info(
                        "store",
                        &format!(
                            "boot identity {}x{} known, {patched} rows backfilled",
                            identity.count, identity.multiplier
                        ),
                    );
                }
                Err(err) => {
                    self.log
                        .error("store", &format!("identity backfill failed: {err}"));
                    state.export_failed = true;
                    state.telemetry.exports_failed += 1;
                    return;
                }
            }
        }

        match state.gate.try_validate() {
            ValidationOutcome::AlreadyValid => {}
            ValidationOutcome::Validated { delta_seconds } => {
                match state.store.shift_timestamps(delta_seconds) {
                    Ok(shifted) => {
                        state.watermark.shift(delta_seconds);
                        state.newest_session_timestamp = state
                            .newest_session_timestamp
                            .saturating_add_signed(delta_seconds);
                        self.log.info(
                            "store",
                            &format!(
                                "timestamp validated, {shifted} rows shifted by {delta_seconds}s"
                            ),
                        );
                    }
                    Err(err) => {
                        self.log
                            .error("store", &format!("timestamp repair failed: {err}"));
                        state.export_failed = true;
                        state.telemetry.exports_failed += 1;
                        return;
                    }
                }
            }
            ValidationOutcome::NotYet => {}
        }

        if !state.gate.is_open() {
            state.export_deferred = true;
            state.telemetry.exports_deferred += 1;
            self.log
                .debug("store", "export deferred, preconditions not met");
            return;
        }
        state.export_deferred = false;

        if !from_timer {
            if let Some(token) = state.timer.take() {
                self.scheduler.cancel(token);
            }
        }

        let mut failed = 0u64;
        if state.unflushed_session > 0 {
            match self.export_session(state) {
                Ok(()) => state.telemetry.exports_completed += 1,
                Err(err) => {
                    failed += 1;
                    self.log
                        .error("store", &format!("session export failed: {err}"));
                }
            }
        }
        if state.unflushed_gps > 0 {
            match self.export_group(state, TableGroup::Gps) {
                Ok(()) => state.telemetry.exports_completed += 1,
                Err(err) => {
                    failed += 1;
                    self.log.error("store", &format!("gps export failed: {err}"));
                }
            }
        }
        if state.unflushed_system > 0 {
            match self.export_group(state, TableGroup::System) {
                Ok(()) => state.telemetry.exports_completed += 1,
                Err(err) => {
                    failed += 1;
                    self.log
                        .error("store", &format!("system export failed: {err}"));
                }
            }
        }
        if state.unflushed_monitor > 0 {
            match self.export_group(state, TableGroup::Monitor) {
                Ok(()) => state.telemetry.exports_completed += 1,
                Err(err) => {
                    failed += 1;
                    self.log
                        .error("store", &format!("monitor export failed: {err}"));
                }
            }
        }

        state.export_failed = failed > 0;
        state.telemetry.exports_failed += failed;
    }

    fn export_session(&self, state: &mut SinkState) -> Result<(), GroupExportError> {
        let watermark = state.watermark.value();
        let batch = ExportBatch {
            network_events: state.store.network_events_since(watermark)?,
            session_state: state.store.session_state_since(watermark)?,
            ..ExportBatch::default()
        };
        let payload = batch.serialize(TableGroup::Session, state.options.format)?;
        state.publisher.publish(
            TableGroup::Session,
            state.options.format.extension(),
            &payload,
        )?;
        state.store.clear_network_events()?;
        let newest = state.newest_session_timestamp;
        state.watermark.advance(newest);
        state.unflushed_session = 0;
        Ok(())
    }

    fn export_group(&self, state: &mut SinkState, group: TableGroup) -> Result<(), GroupExportError> {
        let batch = match group {
            TableGroup::Gps => ExportBatch {
                gps_fixes: state.store.gps_fixes()?,
                ..ExportBatch::default()
            },
            TableGroup::System => ExportBatch {
                system_events: state.store.system_events()?,
                ..ExportBatch::default()
            },
            TableGroup::Monitor => ExportBatch {
                monitor_samples: state.store.monitor_samples()?,
                ..ExportBatch::default()
            },
            TableGroup::Session => return Ok(()),
        };
        let payload = batch.serialize(group, state.options.format)?;
        state
            .publisher
            .publish(group, state.options.format.extension(), &payload)?;
        match group {
            TableGroup::Gps => {
                state.store.clear_gps_fixes()?;
                state.unflushed_gps = 0;
            }
            TableGroup::System => {
                state.store.clear_system_events()?;
                state.unflushed_system = 0;
            }
            TableGroup::Monitor => {
                state.store.clear_monitor_samples()?;
                state.unflushed_monitor = 0;
            }
            TableGroup::Session => {}
        }
        Ok(())
    }
}

impl Sink for StoreSink {
    fn name(&self) -> &str {
        "store"
    }

    fn handle(&self, event: &Event) {
        match &event.kind {
            EventKind::Session(session) => self.handle_session(event, session),
            EventKind::Position(fix) => self.handle_position(event, fix),
            EventKind::System(system) => self.handle_system(event, system),
            EventKind::Monitor(sample) => self.handle_monitor(event, sample),
            _ => {}
        }
    }

    /// Once-per-iteration maintenance: arm the retry timer after a failed
    /// export, and keep re-checking the precondition gate while rows wait.
    fn on_iteration_end(&self) {
        let mut state = self.state.borrow_mut();
        if state.timer.is_some() {
            return;
        }
        if state.export_failed {
            let delay = state.options.retry_delay_ms;
            self.arm_timer(&mut state, delay);
        } else if state.export_deferred && state.unflushed_total() > 0 {
            let delay = state.options.flush_interval_ms;
            self.arm_timer(&mut state, delay);
        }
    }
}

impl TimerHandler for StoreSink {
    fn on_timer(&self, _token: TimerToken) {
        let mut state = self.state.borrow_mut();
        state.timer = None;
        if state.export_failed {
            self.log.info("store", "export retry");
        }
        self.try_export(&mut state, true);
    }
}
