use serde_json::json;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use telwatch::{
    BatchPublisher, Clock, CollectorLogger, Event, EventBus, EventKind, ExportError, ExportFormat,
    ExportGate, ExportWatermark, FileSink, IdentityTracker, InterfaceUpdate, LogHandle, LogLevel,
    MetaStore, MonitorSample, PositionFix, Scheduler, SharedSequence, Sink, StoreOptions,
    StoreSink, SystemEvent, TableGroup, TimeSource, TimestampValidator,
};

struct ManualClock {
    now: Cell<u64>,
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

struct ManualTime {
    wall: Cell<u64>,
}

impl TimeSource for ManualTime {
    fn wall_seconds(&self) -> u64 {
        self.wall.get()
    }

    fn uptime_seconds(&self) -> u64 {
        100
    }
}

#[derive(Clone, Default)]
struct RecordingPublisher {
    published: Rc<RefCell<Vec<(String, String)>>>,
}

impl BatchPublisher for RecordingPublisher {
    fn publish(
        &mut self,
        group: TableGroup,
        _extension: &str,
        payload: &[u8],
    ) -> Result<std::path::PathBuf, ExportError> {
        self.published.borrow_mut().push((
            group.identifier().to_string(),
            String::from_utf8_lossy(payload).into_owned(),
        ));
        Ok(std::path::PathBuf::from("recorded"))
    }
}

fn build(format: ExportFormat) -> (Rc<EventBus>, Rc<StoreSink>, RecordingPublisher) {
    let clock = Rc::new(ManualClock { now: Cell::new(0) });
    let time = Rc::new(ManualTime {
        wall: Cell::new(1_700_000_000),
    });
    let sequence = SharedSequence::new();
    let bus = Rc::new(EventBus::new(
        sequence.clone(),
        Rc::clone(&time) as Rc<dyn TimeSource>,
    ));
    let publisher = RecordingPublisher::default();
    let gate = ExportGate::new(
        IdentityTracker::new(None),
        TimestampValidator::new(Rc::clone(&time) as Rc<dyn TimeSource>, None),
        false,
    );
    let sink = StoreSink::assemble(
        MetaStore::open_in_memory().unwrap(),
        Box::new(publisher.clone()),
        StoreOptions {
            format,
            flush_event_limit: 100,
            ..StoreOptions::default()
        },
        gate,
        ExportWatermark::load(None),
        Scheduler::new(clock as Rc<dyn Clock>),
        sequence,
        Rc::clone(&time) as Rc<dyn TimeSource>,
        LogHandle::new(CollectorLogger::stderr(LogLevel::Error)),
    );
    bus.register(Rc::clone(&sink) as Rc<dyn Sink>);
    (bus, sink, publisher)
}

fn oslo_fix() -> Event {
    Event::new(EventKind::Position(PositionFix {
        latitude: 59.91,
        longitude: 10.75,
        altitude: None,
        speed: None,
        satellites: Some(7),
        raw_sentence: None,
    }))
}

#[test]
fn position_fix_lands_in_the_gps_table_with_absent_altitude() {
    let (bus, sink, _) = build(ExportFormat::SqlText);

    bus.publish(oslo_fix());

    let rows = sink.with_store(|store| store.gps_fixes().unwrap());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].latitude, 59.91);
    assert_eq!(rows[0].longitude, 10.75);
    assert_eq!(rows[0].altitude, None);
    assert_eq!(rows[0].satellites, Some(7));
    assert_eq!(sink.unflushed(), (0, 1, 0, 0));
    assert_eq!(sink.telemetry().gps_rows, 1);
}

#[test]
fn gps_export_round_trips_the_fix_as_json() {
    let (bus, sink, publisher) = build(ExportFormat::JsonArray);

    bus.publish(oslo_fix());
    sink.flush_now();

    let published = publisher.published.borrow();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "gps");
    let rows: serde_json::Value = serde_json::from_str(&published[0].1).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["latitude"], json!(59.91));
    assert_eq!(rows[0]["longitude"], json!(10.75));
    assert_eq!(rows[0]["altitude"], json!(null));
    assert_eq!(rows[0]["table"], json!("gps_fixes"));
    assert_eq!(sink.unflushed(), (0, 0, 0, 0));
}

#[test]
fn rapid_fixes_are_throttled_to_one_stored_row() {
    let (bus, sink, _) = build(ExportFormat::SqlText);

    bus.publish(oslo_fix());
    bus.publish(oslo_fix()); // same wall second: inside the spacing window
    bus.publish(oslo_fix());

    assert_eq!(sink.unflushed(), (0, 1, 0, 0));
    assert_eq!(sink.telemetry().gps_throttled, 2);
}

#[test]
fn unrecognized_categories_are_ignored_by_the_durable_sink() {
    let (bus, sink, _) = build(ExportFormat::SqlText);

    bus.publish(Event::new(EventKind::Interface(InterfaceUpdate {
        interface_name: "wwan0".to_string(),
        event_code: 1,
        device_mode: Some(5),
        device_submode: None,
        signal_strength: Some(-80),
        network_mccmnc: Some(24201),
    })));

    assert_eq!(sink.unflushed(), (0, 0, 0, 0));
    assert_eq!(sink.telemetry().rows_total(), 0);
}

#[test]
fn system_events_flow_into_their_own_group() {
    let (bus, sink, publisher) = build(ExportFormat::SqlText);

    bus.publish(Event::new(EventKind::System(SystemEvent {
        payload: json!({"event": "boot", "reboot_count": 4}),
    })));
    assert_eq!(sink.unflushed(), (0, 0, 1, 0));

    sink.flush_now();
    let published = publisher.published.borrow();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "system");
    assert!(published[0].1.contains("INSERT INTO system_events"));
    assert!(published[0].1.contains("reboot_count"));
}

#[test]
fn monitor_samples_keep_their_session_start() {
    let (bus, sink, publisher) = build(ExportFormat::SqlText);

    bus.publish(Event::new(EventKind::Monitor(MonitorSample {
        payload: json!({"session": {"start": 1_699_999_000}, "cpu": 0.7}),
    })));
    assert_eq!(sink.unflushed(), (0, 0, 0, 1));

    sink.flush_now();
    let published = publisher.published.borrow();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "monitor");
    assert!(published[0].1.contains("INSERT INTO monitor_samples"));
    assert!(published[0].1.contains("1699999000"));
}

#[test]
fn file_sink_appends_one_json_line_per_event() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.ndjson");
    let time = Rc::new(ManualTime {
        wall: Cell::new(1_700_000_000),
    });
    let bus = EventBus::new(SharedSequence::new(), time as Rc<dyn TimeSource>);
    let sink = FileSink::open(
        path.clone(),
        LogHandle::new(CollectorLogger::stderr(LogLevel::Error)),
    )
    .unwrap();
    bus.register(sink as Rc<dyn Sink>);

    bus.publish(oslo_fix());
    bus.publish(oslo_fix());

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["sequence"], json!(1));
    assert_eq!(first["timestamp"], json!(1_700_000_000));
    assert_eq!(first["position"]["latitude"], json!(59.91));
    assert_eq!(first["position"]["altitude"], json!(null));
}

#[test]
fn monitor_samples_without_a_valid_session_start_are_rejected() {
    let (bus, sink, _) = build(ExportFormat::SqlText);

    // No session dictionary at all.
    bus.publish(Event::new(EventKind::Monitor(MonitorSample {
        payload: json!({"cpu": 0.7}),
    })));
    // An agent whose clock was never set reports a pre-epoch-floor start.
    bus.publish(Event::new(EventKind::Monitor(MonitorSample {
        payload: json!({"session": {"start": 12_345}}),
    })));

    assert_eq!(sink.unflushed(), (0, 0, 0, 0));
    assert_eq!(sink.telemetry().monitor_rows, 0);
    assert_eq!(sink.telemetry().rows_rejected, 2);
}
