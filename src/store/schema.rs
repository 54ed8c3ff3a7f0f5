//! Embedded-store schema.
//!
//! `network_events`, `gps_fixes`, and `system_events` are append-only and
//! cleared after each confirmed export. `session_state` keeps the latest
//! known state per session key and is never historized directly; the
//! reconciliation engine recovers a transition history from it.

pub const CREATE_NETWORK_EVENTS: &str = "CREATE TABLE IF NOT EXISTS network_events(
    node_id INTEGER NOT NULL,
    boot_count INTEGER NOT NULL,
    boot_multiplier INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    sequence INTEGER NOT NULL,
    l3_session_id INTEGER NOT NULL,
    l4_session_id INTEGER,
    event_param INTEGER NOT NULL,
    event_value INTEGER,
    event_value_str TEXT,
    interface_kind INTEGER NOT NULL,
    interface_id_kind INTEGER NOT NULL,
    interface_id TEXT NOT NULL,
    network_provider INTEGER,
    network_address_family INTEGER NOT NULL,
    network_address TEXT NOT NULL,
    PRIMARY KEY(node_id, timestamp, sequence))";

// The session key includes the network address because multiple addresses on
// one interface can share L3/L4 ids; (address, interface) pins the session.
pub const CREATE_SESSION_STATE: &str = "CREATE TABLE IF NOT EXISTS session_state(
    node_id INTEGER NOT NULL,
    boot_count INTEGER NOT NULL,
    boot_multiplier INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    sequence INTEGER NOT NULL,
    l3_session_id INTEGER NOT NULL,
    l4_session_id INTEGER NOT NULL DEFAULT 0,
    state_text TEXT NOT NULL,
    interface_kind INTEGER NOT NULL,
    interface_id TEXT NOT NULL,
    network_address TEXT NOT NULL,
    network_provider INTEGER,
    PRIMARY KEY(l3_session_id, l4_session_id, interface_id, network_address))";

pub const CREATE_GPS_FIXES: &str = "CREATE TABLE IF NOT EXISTS gps_fixes(
    node_id INTEGER NOT NULL,
    boot_count INTEGER NOT NULL,
    boot_multiplier INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    sequence INTEGER NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    altitude REAL,
    ground_speed REAL,
    satellites INTEGER,
    PRIMARY KEY(node_id, timestamp, sequence))";

pub const CREATE_SYSTEM_EVENTS: &str = "CREATE TABLE IF NOT EXISTS system_events(
    node_id INTEGER NOT NULL,
    boot_count INTEGER NOT NULL,
    boot_multiplier INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    sequence INTEGER NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY(node_id, timestamp, sequence))";

// Monitoring agents only contribute their session start time; the sample
// dictionary itself goes to the stateless sinks.
pub const CREATE_MONITOR_SAMPLES: &str = "CREATE TABLE IF NOT EXISTS monitor_samples(
    node_id INTEGER NOT NULL,
    boot_count INTEGER NOT NULL,
    boot_multiplier INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    sequence INTEGER NOT NULL,
    session_start INTEGER NOT NULL,
    PRIMARY KEY(node_id, timestamp, sequence))";

pub const ALL_TABLES: &[&str] = &[
    "network_events",
    "session_state",
    "gps_fixes",
    "system_events",
    "monitor_samples",
];
