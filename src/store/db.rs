use crate::event::{PositionFix, SessionEvent, SessionParam};
use crate::store::schema;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Errors surfaced by the embedded store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Boot-generation identity distinguishing which run of the collector a row
/// originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootIdentity {
    pub count: u64,
    pub multiplier: u64,
}

/// Identity columns stamped on every row. `boot` is `None` until the
/// identity file has been consumed; placeholder zeroes are backfilled later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowIdentity {
    pub node_id: u32,
    pub boot: Option<BootIdentity>,
}

impl RowIdentity {
    fn boot_count(&self) -> u64 {
        self.boot.map(|b| b.count).unwrap_or(0)
    }

    fn boot_multiplier(&self) -> u64 {
        self.boot.map(|b| b.multiplier).unwrap_or(0)
    }
}

/// Session key for the latest-state table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey<'a> {
    pub l3_session_id: u64,
    pub l4_session_id: u64,
    pub interface_id: &'a str,
    pub network_address: &'a str,
}

impl<'a> SessionKey<'a> {
    pub fn of(event: &'a SessionEvent) -> Self {
        Self {
            l3_session_id: event.l3_session_id,
            l4_session_id: event.l4_session_id,
            interface_id: &event.interface_id,
            network_address: &event.network_address,
        }
    }
}

/// Discrete connectivity event row, as exported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkEventRow {
    pub node_id: u32,
    pub boot_count: u64,
    pub boot_multiplier: u64,
    pub timestamp: u64,
    pub sequence: u32,
    pub l3_session_id: u64,
    pub l4_session_id: u64,
    pub event_param: u8,
    pub event_value: Option<i64>,
    pub event_value_str: Option<String>,
    pub interface_kind: u8,
    pub interface_id_kind: u8,
    pub interface_id: String,
    pub network_provider: Option<u32>,
    pub network_address_family: u8,
    pub network_address: String,
}

/// Latest-state session row, as exported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStateRow {
    pub node_id: u32,
    pub boot_count: u64,
    pub boot_multiplier: u64,
    pub timestamp: u64,
    pub sequence: u32,
    pub l3_session_id: u64,
    pub l4_session_id: u64,
    pub state_text: String,
    pub interface_kind: u8,
    pub interface_id: String,
    pub network_address: String,
    pub network_provider: Option<u32>,
}

/// Stored position fix, as exported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpsFixRow {
    pub node_id: u32,
    pub boot_count: u64,
    pub boot_multiplier: u64,
    pub timestamp: u64,
    pub sequence: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub ground_speed: Option<f64>,
    pub satellites: Option<u32>,
}

/// Stored system event, as exported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemEventRow {
    pub node_id: u32,
    pub boot_count: u64,
    pub boot_multiplier: u64,
    pub timestamp: u64,
    pub sequence: u32,
    pub payload: String,
}

/// Stored monitoring sample, as exported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSampleRow {
    pub node_id: u32,
    pub boot_count: u64,
    pub boot_multiplier: u64,
    pub timestamp: u64,
    pub sequence: u32,
    pub session_start: i64,
}

/// Embedded relational store backing the durable sink. Touched only from
/// the reactor thread.
pub struct MetaStore {
    conn: Connection,
}

impl MetaStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::configure(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(schema::CREATE_NETWORK_EVENTS)?;
        conn.execute_batch(schema::CREATE_SESSION_STATE)?;
        conn.execute_batch(schema::CREATE_GPS_FIXES)?;
        conn.execute_batch(schema::CREATE_SYSTEM_EVENTS)?;
        conn.execute_batch(schema::CREATE_MONITOR_SAMPLES)?;
        Ok(Self { conn })
    }

    /// Inserts a discrete connectivity event. `param` and `value` may differ
    /// from the event's own fields when the row is synthesized by
    /// reconciliation.
    pub fn insert_network_event(
        &self,
        identity: &RowIdentity,
        event: &SessionEvent,
        timestamp: u64,
        sequence: u32,
        param: SessionParam,
        value: Option<i64>,
        value_text: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO network_events(node_id, boot_count, boot_multiplier, timestamp,
                sequence, l3_session_id, l4_session_id, event_param, event_value,
                event_value_str, interface_kind, interface_id_kind, interface_id,
                network_provider, network_address_family, network_address)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        )?;
        stmt.execute(params![
            identity.node_id,
            identity.boot_count(),
            identity.boot_multiplier(),
            timestamp,
            sequence,
            event.l3_session_id,
            event.l4_session_id,
            param.code(),
            value,
            value_text,
            event.interface_kind,
            event.interface_id_kind,
            event.interface_id,
            event.network_provider,
            event.network_address_family,
            event.network_address,
        ])?;
        Ok(())
    }

    /// Attempts the insert half of the upsert. Returns true when no prior
    /// row existed for this session key (first observation).
    pub fn try_insert_session_state(
        &self,
        identity: &RowIdentity,
        event: &SessionEvent,
        timestamp: u64,
        sequence: u32,
        state_text: &str,
    ) -> Result<bool, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR IGNORE INTO session_state(node_id, boot_count, boot_multiplier,
                timestamp, sequence, l3_session_id, l4_session_id, state_text,
                interface_kind, interface_id, network_address, network_provider)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        let inserted = stmt.execute(params![
            identity.node_id,
            identity.boot_count(),
            identity.boot_multiplier(),
            timestamp,
            sequence,
            event.l3_session_id,
            event.l4_session_id,
            state_text,
            event.interface_kind,
            event.interface_id,
            event.network_address,
            event.network_provider,
        ])?;
        Ok(inserted == 1)
    }

    /// Reads back the packed state text last recorded for a session key.
    pub fn last_session_state_text(&self, key: &SessionKey) -> Result<Option<String>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT state_text FROM session_state
             WHERE l3_session_id = ?1 AND l4_session_id = ?2
               AND interface_id = ?3 AND network_address = ?4
             ORDER BY timestamp DESC LIMIT 1",
        )?;
        let text = stmt
            .query_row(
                params![
                    key.l3_session_id,
                    key.l4_session_id,
                    key.interface_id,
                    key.network_address
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(text)
    }

    /// Overwrites the latest state for an existing session key.
    pub fn update_session_state(
        &self,
        key: &SessionKey,
        timestamp: u64,
        state_text: &str,
    ) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "UPDATE session_state SET timestamp = ?1, state_text = ?2
             WHERE l3_session_id = ?3 AND l4_session_id = ?4
               AND network_address = ?5 AND interface_id = ?6",
        )?;
        stmt.execute(params![
            timestamp,
            state_text,
            key.l3_session_id,
            key.l4_session_id,
            key.network_address,
            key.interface_id,
        ])?;
        Ok(())
    }

    pub fn insert_gps_fix(
        &self,
        identity: &RowIdentity,
        fix: &PositionFix,
        timestamp: u64,
        sequence: u32,
    ) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO gps_fixes(node_id, boot_count, boot_multiplier, timestamp,
                sequence, latitude, longitude, altitude, ground_speed, satellites)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        stmt.execute(params![
            identity.node_id,
            identity.boot_count(),
            identity.boot_multiplier(),
            timestamp,
            sequence,
            fix.latitude,
            fix.longitude,
            fix.altitude,
            fix.speed,
            fix.satellites,
        ])?;
        Ok(())
    }

    pub fn insert_system_event(
        &self,
        identity: &RowIdentity,
        payload: &str,
        timestamp: u64,
        sequence: u32,
    ) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO system_events(node_id, boot_count, boot_multiplier, timestamp,
                sequence, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        stmt.execute(params![
            identity.node_id,
            identity.boot_count(),
            identity.boot_multiplier(),
            timestamp,
            sequence,
            payload,
        ])?;
        Ok(())
    }

    pub fn insert_monitor_sample(
        &self,
        identity: &RowIdentity,
        session_start: i64,
        timestamp: u64,
        sequence: u32,
    ) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO monitor_samples(node_id, boot_count, boot_multiplier, timestamp,
                sequence, session_start)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        stmt.execute(params![
            identity.node_id,
            identity.boot_count(),
            identity.boot_multiplier(),
            timestamp,
            sequence,
            session_start,
        ])?;
        Ok(())
    }

    /// One-pass backfill replacing placeholder boot identity on rows stored
    /// before the identity file became readable.
    pub fn backfill_boot_identity(&self, identity: BootIdentity) -> Result<usize, StoreError> {
        let mut patched = 0;
        for table in schema::ALL_TABLES {
            let sql = format!(
                "UPDATE {table} SET boot_count = ?1, boot_multiplier = ?2 WHERE boot_count = 0"
            );
            patched += self
                .conn
                .execute(&sql, params![identity.count, identity.multiplier])?;
        }
        Ok(patched)
    }

    /// One-pass backfill replacing a placeholder node id.
    pub fn backfill_node_id(&self, node_id: u32) -> Result<usize, StoreError> {
        let mut patched = 0;
        for table in schema::ALL_TABLES {
            let sql = format!("UPDATE {table} SET node_id = ?1 WHERE node_id = 0");
            patched += self.conn.execute(&sql, params![node_id])?;
        }
        Ok(patched)
    }

    /// Shifts every stored timestamp by `delta_seconds`, across all tables,
    /// in one pass. Used once, when wall-clock validation confirms the boot
    /// time differs from the one assumed at startup.
    pub fn shift_timestamps(&self, delta_seconds: i64) -> Result<usize, StoreError> {
        if delta_seconds == 0 {
            return Ok(0);
        }
        let mut shifted = 0;
        for table in schema::ALL_TABLES {
            let sql = format!("UPDATE {table} SET timestamp = timestamp + ?1");
            shifted += self.conn.execute(&sql, params![delta_seconds])?;
        }
        Ok(shifted)
    }

    pub fn network_events_since(&self, watermark: u64) -> Result<Vec<NetworkEventRow>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT node_id, boot_count, boot_multiplier, timestamp, sequence,
                    l3_session_id, l4_session_id, event_param, event_value,
                    event_value_str, interface_kind, interface_id_kind, interface_id,
                    network_provider, network_address_family, network_address
             FROM network_events WHERE timestamp >= ?1 ORDER BY timestamp",
        )?;
        let rows = stmt
            .query_map(params![watermark], |row| {
                Ok(NetworkEventRow {
                    node_id: row.get(0)?,
                    boot_count: row.get(1)?,
                    boot_multiplier: row.get(2)?,
                    timestamp: row.get(3)?,
                    sequence: row.get(4)?,
                    l3_session_id: row.get(5)?,
                    l4_session_id: row.get(6)?,
                    event_param: row.get(7)?,
                    event_value: row.get(8)?,
                    event_value_str: row.get(9)?,
                    interface_kind: row.get(10)?,
                    interface_id_kind: row.get(11)?,
                    interface_id: row.get(12)?,
                    network_provider: row.get(13)?,
                    network_address_family: row.get(14)?,
                    network_address: row.get(15)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn session_state_since(&self, watermark: u64) -> Result<Vec<SessionStateRow>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT node_id, boot_count, boot_multiplier, timestamp, sequence,
                    l3_session_id, l4_session_id, state_text, interface_kind,
                    interface_id, network_address, network_provider
             FROM session_state WHERE timestamp >= ?1 ORDER BY timestamp",
        )?;
        let rows = stmt
            .query_map(params![watermark], |row| {
                Ok(SessionStateRow {
                    node_id: row.get(0)?,
                    boot_count: row.get(1)?,
                    boot_multiplier: row.get(2)?,
                    timestamp: row.get(3)?,
                    sequence: row.get(4)?,
                    l3_session_id: row.get(5)?,
                    l4_session_id: row.get(6)?,
                    state_text: row.get(7)?,
                    interface_kind: row.get(8)?,
                    interface_id: row.get(9)?,
                    network_address: row.get(10)?,
                    network_provider: row.get(11)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn gps_fixes(&self) -> Result<Vec<GpsFixRow>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT node_id, boot_count, boot_multiplier, timestamp, sequence,
                    latitude, longitude, altitude, ground_speed, satellites
             FROM gps_fixes ORDER BY timestamp",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(GpsFixRow {
                    node_id: row.get(0)?,
                    boot_count: row.get(1)?,
                    boot_multiplier: row.get(2)?,
                    timestamp: row.get(3)?,
                    sequence: row.get(4)?,
                    latitude: row.get(5)?,
                    longitude: row.get(6)?,
                    altitude: row.get(7)?,
                    ground_speed: row.get(8)?,
                    satellites: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn system_events(&self) -> Result<Vec<SystemEventRow>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT node_id, boot_count, boot_multiplier, timestamp, sequence, payload
             FROM system_events ORDER BY timestamp",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SystemEventRow {
                    node_id: row.get(0)?,
                    boot_count: row.get(1)?,
                    boot_multiplier: row.get(2)?,
                    timestamp: row.get(3)?,
                    sequence: row.get(4)?,
                    payload: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn monitor_samples(&self) -> Result<Vec<MonitorSampleRow>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT node_id, boot_count, boot_multiplier, timestamp, sequence, session_start
             FROM monitor_samples ORDER BY timestamp",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(MonitorSampleRow {
                    node_id: row.get(0)?,
                    boot_count: row.get(1)?,
                    boot_multiplier: row.get(2)?,
                    timestamp: row.get(3)?,
                    sequence: row.get(4)?,
                    session_start: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn clear_network_events(&self) -> Result<usize, StoreError> {
        Ok(self.conn.execute("DELETE FROM network_events", [])?)
    }

    pub fn clear_gps_fixes(&self) -> Result<usize, StoreError> {
        Ok(self.conn.execute("DELETE FROM gps_fixes", [])?)
    }

    pub fn clear_system_events(&self) -> Result<usize, StoreError> {
        Ok(self.conn.execute("DELETE FROM system_events", [])?)
    }

    pub fn clear_monitor_samples(&self) -> Result<usize, StoreError> {
        Ok(self.conn.execute("DELETE FROM monitor_samples", [])?)
    }

    pub fn network_event_count(&self) -> Result<u64, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM network_events", [], |row| row.get(0))?)
    }

    pub fn session_state_count(&self) -> Result<u64, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM session_state", [], |row| row.get(0))?)
    }
}
