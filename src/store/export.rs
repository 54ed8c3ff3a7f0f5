use crate::store::db::{
    GpsFixRow, MonitorSampleRow, NetworkEventRow, SessionStateRow, SystemEventRow,
};
use serde::Serialize;
use serde_json::Value;
use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tempfile::Builder;
use thiserror::Error;

/// Serialization format for exported batches, selectable per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Portable SQL insert statements, one per line.
    SqlText,
    /// A flat JSON array of row objects.
    JsonArray,
}

impl ExportFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sql" => Some(Self::SqlText),
            "json" => Some(Self::JsonArray),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::SqlText => "sql",
            Self::JsonArray => "json",
        }
    }
}

/// Exportable table group. The session group covers both the append-only
/// event table and the latest-state table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableGroup {
    Session,
    Gps,
    System,
    Monitor,
}

impl TableGroup {
    pub fn identifier(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Gps => "gps",
            Self::System => "system",
            Self::Monitor => "monitor",
        }
    }
}

/// Errors raised while serializing or publishing a batch.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to serialize {group} batch: {reason}")]
    Serialize { group: &'static str, reason: String },
    #[error("failed to write export file: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to publish export file {path}: {source}")]
    Publish {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Unflushed rows of one table group at the moment export is attempted.
#[derive(Debug, Clone, Default)]
pub struct ExportBatch {
    pub network_events: Vec<NetworkEventRow>,
    pub session_state: Vec<SessionStateRow>,
    pub gps_fixes: Vec<GpsFixRow>,
    pub system_events: Vec<SystemEventRow>,
    pub monitor_samples: Vec<MonitorSampleRow>,
}

impl ExportBatch {
    pub fn row_count(&self) -> usize {
        self.network_events.len()
            + self.session_state.len()
            + self.gps_fixes.len()
            + self.system_events.len()
            + self.monitor_samples.len()
    }

    /// Renders the batch in the configured format.
    pub fn serialize(&self, group: TableGroup, format: ExportFormat) -> Result<Vec<u8>, ExportError> {
        match format {
            ExportFormat::SqlText => Ok(self.render_sql().into_bytes()),
            ExportFormat::JsonArray => self.render_json(group),
        }
    }

    fn render_sql(&self) -> String {
        let mut out = String::new();
        for row in &self.network_events {
            let _ = writeln!(
                out,
                "INSERT INTO network_events(node_id,boot_count,boot_multiplier,timestamp,\
                 sequence,l3_session_id,l4_session_id,event_param,event_value,event_value_str,\
                 interface_kind,interface_id_kind,interface_id,network_provider,\
                 network_address_family,network_address) VALUES({},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{});",
                row.node_id,
                row.boot_count,
                row.boot_multiplier,
                row.timestamp,
                row.sequence,
                row.l3_session_id,
                row.l4_session_id,
                row.event_param,
                sql_opt_int(row.event_value),
                sql_opt_text(row.event_value_str.as_deref()),
                row.interface_kind,
                row.interface_id_kind,
                sql_text(&row.interface_id),
                sql_opt_int(row.network_provider.map(i64::from)),
                row.network_address_family,
                sql_text(&row.network_address),
            );
        }
        for row in &self.session_state {
            let _ = writeln!(
                out,
                "REPLACE INTO session_state(node_id,boot_count,boot_multiplier,timestamp,\
                 sequence,l3_session_id,l4_session_id,state_text,interface_kind,interface_id,\
                 network_address,network_provider) VALUES({},{},{},{},{},{},{},{},{},{},{},{});",
                row.node_id,
                row.boot_count,
                row.boot_multiplier,
                row.timestamp,
                row.sequence,
                row.l3_session_id,
                row.l4_session_id,
                sql_text(&row.state_text),
                row.interface_kind,
                sql_text(&row.interface_id),
                sql_text(&row.network_address),
                sql_opt_int(row.network_provider.map(i64::from)),
            );
        }
        for row in &self.gps_fixes {
            let _ = writeln!(
                out,
                "REPLACE INTO gps_fixes(node_id,boot_count,boot_multiplier,timestamp,sequence,\
                 latitude,longitude,altitude,ground_speed,satellites) VALUES({},{},{},{},{},{},{},{},{},{});",
                row.node_id,
                row.boot_count,
                row.boot_multiplier,
                row.timestamp,
                row.sequence,
                row.latitude,
                row.longitude,
                sql_opt_float(row.altitude),
                sql_opt_float(row.ground_speed),
                sql_opt_int(row.satellites.map(i64::from)),
            );
        }
        for row in &self.system_events {
            let _ = writeln!(
                out,
                "INSERT INTO system_events(node_id,boot_count,boot_multiplier,timestamp,\
                 sequence,payload) VALUES({},{},{},{},{},{});",
                row.node_id,
                row.boot_count,
                row.boot_multiplier,
                row.timestamp,
                row.sequence,
                sql_text(&row.payload),
            );
        }
        for row in &self.monitor_samples {
            let _ = writeln!(
                out,
                "INSERT INTO monitor_samples(node_id,boot_count,boot_multiplier,timestamp,\
                 sequence,session_start) VALUES({},{},{},{},{},{});",
                row.node_id,
                row.boot_count,
                row.boot_multiplier,
                row.timestamp,
                row.sequence,
                row.session_start,
            );
        }
        out
    }

    fn render_json(&self, group: TableGroup) -> Result<Vec<u8>, ExportError> {
        let serialize_err = |err: serde_json::Error| ExportError::Serialize {
            group: group.identifier(),
            reason: err.to_string(),
        };
        let mut objects: Vec<Value> = Vec::with_capacity(self.row_count());
        for row in &self.network_events {
            objects.push(tagged_row(row, "network_events").map_err(serialize_err)?);
        }
        for row in &self.session_state {
            objects.push(tagged_row(row, "session_state").map_err(serialize_err)?);
        }
        for row in &self.gps_fixes {
            objects.push(tagged_row(row, "gps_fixes").map_err(serialize_err)?);
        }
        for row in &self.system_events {
            objects.push(tagged_row(row, "system_events").map_err(serialize_err)?);
        }
        for row in &self.monitor_samples {
            objects.push(tagged_row(row, "monitor_samples").map_err(serialize_err)?);
        }
        serde_json::to_vec(&objects).map_err(serialize_err)
    }
}

fn tagged_row<T: Serialize>(row: &T, table: &str) -> Result<Value, serde_json::Error> {
    let mut object = serde_json::to_value(row)?;
    if let Value::Object(map) = &mut object {
        map.insert("table".to_string(), Value::String(table.to_string()));
    }
    Ok(object)
}

fn sql_text(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('\'');
    for ch in text.chars() {
        if ch == '\'' {
            quoted.push('\'');
        }
        quoted.push(ch);
    }
    quoted.push('\'');
    quoted
}

fn sql_opt_text(text: Option<&str>) -> String {
    match text {
        Some(text) => sql_text(text),
        None => "NULL".to_string(),
    }
}

fn sql_opt_int(value: Option<i64>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => "NULL".to_string(),
    }
}

fn sql_opt_float(value: Option<f64>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => "NULL".to_string(),
    }
}

/// Durable publication seam. The production implementation writes to the
/// filesystem; tests inject failing implementations to drive the retry
/// machinery.
pub trait BatchPublisher {
    fn publish(
        &mut self,
        group: TableGroup,
        extension: &str,
        payload: &[u8],
    ) -> Result<PathBuf, ExportError>;
}

/// Publishes batches as files under a target directory.
///
/// The payload is first written to a temp file with a collision-safe unique
/// name, then hard-linked to its permanent name and the temp name removed.
/// Partially written temp content is therefore never visible under the
/// permanent pattern; consumers treat the permanent name as the sole
/// readiness signal. A crash before the link leaves only an orphaned temp
/// file; a crash after leaves the rows in the store, safe to export again.
pub struct FilePublisher {
    directory: PathBuf,
    prefix: String,
}

impl FilePublisher {
    pub fn new(directory: PathBuf, prefix: String) -> Self {
        Self { directory, prefix }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl BatchPublisher for FilePublisher {
    fn publish(
        &mut self,
        group: TableGroup,
        extension: &str,
        payload: &[u8],
    ) -> Result<PathBuf, ExportError> {
        let mut temp = Builder::new()
            .prefix(&self.prefix)
            .tempfile_in(&self.directory)
            .map_err(ExportError::Write)?;
        temp.write_all(payload).map_err(ExportError::Write)?;
        temp.flush().map_err(ExportError::Write)?;

        let temp_name = temp
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.prefix.clone());
        let final_path = self
            .directory
            .join(format!("{temp_name}_{}.{extension}", group.identifier()));

        if let Err(source) = fs::hard_link(temp.path(), &final_path) {
            let _ = fs::remove_file(&final_path);
            return Err(ExportError::Publish {
                path: final_path,
                source,
            });
        }
        // Dropping the handle unlinks the temp name, completing the
        // link-then-unlink publish.
        drop(temp);
        Ok(final_path)
    }
}
