//! Shared JSON-frame decoding for every source feed.
//!
//! Each feed delivers self-describing JSON objects; the `event_type` field
//! selects the category using the wire codes shared with the node's other
//! agents. Frames without an `event_type` are relay payloads and pass
//! through opaquely. Protocol-level decoding (NMEA sentences, kernel
//! attribute layouts, agent line dialects) happens upstream of this module.

use crate::event::{
    Event, EventKind, InterfaceUpdate, MonitorSample, PositionFix, RelayFrame, SessionEvent,
    SessionParam, SystemEvent,
};
use serde_json::Value;
use thiserror::Error;

pub const WIRE_TYPE_INTERFACE: u64 = 0x01;
pub const WIRE_TYPE_SESSION: u64 = 0x02;
pub const WIRE_TYPE_POSITION: u64 = 0x04;
pub const WIRE_TYPE_MONITOR: u64 = 0x05;
pub const WIRE_TYPE_SYSTEM: u64 = 0x06;

/// Errors raised while decoding a source frame. A failed frame produces no
/// event for that cycle; the source keeps reading.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("field '{0}' has an unusable value")]
    BadField(&'static str),
    #[error("unknown event type {0}")]
    UnknownType(u64),
}

/// Decodes one raw frame into a domain event. The returned event carries
/// the producer timestamp when the frame has one; otherwise the bus stamps
/// it at publish time.
pub fn decode_frame(bytes: &[u8]) -> Result<Event, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)?;
    decode_value(value)
}

pub fn decode_value(value: Value) -> Result<Event, DecodeError> {
    if !value.is_object() {
        return Err(DecodeError::NotAnObject);
    }
    let timestamp = field_u64(&value, "timestamp").unwrap_or(0);
    let kind = match field_u64(&value, "event_type") {
        None => EventKind::Relay(RelayFrame { payload: value }),
        Some(WIRE_TYPE_INTERFACE) => decode_interface(&value)?,
        Some(WIRE_TYPE_SESSION) => decode_session(&value)?,
        Some(WIRE_TYPE_POSITION) => decode_position(&value)?,
        Some(WIRE_TYPE_MONITOR) => EventKind::Monitor(MonitorSample { payload: value }),
        Some(WIRE_TYPE_SYSTEM) => EventKind::System(SystemEvent { payload: value }),
        Some(other) => return Err(DecodeError::UnknownType(other)),
    };
    Ok(Event::with_timestamp(kind, timestamp))
}

fn decode_session(value: &Value) -> Result<EventKind, DecodeError> {
    let param_code = field_u64(value, "event_param")
        .ok_or(DecodeError::MissingField("event_param"))? as u8;
    let param =
        SessionParam::from_code(param_code).ok_or(DecodeError::BadField("event_param"))?;
    Ok(EventKind::Session(SessionEvent {
        param,
        value: field_u64(value, "event_value").map(|v| v as u8),
        value_text: field_str(value, "event_value_str"),
        l3_session_id: field_u64(value, "l3_session_id")
            .ok_or(DecodeError::MissingField("l3_session_id"))?,
        l4_session_id: field_u64(value, "l4_session_id").unwrap_or(0),
        interface_kind: field_u64(value, "interface_type").unwrap_or(0) as u8,
        interface_id_kind: field_u64(value, "interface_id_type").unwrap_or(0) as u8,
        interface_id: field_str(value, "interface_id")
            .ok_or(DecodeError::MissingField("interface_id"))?,
        network_address_family: field_u64(value, "network_address_family").unwrap_or(0) as u8,
        network_address: field_str(value, "network_address")
            .ok_or(DecodeError::MissingField("network_address"))?,
        network_provider: field_u64(value, "network_provider").map(|v| v as u32),
        signal_strength: field_i64(value, "signal_strength").map(|v| v as i8),
    }))
}

fn decode_position(value: &Value) -> Result<EventKind, DecodeError> {
    Ok(EventKind::Position(PositionFix {
        latitude: field_f64(value, "latitude").ok_or(DecodeError::MissingField("latitude"))?,
        longitude: field_f64(value, "longitude").ok_or(DecodeError::MissingField("longitude"))?,
        altitude: field_f64(value, "altitude"),
        speed: field_f64(value, "speed"),
        satellites: field_u64(value, "satellites").map(|v| v as u32),
        raw_sentence: field_str(value, "nmea_string"),
    }))
}

fn decode_interface(value: &Value) -> Result<EventKind, DecodeError> {
    Ok(EventKind::Interface(InterfaceUpdate {
        interface_name: field_str(value, "ifname").ok_or(DecodeError::MissingField("ifname"))?,
        event_code: field_u64(value, "event_param").unwrap_or(0) as u8,
        device_mode: field_u64(value, "device_mode").map(|v| v as u8),
        device_submode: field_u64(value, "device_submode").map(|v| v as u8),
        signal_strength: field_i64(value, "signal_strength").map(|v| v as i8),
        network_mccmnc: field_u64(value, "nw_mccmnc").map(|v| v as u32),
    }))
}

fn field_u64(value: &Value, key: &str) -> Option<u64> {
    value.get(key).and_then(Value::as_u64)
}

fn field_i64(value: &Value, key: &str) -> Option<i64> {
    value.get(key).and_then(Value::as_i64)
}

fn field_f64(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(Value::as_f64)
}

fn field_str(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(|text| text.to_string())
}
