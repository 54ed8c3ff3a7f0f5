//! Domain events observed by the collector.

pub mod bus;

pub use bus::{EventBus, SharedSequence, Sink};

use serde::Serialize;
use serde_json::Value;

/// Category tag carried by every event, used for sink dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Interface,
    Session,
    Position,
    Monitor,
    System,
    Relay,
}

impl Category {
    /// Canonical lowercase tag, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Interface => "interface",
            Category::Session => "session",
            Category::Position => "position",
            Category::Monitor => "monitor",
            Category::System => "system",
            Category::Relay => "relay",
        }
    }
}

/// Discrete connectivity-session event parameters. `ModeUpdate` and
/// `QualityUpdate` are only produced by reconciliation synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionParam {
    L3Up,
    L3Down,
    L4Up,
    L4Down,
    ModeChange,
    QualityChange,
    StateUpdate,
    ModeUpdate,
    QualityUpdate,
}

impl SessionParam {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::L3Up),
            2 => Some(Self::L3Down),
            3 => Some(Self::L4Up),
            4 => Some(Self::L4Down),
            5 => Some(Self::ModeChange),
            6 => Some(Self::QualityChange),
            7 => Some(Self::StateUpdate),
            8 => Some(Self::ModeUpdate),
            9 => Some(Self::QualityUpdate),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::L3Up => 1,
            Self::L3Down => 2,
            Self::L4Up => 3,
            Self::L4Down => 4,
            Self::ModeChange => 5,
            Self::QualityChange => 6,
            Self::StateUpdate => 7,
            Self::ModeUpdate => 8,
            Self::QualityUpdate => 9,
        }
    }
}

/// Connectivity-session event. `value_text` carries the packed session
/// state (comma separated, parsed positionally by reconciliation).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionEvent {
    pub param: SessionParam,
    pub value: Option<u8>,
    pub value_text: Option<String>,
    pub l3_session_id: u64,
    pub l4_session_id: u64,
    pub interface_kind: u8,
    pub interface_id_kind: u8,
    pub interface_id: String,
    pub network_address_family: u8,
    pub network_address: String,
    pub network_provider: Option<u32>,
    pub signal_strength: Option<i8>,
}

/// Position fix from a GPS receiver. Altitude, speed, and satellite count
/// are absent on fixes that do not carry them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub satellites: Option<u32>,
    pub raw_sentence: Option<String>,
}

/// Interface/modem state update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceUpdate {
    pub interface_name: String,
    pub event_code: u8,
    pub device_mode: Option<u8>,
    pub device_submode: Option<u8>,
    pub signal_strength: Option<i8>,
    pub network_mccmnc: Option<u32>,
}

/// Sample produced by a monitoring agent; the payload dictionary is opaque
/// to the core.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSample {
    pub payload: Value,
}

/// System-level event (boot, shutdown, watchdog).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemEvent {
    pub payload: Value,
}

/// Raw payload forwarded from a pub/sub relay feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayFrame {
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Interface(InterfaceUpdate),
    Session(SessionEvent),
    Position(PositionFix),
    Monitor(MonitorSample),
    System(SystemEvent),
    Relay(RelayFrame),
}

/// An immutable, sequenced, timestamped record of something observed.
/// `timestamp` is seconds since the Unix epoch; zero means "unset" and is
/// stamped by the bus at publish time. `sequence` is always stamped by the
/// bus; zero is reserved to mean "absent".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub timestamp: u64,
    pub sequence: u32,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            timestamp: 0,
            sequence: 0,
            kind,
        }
    }

    pub fn with_timestamp(kind: EventKind, timestamp: u64) -> Self {
        Self {
            timestamp,
            sequence: 0,
            kind,
        }
    }

    pub fn category(&self) -> Category {
        match self.kind {
            EventKind::Interface(_) => Category::Interface,
            EventKind::Session(_) => Category::Session,
            EventKind::Position(_) => Category::Position,
            EventKind::Monitor(_) => Category::Monitor,
            EventKind::System(_) => Category::System,
            EventKind::Relay(_) => Category::Relay,
        }
    }
}
