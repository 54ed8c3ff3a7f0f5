//! Source adapters feeding the event bus.

pub mod datagram;
pub mod decode;
pub mod line;

pub use datagram::DatagramSource;
pub use decode::{decode_frame, decode_value, DecodeError};
pub use line::LineSource;
