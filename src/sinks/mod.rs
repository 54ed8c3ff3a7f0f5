//! Stateless sink adapters.

pub mod file;
pub mod relay;

pub use file::FileSink;
pub use relay::RelaySink;
