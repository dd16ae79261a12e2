//! Output sinks for mapped sensor values.
//!
//! The mapping processor treats `send_*` as fire-and-forget: a backend must
//! never block the dispatcher thread. Sinks that do real I/O buffer
//! internally and shed data when the consumer cannot keep up.

mod osc;
mod stdout;

pub use osc::OscBackend;
pub use stdout::StdoutBackend;

use crate::config::OutputConfig;
use crate::error::{Error, Result};

/// Sink interface for normalized output values, dispatched per value kind.
pub trait OutputBackend: Send {
    /// Deliver a digital (on/off) output value
    fn send_digital(&mut self, index: u16, value: bool, timestamp: u64);

    /// Deliver a mapped analog output value
    fn send_analog(&mut self, index: u16, value: f32, timestamp: u64);

    /// Deliver a continuous (IMU axis, normalized source) output value
    fn send_continuous(&mut self, index: u16, value: f32, timestamp: u64);
}

/// Build the configured output backend
pub fn create_backend(config: &OutputConfig) -> Result<Box<dyn OutputBackend>> {
    match config.backend.as_str() {
        "osc" => Ok(Box::new(OscBackend::new(&config.host, config.port)?)),
        "stdout" => Ok(Box::new(StdoutBackend::new())),
        other => Err(Error::UnknownBackend(other.to_string())),
    }
}
