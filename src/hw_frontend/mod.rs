//! Hardware frontends: the components that speak a controller's wire
//! protocol.
//!
//! Every frontend owns two I/O threads (reader, writer) gated by a shared
//! atomic tri-state. The reader blocks in the transport's read with a
//! bounded timeout so it observes a stop request promptly; the writer blocks
//! on the to-frontend queue (and, when ack verification gates sends, on a
//! condition variable). Frontend threads never touch mapper state; all
//! communication with the dispatcher goes through the two queues.

pub mod gpio;
mod message_tracker;
pub mod serial;
pub mod xmos;

pub use message_tracker::{Expired, MessageTracker};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::{Command, Message};
use crate::queue::SynchronizedQueue;
use crate::transport::{SerialTransport, SocketTransport};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Bounded read/queue-wait timeout for frontend I/O threads. Also the upper
/// bound on how long `stop()` waits for a reader to notice.
pub const READ_WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Lifecycle of a frontend's I/O thread pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    Running = 0,
    Stopping = 1,
    Stopped = 2,
}

/// Atomic cell holding a [`ThreadState`].
pub(crate) struct AtomicThreadState(AtomicU8);

impl AtomicThreadState {
    pub fn new(state: ThreadState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> ThreadState {
        match self.0.load(Ordering::Acquire) {
            0 => ThreadState::Running,
            1 => ThreadState::Stopping,
            _ => ThreadState::Stopped,
        }
    }

    pub fn store(&self, state: ThreadState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Control surface every hardware frontend exposes to the event handler.
pub trait HwFrontend: Send {
    /// Start the reader and writer threads. Idempotent while running.
    fn run(&mut self);

    /// Signal the threads to stop and join them.
    fn stop(&mut self);

    /// Current link state
    fn connected(&self) -> bool;

    /// When muted, decoded incoming packets are silently discarded; the
    /// threads keep running.
    fn mute(&self, enabled: bool);

    /// Toggle ack tracking and verification of sent commands
    fn verify_acks(&self, enabled: bool);

    /// Install the hardware-pin to sensor-index table. Mutated only from
    /// the dispatcher thread (single-writer discipline).
    fn install_pin_table(&self, table: Vec<(u16, u16)>);

    /// Install the IMU axis to sensor-index table. Frontends without an IMU
    /// ignore it.
    fn install_imu_table(&self, _table: Vec<(crate::message::ImuAxis, u16)>) {}
}

/// Build the configured hardware frontend and install its pin tables.
pub fn create_frontend(
    config: &Config,
    to_frontend_queue: Arc<SynchronizedQueue<Command>>,
    event_queue: Arc<SynchronizedQueue<Message>>,
) -> Result<Box<dyn HwFrontend>> {
    match config.hardware.frontend.as_str() {
        "serial" => {
            let port = config
                .hardware
                .port
                .as_ref()
                .ok_or_else(|| Error::Config("serial frontend requires a port".to_string()))?;
            let transport = SerialTransport::open(port, serial::BAUD_RATE, READ_WRITE_TIMEOUT)?;
            let frontend = serial::SerialFrontend::new(
                Box::new(transport),
                to_frontend_queue,
                event_queue,
            );
            frontend.install_pin_table(config.pin_table());
            frontend.install_imu_table(config.imu_table());
            Ok(Box::new(frontend))
        }
        "xmos" => {
            let socket = config
                .hardware
                .socket
                .as_ref()
                .ok_or_else(|| Error::Config("xmos frontend requires a socket".to_string()))?;
            let transport = SocketTransport::connect(socket, READ_WRITE_TIMEOUT)?;
            let frontend =
                xmos::XmosFrontend::new(Box::new(transport), to_frontend_queue, event_queue)
                    .with_socket_path(socket);
            frontend.install_pin_table(config.pin_table());
            Ok(Box::new(frontend))
        }
        "gpio" => {
            let socket = config
                .hardware
                .socket
                .as_ref()
                .ok_or_else(|| Error::Config("gpio frontend requires a socket".to_string()))?;
            let frontend =
                gpio::GpioFrontend::new(socket, to_frontend_queue, event_queue)?;
            frontend.install_pin_table(config.pin_table());
            Ok(Box::new(frontend))
        }
        other => Err(Error::UnknownFrontend(other.to_string())),
    }
}
