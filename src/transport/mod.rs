//! Transport layer for I/O abstraction
//!
//! A frontend's reader and writer threads each own their own transport
//! handle (via [`Transport::try_clone`]) so no lock is ever held across a
//! blocking read or write.

use crate::error::Result;

mod serial;
pub use serial::SerialTransport;

mod socket;
pub use socket::SocketTransport;

mod mock;
pub use mock::MockTransport;

/// Transport trait for device communication
pub trait Transport: Send {
    /// Read data into buffer, returns number of bytes read.
    /// A read timeout is reported as `Ok(0)`, not an error.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write data from buffer, returns number of bytes written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush any pending writes
    fn flush(&mut self) -> Result<()>;

    /// Clone the handle so reader and writer threads can own one each
    fn try_clone(&self) -> Result<Box<dyn Transport>>;
}
