//! Local stream-socket transport (XMOS control link)

use super::Transport;
use crate::error::Result;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

/// Byte-stream transport over a named local socket.
pub struct SocketTransport {
    stream: UnixStream,
}

impl SocketTransport {
    /// Connect to the peer's socket.
    ///
    /// `read_timeout` bounds blocking reads so the reader thread can observe
    /// a stop request.
    pub fn connect<P: AsRef<Path>>(path: P, read_timeout: Duration) -> Result<Self> {
        let stream = UnixStream::connect(&path)?;
        stream.set_read_timeout(Some(read_timeout))?;

        log::info!("Connected to control socket: {}", path.as_ref().display());

        Ok(SocketTransport { stream })
    }
}

impl Transport for SocketTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self.stream.read(buffer) {
            Ok(n) => Ok(n),
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.stream.write(data)?)
    }

    fn flush(&mut self) -> Result<()> {
        self.stream.flush()?;
        Ok(())
    }

    fn try_clone(&self) -> Result<Box<dyn Transport>> {
        let stream = self.stream.try_clone()?;
        Ok(Box::new(SocketTransport { stream }))
    }
}
