//! OSC output sink over UDP
//!
//! Sends one OSC message per value to `/sensors/<index>`: an int32 argument
//! for digital values, a float32 for analog and continuous values.
//!
//! The dispatcher thread only pushes onto a bounded channel; a sender thread
//! owns the socket and does the encoding and I/O. When the channel is full
//! the datagram is dropped with a throttled warning, which keeps the
//! dispatcher from ever blocking on a slow network.

use super::OutputBackend;
use crate::error::Result;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::net::UdpSocket;
use std::thread::{self, JoinHandle};

/// Sender-side channel capacity. At a 1 kHz sampling rate this buffers one
/// second of fully saturated output.
const CHANNEL_CAPACITY: usize = 1024;

/// Log every Nth dropped message instead of each one
const DROP_LOG_INTERVAL: u64 = 100;

#[derive(Debug, Clone, Copy)]
enum OscArg {
    Int(i32),
    Float(f32),
}

#[derive(Debug, Clone, Copy)]
struct OscEvent {
    index: u16,
    arg: OscArg,
}

/// OSC sink with an internal sender thread
pub struct OscBackend {
    tx: Option<Sender<OscEvent>>,
    sender_handle: Option<JoinHandle<()>>,
    dropped: u64,
}

impl OscBackend {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect((host, port))?;
        log::info!("OSC output to {}:{}", host, port);

        let (tx, rx) = bounded(CHANNEL_CAPACITY);
        let sender_handle = thread::Builder::new()
            .name("osc-sender".to_string())
            .spawn(move || sender_loop(socket, rx))
            .map_err(|e| crate::error::Error::Other(format!("Failed to spawn OSC sender: {}", e)))?;

        Ok(Self {
            tx: Some(tx),
            sender_handle: Some(sender_handle),
            dropped: 0,
        })
    }

    fn push(&mut self, event: OscEvent) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                if self.dropped % DROP_LOG_INTERVAL == 1 {
                    log::warn!(
                        "OSC send buffer full, dropped {} messages so far",
                        self.dropped
                    );
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                log::error!("OSC sender thread gone, output disabled");
                self.tx = None;
            }
        }
    }
}

impl OutputBackend for OscBackend {
    fn send_digital(&mut self, index: u16, value: bool, _timestamp: u64) {
        self.push(OscEvent {
            index,
            arg: OscArg::Int(value as i32),
        });
    }

    fn send_analog(&mut self, index: u16, value: f32, _timestamp: u64) {
        self.push(OscEvent {
            index,
            arg: OscArg::Float(value),
        });
    }

    fn send_continuous(&mut self, index: u16, value: f32, _timestamp: u64) {
        self.push(OscEvent {
            index,
            arg: OscArg::Float(value),
        });
    }
}

impl Drop for OscBackend {
    fn drop(&mut self) {
        // Closing the channel stops the sender loop
        self.tx.take();
        if let Some(handle) = self.sender_handle.take() {
            let _ = handle.join();
        }
    }
}

fn sender_loop(socket: UdpSocket, rx: Receiver<OscEvent>) {
    let mut datagram = Vec::with_capacity(64);
    // Blocks until the backend is dropped and the channel disconnects
    while let Ok(event) = rx.recv() {
        encode_message(&mut datagram, event.index, event.arg);
        if let Err(e) = socket.send(&datagram) {
            log::warn!("OSC send failed: {}", e);
        }
    }
    log::debug!("OSC sender thread exiting");
}

/// Encode a single OSC 1.0 message into `out`:
/// padded address, padded typetag string, big-endian argument.
fn encode_message(out: &mut Vec<u8>, index: u16, arg: OscArg) {
    out.clear();
    write_padded_string(out, &format!("/sensors/{}", index));
    match arg {
        OscArg::Int(v) => {
            write_padded_string(out, ",i");
            out.extend_from_slice(&v.to_be_bytes());
        }
        OscArg::Float(v) => {
            write_padded_string(out, ",f");
            out.extend_from_slice(&v.to_be_bytes());
        }
    }
}

/// OSC strings are NUL-terminated and padded to a multiple of four bytes
fn write_padded_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    let padding = 4 - (s.len() % 4);
    out.extend(std::iter::repeat(0u8).take(padding));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_float_message() {
        let mut out = Vec::new();
        encode_message(&mut out, 3, OscArg::Float(0.5));
        // "/sensors/3" is 10 bytes -> padded to 12
        assert_eq!(&out[..10], b"/sensors/3");
        assert_eq!(&out[10..12], &[0, 0]);
        // ",f" padded to 4
        assert_eq!(&out[12..16], b",f\0\0");
        assert_eq!(&out[16..20], &0.5f32.to_be_bytes());
        assert_eq!(out.len() % 4, 0);
    }

    #[test]
    fn encodes_int_message_for_digital() {
        let mut out = Vec::new();
        encode_message(&mut out, 12, OscArg::Int(1));
        assert_eq!(&out[..11], b"/sensors/12");
        assert_eq!(&out[12..16], b",i\0\0");
        assert_eq!(&out[16..20], &1i32.to_be_bytes());
    }

    #[test]
    fn address_length_multiple_of_four_still_terminated() {
        let mut out = Vec::new();
        // "/sensors/123" is 12 bytes; padding must still add a NUL
        write_padded_string(&mut out, "/sensors/123");
        assert_eq!(out.len(), 16);
        assert_eq!(out[12], 0);
    }
}
