//! Datagram socket link to the GPIO hardware process.
//!
//! The daemon binds its own socket under a well-known name and connects to
//! the GPIO process's socket. Packets are fixed-size datagrams. A send
//! failure is taken as evidence of disconnection and clears the connected
//! flag; a receive failure does not (the peer may simply be silent).

use crate::error::Result;
use std::fs;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Well-known name of the daemon's own socket
pub const DAEMON_SOCKET_NAME: &str = "/tmp/tarang_io_gpio";

/// Bounded receive timeout so the reader observes stop requests
const RECEIVE_TIMEOUT: Duration = Duration::from_millis(1000);

pub const PACKET_LENGTH: usize = 24;
pub const PAYLOAD_LENGTH: usize = 12;

/// Wire opcodes
pub mod cmd {
    pub const SET_TICK_RATE: u8 = 2;
    pub const CONFIGURE_PIN: u8 = 3;
    pub const SET_DIGITAL_PIN: u8 = 4;
    pub const ENABLE_SENDING: u8 = 5;
    pub const VALUE: u8 = 0x10;
    pub const ACK: u8 = 0x20;
}

/// Field selectors (sub commands) for `CONFIGURE_PIN`
pub mod pin_config {
    pub const PIN_TYPE: u8 = 1;
    pub const SENDING_MODE: u8 = 2;
    pub const DELTA_TICKS: u8 = 3;
    pub const ADC_BITS: u8 = 4;
    pub const FILTER_ORDER: u8 = 5;
    pub const LOWPASS_CUTOFF: u8 = 6;
    pub const SLIDER_THRESHOLD: u8 = 7;
}

/// Pin type codes on the wire
pub mod wire_pin_type {
    pub const DIGITAL_INPUT: u8 = 1;
    pub const ANALOG_INPUT: u8 = 2;
}

/// Fixed-size GPIO packet:
///
/// ```text
/// ┌─────┬─────────┬──────────────┬─────────────┬───────────┬──────────┐
/// │ cmd │ sub_cmd │ pin_id (u16) │ payload[12] │ seq (u32) │ ts (u32) │
/// └─────┴─────────┴──────────────┴─────────────┴───────────┴──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpioPacket {
    pub cmd: u8,
    pub sub_cmd: u8,
    pub pin_id: u16,
    pub payload: [u8; PAYLOAD_LENGTH],
    pub sequence_no: u32,
    pub timestamp: u32,
}

impl GpioPacket {
    pub fn new(cmd: u8, sub_cmd: u8, pin_id: u16, timestamp: u32) -> Self {
        Self {
            cmd,
            sub_cmd,
            pin_id,
            payload: [0; PAYLOAD_LENGTH],
            sequence_no: 0,
            timestamp,
        }
    }

    pub fn to_bytes(&self) -> [u8; PACKET_LENGTH] {
        let mut raw = [0u8; PACKET_LENGTH];
        raw[0] = self.cmd;
        raw[1] = self.sub_cmd;
        raw[2..4].copy_from_slice(&self.pin_id.to_le_bytes());
        raw[4..16].copy_from_slice(&self.payload);
        raw[16..20].copy_from_slice(&self.sequence_no.to_le_bytes());
        raw[20..24].copy_from_slice(&self.timestamp.to_le_bytes());
        raw
    }

    pub fn from_bytes(raw: &[u8; PACKET_LENGTH]) -> Self {
        let mut payload = [0u8; PAYLOAD_LENGTH];
        payload.copy_from_slice(&raw[4..16]);
        Self {
            cmd: raw[0],
            sub_cmd: raw[1],
            pin_id: u16::from_le_bytes([raw[2], raw[3]]),
            payload,
            sequence_no: u32::from_le_bytes([raw[16], raw[17], raw[18], raw[19]]),
            timestamp: u32::from_le_bytes([raw[20], raw[21], raw[22], raw[23]]),
        }
    }
}

/// Named datagram socket pair to the GPIO hardware process.
pub struct GpioHwSocket {
    socket: UnixDatagram,
    own_path: PathBuf,
    peer_path: PathBuf,
    connected: AtomicBool,
}

impl GpioHwSocket {
    /// Bind the daemon socket under its well-known name and connect to the
    /// GPIO process.
    pub fn new(peer_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_own_name(DAEMON_SOCKET_NAME, peer_path)
    }

    pub fn with_own_name(
        own_path: impl AsRef<Path>,
        peer_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let own_path = own_path.as_ref().to_path_buf();
        let peer_path = peer_path.as_ref().to_path_buf();

        // A stale socket file from a previous run blocks the bind
        let _ = fs::remove_file(&own_path);
        let socket = UnixDatagram::bind(&own_path)?;
        socket.set_read_timeout(Some(RECEIVE_TIMEOUT))?;

        let this = Self {
            socket,
            own_path,
            peer_path,
            connected: AtomicBool::new(false),
        };
        // The peer may come up later; a failed first connect is not fatal
        this.reconnect();
        Ok(this)
    }

    /// (Re-)connect to the peer socket. Idempotent.
    pub fn reconnect(&self) -> bool {
        match self.socket.connect(&self.peer_path) {
            Ok(()) => {
                if !self.connected.swap(true, Ordering::AcqRel) {
                    log::info!("Connected to GPIO socket {}", self.peer_path.display());
                }
                true
            }
            Err(e) => {
                self.connected.store(false, Ordering::Release);
                log::debug!(
                    "GPIO socket {} not reachable: {}",
                    self.peer_path.display(),
                    e
                );
                false
            }
        }
    }

    /// Send one packet. Failure clears the connected flag.
    pub fn send_packet(&self, packet: &GpioPacket) -> bool {
        match self.socket.send(&packet.to_bytes()) {
            Ok(_) => true,
            Err(e) => {
                if self.connected.swap(false, Ordering::AcqRel) {
                    log::error!("GPIO send failed: {}", e);
                }
                false
            }
        }
    }

    /// Receive one packet, or `None` on timeout or a short datagram.
    /// Receive failures do not change the connected flag.
    pub fn receive_packet(&self) -> Option<GpioPacket> {
        let mut raw = [0u8; PACKET_LENGTH];
        match self.socket.recv(&mut raw) {
            Ok(n) if n == PACKET_LENGTH => Some(GpioPacket::from_bytes(&raw)),
            Ok(n) => {
                log::warn!("Dropping short GPIO datagram ({} bytes)", n);
                None
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                None
            }
            Err(e) => {
                log::debug!("GPIO receive failed: {}", e);
                None
            }
        }
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl Drop for GpioHwSocket {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.own_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    static SOCKET_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn temp_socket_path(tag: &str) -> PathBuf {
        let n = SOCKET_COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "tarang_test_{}_{}_{}",
            tag,
            std::process::id(),
            n
        ))
    }

    #[test]
    fn packet_serialization_round_trips() {
        let mut packet = GpioPacket::new(cmd::VALUE, 0, 5, 99);
        packet.payload[0] = 0x12;
        packet.sequence_no = 3;
        assert_eq!(GpioPacket::from_bytes(&packet.to_bytes()), packet);
    }

    #[test]
    fn exchanges_packets_with_a_peer() {
        let peer_path = temp_socket_path("peer");
        let peer = UnixDatagram::bind(&peer_path).unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let own_path = temp_socket_path("own");
        let socket = GpioHwSocket::with_own_name(&own_path, &peer_path).unwrap();
        assert!(socket.connected());

        // Daemon -> peer
        let packet = GpioPacket::new(cmd::SET_DIGITAL_PIN, 0, 2, 7);
        assert!(socket.send_packet(&packet));
        let mut raw = [0u8; PACKET_LENGTH];
        let n = peer.recv(&mut raw).unwrap();
        assert_eq!(n, PACKET_LENGTH);
        assert_eq!(GpioPacket::from_bytes(&raw), packet);

        // Peer -> daemon
        let reply = GpioPacket::new(cmd::VALUE, 0, 2, 8);
        peer.send_to(&reply.to_bytes(), &own_path).unwrap();
        assert_eq!(socket.receive_packet(), Some(reply));

        let _ = fs::remove_file(&peer_path);
    }

    #[test]
    fn send_failure_clears_connected_flag() {
        let peer_path = temp_socket_path("vanishing");
        let peer = UnixDatagram::bind(&peer_path).unwrap();

        let own_path = temp_socket_path("own");
        let socket = GpioHwSocket::with_own_name(&own_path, &peer_path).unwrap();
        assert!(socket.connected());

        // Drop the peer and remove its socket file: sends start failing
        drop(peer);
        let _ = fs::remove_file(&peer_path);
        let packet = GpioPacket::new(cmd::SET_DIGITAL_PIN, 0, 1, 1);
        assert!(!socket.send_packet(&packet));
        assert!(!socket.connected());

        // Peer comes back: reconnect is idempotent and restores the flag
        let _peer = UnixDatagram::bind(&peer_path).unwrap();
        assert!(socket.reconnect());
        assert!(socket.reconnect());
        assert!(socket.connected());

        let _ = fs::remove_file(&peer_path);
    }

    #[test]
    fn connecting_to_missing_peer_is_not_fatal() {
        let own_path = temp_socket_path("own");
        let socket = GpioHwSocket::with_own_name(&own_path, "/nonexistent/socket").unwrap();
        assert!(!socket.connected());
    }
}
