//! Frontend for the GPIO hardware process reachable over a local datagram
//! socket.
//!
//! The datagram socket is safe for concurrent send and receive, so both I/O
//! threads share one [`GpioHwSocket`] without a lock. The writer doubles as
//! the reconnect loop: while the link is down it retries the connection at a
//! fixed cadence before sending queued commands.

pub mod socket;

use self::socket::{cmd, pin_config, wire_pin_type, GpioHwSocket, GpioPacket};
use super::{AtomicThreadState, HwFrontend, ThreadState};
use crate::error::Result;
use crate::message::{Command, CommandOp, Message, PinType, SendingMode, Value};
use crate::queue::SynchronizedQueue;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Writer wake-up period when the queue is idle
const WRITE_WAIT: Duration = Duration::from_millis(100);

/// Minimum spacing between reconnect attempts while the link is down
const RECONNECT_PAUSE: Duration = Duration::from_millis(1000);

struct Shared {
    state: AtomicThreadState,
    muted: AtomicBool,
    sequence_no: AtomicU32,
    pin_to_id: RwLock<HashMap<u16, u16>>,
}

/// GPIO-process hardware frontend
pub struct GpioFrontend {
    socket: Arc<GpioHwSocket>,
    to_frontend_queue: Arc<SynchronizedQueue<Command>>,
    event_queue: Arc<SynchronizedQueue<Message>>,
    shared: Arc<Shared>,
    read_handle: Option<JoinHandle<()>>,
    write_handle: Option<JoinHandle<()>>,
}

impl GpioFrontend {
    pub fn new(
        peer_socket: impl AsRef<Path>,
        to_frontend_queue: Arc<SynchronizedQueue<Command>>,
        event_queue: Arc<SynchronizedQueue<Message>>,
    ) -> Result<Self> {
        let socket = GpioHwSocket::new(peer_socket)?;
        Ok(Self::with_socket(socket, to_frontend_queue, event_queue))
    }

    /// Build around an already-bound socket (used by tests and by hosts that
    /// manage socket names themselves).
    pub fn with_socket(
        socket: GpioHwSocket,
        to_frontend_queue: Arc<SynchronizedQueue<Command>>,
        event_queue: Arc<SynchronizedQueue<Message>>,
    ) -> Self {
        Self {
            socket: Arc::new(socket),
            to_frontend_queue,
            event_queue,
            shared: Arc::new(Shared {
                state: AtomicThreadState::new(ThreadState::Stopped),
                muted: AtomicBool::new(false),
                sequence_no: AtomicU32::new(0),
                pin_to_id: RwLock::new(HashMap::new()),
            }),
            read_handle: None,
            write_handle: None,
        }
    }
}

impl HwFrontend for GpioFrontend {
    fn run(&mut self) {
        if self.shared.state.load() == ThreadState::Running {
            return;
        }
        self.shared.state.store(ThreadState::Running);

        let reader_socket = Arc::clone(&self.socket);
        let reader_shared = Arc::clone(&self.shared);
        let reader_queue = Arc::clone(&self.event_queue);
        self.read_handle = thread::Builder::new()
            .name("gpio-reader".to_string())
            .spawn(move || read_loop(reader_socket, reader_shared, reader_queue))
            .ok();

        let writer_socket = Arc::clone(&self.socket);
        let writer_shared = Arc::clone(&self.shared);
        let writer_queue = Arc::clone(&self.to_frontend_queue);
        self.write_handle = thread::Builder::new()
            .name("gpio-writer".to_string())
            .spawn(move || write_loop(writer_socket, writer_shared, writer_queue))
            .ok();

        log::info!("GPIO frontend started");
    }

    fn stop(&mut self) {
        if self.shared.state.load() != ThreadState::Running {
            return;
        }
        self.shared.state.store(ThreadState::Stopping);
        if let Some(handle) = self.read_handle.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.write_handle.take() {
            let _ = handle.join();
        }
        self.shared.state.store(ThreadState::Stopped);
        log::info!("GPIO frontend stopped");
    }

    fn connected(&self) -> bool {
        self.socket.connected()
    }

    fn mute(&self, enabled: bool) {
        self.shared.muted.store(enabled, Ordering::Release);
    }

    fn verify_acks(&self, enabled: bool) {
        // The GPIO process protocol has no ack packets
        if enabled {
            log::warn!("Ack verification is not supported on the GPIO frontend");
        }
    }

    fn install_pin_table(&self, table: Vec<(u16, u16)>) {
        let mut pin_to_id = self.shared.pin_to_id.write();
        pin_to_id.clear();
        pin_to_id.extend(table);
    }
}

impl Drop for GpioFrontend {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_loop(
    socket: Arc<GpioHwSocket>,
    shared: Arc<Shared>,
    event_queue: Arc<SynchronizedQueue<Message>>,
) {
    while shared.state.load() == ThreadState::Running {
        let Some(packet) = socket.receive_packet() else {
            continue; // bounded receive timeout
        };
        if shared.muted.load(Ordering::Acquire) {
            continue;
        }
        match packet.cmd {
            cmd::VALUE => {
                let pin_to_id = shared.pin_to_id.read();
                let Some(&index) = pin_to_id.get(&packet.pin_id) else {
                    log::warn!("Value for unmapped hardware pin {}", packet.pin_id);
                    continue;
                };
                let raw = u16::from_le_bytes([packet.payload[0], packet.payload[1]]);
                let timestamp = packet.timestamp as u64;
                let message = match packet.payload[2] {
                    wire_pin_type::DIGITAL_INPUT => {
                        Message::Value(Value::digital(index, raw != 0, timestamp))
                    }
                    wire_pin_type::ANALOG_INPUT => {
                        Message::Value(Value::analog(index, raw, timestamp))
                    }
                    other => {
                        log::warn!("Value with unknown pin type {}", other);
                        continue;
                    }
                };
                event_queue.push(message);
            }
            cmd::ACK => {
                log::debug!("GPIO ack for seq {}", packet.sequence_no);
            }
            other => {
                log::debug!("Ignoring packet with cmd {}", other);
            }
        }
    }
    log::debug!("GPIO reader exiting");
}

fn write_loop(
    socket: Arc<GpioHwSocket>,
    shared: Arc<Shared>,
    to_frontend_queue: Arc<SynchronizedQueue<Command>>,
) {
    let mut last_reconnect = Instant::now() - RECONNECT_PAUSE;

    while shared.state.load() == ThreadState::Running {
        if !socket.connected() && last_reconnect.elapsed() >= RECONNECT_PAUSE {
            last_reconnect = Instant::now();
            socket.reconnect();
        }

        if !to_frontend_queue.wait_for_data(WRITE_WAIT) {
            continue;
        }
        while let Some(command) = to_frontend_queue.pop() {
            let Some(mut packet) = encode_command(&command) else {
                log::debug!("Command {:?} has no wire form", command.op);
                continue;
            };
            packet.sequence_no = shared.sequence_no.fetch_add(1, Ordering::Relaxed);
            socket.send_packet(&packet);
        }
    }
    log::debug!("GPIO writer exiting");
}

/// Encode an internal command as a GPIO packet. Returns `None` for commands
/// with no wire representation.
fn encode_command(command: &Command) -> Option<GpioPacket> {
    let timestamp = command.timestamp as u32;
    let pin_id = command.index.max(0) as u16;

    let configure = |selector: u8, value: u32| -> GpioPacket {
        let mut packet = GpioPacket::new(cmd::CONFIGURE_PIN, selector, pin_id, timestamp);
        packet.payload[0..4].copy_from_slice(&value.to_le_bytes());
        packet
    };

    match command.op {
        CommandOp::SetPinType(pin_type) => {
            let code = match pin_type {
                PinType::DigitalInput => wire_pin_type::DIGITAL_INPUT,
                PinType::AnalogInput => wire_pin_type::ANALOG_INPUT,
                // The GPIO process has no IMU
                PinType::ImuInput | PinType::Disabled => return None,
            };
            Some(configure(pin_config::PIN_TYPE, code as u32))
        }
        CommandOp::SetSendingMode(mode) => {
            let code = match mode {
                SendingMode::OnValueChanged => 0u32,
                SendingMode::Continuous => 1,
                SendingMode::OnPress => 2,
                SendingMode::OnRelease => 3,
            };
            Some(configure(pin_config::SENDING_MODE, code))
        }
        CommandOp::SetSendingDeltaTicks(ticks) => Some(configure(pin_config::DELTA_TICKS, ticks)),
        CommandOp::SetAdcBitResolution(bits) => {
            Some(configure(pin_config::ADC_BITS, bits as u32))
        }
        CommandOp::SetLowpassFilterOrder(order) => {
            Some(configure(pin_config::FILTER_ORDER, order as u32))
        }
        CommandOp::SetLowpassCutoff(cutoff) => {
            Some(configure(pin_config::LOWPASS_CUTOFF, cutoff.to_bits()))
        }
        CommandOp::SetSliderThreshold(threshold) => {
            Some(configure(pin_config::SLIDER_THRESHOLD, threshold as u32))
        }
        CommandOp::SetSamplingRate(rate) => {
            let mut packet = GpioPacket::new(cmd::SET_TICK_RATE, 0, 0, timestamp);
            packet.payload[0..4].copy_from_slice(&rate.to_le_bytes());
            Some(packet)
        }
        CommandOp::SendDigitalPinValue(value) => {
            let mut packet = GpioPacket::new(cmd::SET_DIGITAL_PIN, 0, pin_id, timestamp);
            packet.payload[0] = value as u8;
            Some(packet)
        }
        CommandOp::EnableSending(enabled) => {
            let mut packet = GpioPacket::new(cmd::ENABLE_SENDING, 0, 0, timestamp);
            packet.payload[0] = enabled as u8;
            Some(packet)
        }
        CommandOp::SetInvertEnabled(_)
        | CommandOp::SetInputScaleRange { .. }
        | CommandOp::SetOutputRange { .. }
        | CommandOp::SetMuteStatus(_)
        | CommandOp::VerifyAcks(_)
        | CommandOp::ReloadConfig => None,
    }
}
