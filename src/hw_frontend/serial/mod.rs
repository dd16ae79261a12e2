//! Serial frontend for the microcontroller board.
//!
//! Two threads: the reader blocks in the transport's bounded-timeout read,
//! re-frames the byte stream into 64-byte packets and decodes them into
//! value/error messages; the writer waits on the to-frontend queue, encodes
//! commands into wire packets and tracks them for acknowledgement when
//! verification is enabled.

pub mod protocol;

use self::protocol::{
    cmd, encode_command, parse_quaternion, quat_to_euler, status, status_to_error_kind,
    translate_status_code, verify_message, AckPayload, DataPacket, MessageConcatenator,
    ValuePayload, PACKET_LENGTH,
};
use super::message_tracker::{Expired, MessageTracker, DEFAULT_ACK_TIMEOUT, DEFAULT_MAX_RETRIES};
use super::{AtomicThreadState, HwFrontend, ThreadState, READ_WRITE_TIMEOUT};
use crate::message::{Command, ErrorKind, ErrorMessage, ImuAxis, Message, Value};
use crate::queue::SynchronizedQueue;
use crate::transport::Transport;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const BAUD_RATE: u32 = 115200;

/// Writer wake-up period; bounds both command latency under a quiet queue
/// and the cadence of ack-timeout checks.
const WRITE_WAIT: Duration = Duration::from_millis(100);

/// Pause after an empty or failed read so a non-blocking transport does not
/// spin the reader.
const READ_IDLE_PAUSE: Duration = Duration::from_millis(2);

/// Shared flags and tables split out so both I/O threads and the decoder can
/// hold them.
struct Shared {
    state: AtomicThreadState,
    connected: AtomicBool,
    muted: AtomicBool,
    verify_acks: AtomicBool,
    tracker: MessageTracker,
    pin_to_id: RwLock<HashMap<u16, u16>>,
    imu_index: RwLock<HashMap<ImuAxis, u16>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicThreadState::new(ThreadState::Stopped),
            connected: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            verify_acks: AtomicBool::new(false),
            tracker: MessageTracker::new(DEFAULT_ACK_TIMEOUT, DEFAULT_MAX_RETRIES),
            pin_to_id: RwLock::new(HashMap::new()),
            imu_index: RwLock::new(HashMap::new()),
        }
    }
}

/// Serial hardware frontend
pub struct SerialFrontend {
    transport: Box<dyn Transport>,
    to_frontend_queue: Arc<SynchronizedQueue<Command>>,
    event_queue: Arc<SynchronizedQueue<Message>>,
    shared: Arc<Shared>,
    read_handle: Option<JoinHandle<()>>,
    write_handle: Option<JoinHandle<()>>,
}

impl SerialFrontend {
    pub fn new(
        transport: Box<dyn Transport>,
        to_frontend_queue: Arc<SynchronizedQueue<Command>>,
        event_queue: Arc<SynchronizedQueue<Message>>,
    ) -> Self {
        Self {
            transport,
            to_frontend_queue,
            event_queue,
            shared: Arc::new(Shared::new()),
            read_handle: None,
            write_handle: None,
        }
    }
}

impl HwFrontend for SerialFrontend {
    fn run(&mut self) {
        if self.shared.state.load() == ThreadState::Running {
            return;
        }
        self.shared.state.store(ThreadState::Running);
        self.shared.connected.store(true, Ordering::Release);

        let reader_transport = match self.transport.try_clone() {
            Ok(t) => t,
            Err(e) => {
                log::error!("Failed to clone transport for reader: {}", e);
                self.shared.state.store(ThreadState::Stopped);
                return;
            }
        };
        let writer_transport = match self.transport.try_clone() {
            Ok(t) => t,
            Err(e) => {
                log::error!("Failed to clone transport for writer: {}", e);
                self.shared.state.store(ThreadState::Stopped);
                return;
            }
        };

        let reader_shared = Arc::clone(&self.shared);
        let reader_queue = Arc::clone(&self.event_queue);
        self.read_handle = thread::Builder::new()
            .name("serial-reader".to_string())
            .spawn(move || read_loop(reader_transport, reader_shared, reader_queue))
            .ok();

        let writer_shared = Arc::clone(&self.shared);
        let writer_in = Arc::clone(&self.to_frontend_queue);
        let writer_out = Arc::clone(&self.event_queue);
        self.write_handle = thread::Builder::new()
            .name("serial-writer".to_string())
            .spawn(move || write_loop(writer_transport, writer_shared, writer_in, writer_out))
            .ok();

        log::info!("Serial frontend started");
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
        log::info!("Serial frontend stopped");
    }

    fn connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    fn mute(&self, enabled: bool) {
        self.shared.muted.store(enabled, Ordering::Release);
    }

    fn verify_acks(&self, enabled: bool) {
        self.shared.verify_acks.store(enabled, Ordering::Release);
        if !enabled {
            self.shared.tracker.clear();
        }
    }

    fn install_pin_table(&self, table: Vec<(u16, u16)>) {
        let mut pin_to_id = self.shared.pin_to_id.write();
        pin_to_id.clear();
        pin_to_id.extend(table);
    }

    fn install_imu_table(&self, table: Vec<(ImuAxis, u16)>) {
        let mut imu_index = self.shared.imu_index.write();
        imu_index.clear();
        imu_index.extend(table);
    }
}

impl Drop for SerialFrontend {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Re-frames the incoming byte stream and turns packets into messages.
struct PacketDecoder {
    shared: Arc<Shared>,
    event_queue: Arc<SynchronizedQueue<Message>>,
    buffer: Vec<u8>,
    concatenator: MessageConcatenator,
}

impl PacketDecoder {
    fn new(shared: Arc<Shared>, event_queue: Arc<SynchronizedQueue<Message>>) -> Self {
        Self {
            shared,
            event_queue,
            buffer: Vec::with_capacity(PACKET_LENGTH * 4),
            concatenator: MessageConcatenator::new(),
        }
    }

    /// Accumulate raw bytes and process every complete packet found.
    fn feed_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        while self.buffer.len() >= PACKET_LENGTH {
            if self.buffer[0..3] != protocol::START_HEADER {
                // Resync one byte at a time
                self.buffer.remove(0);
                continue;
            }
            let mut raw = [0u8; PACKET_LENGTH];
            raw.copy_from_slice(&self.buffer[..PACKET_LENGTH]);
            self.buffer.drain(0..PACKET_LENGTH);

            let muted = self.shared.muted.load(Ordering::Acquire);
            match verify_message(&raw) {
                Ok(()) => {
                    if !muted {
                        self.process_packet(&DataPacket::from_bytes(&raw));
                    }
                }
                Err(kind) => {
                    if !muted {
                        log::warn!("Dropping corrupt packet: {:?}", kind);
                    }
                }
            }
        }
    }

    /// Decode one verified packet into internal messages.
    fn process_packet(&mut self, packet: &DataPacket) {
        match packet.cmd {
            cmd::VALUE => {
                let Some(payload) = self.concatenator.add(packet) else {
                    return;
                };
                let value = ValuePayload::parse(payload);
                let pin_to_id = self.shared.pin_to_id.read();
                let Some(&index) = pin_to_id.get(&value.pin_id) else {
                    log::warn!("Value for unmapped hardware pin {}", value.pin_id);
                    return;
                };
                let timestamp = packet.timestamp as u64;
                let message = match value.pin_type {
                    protocol::wire_pin_type::DIGITAL_INPUT => {
                        Message::Value(Value::digital(index, value.value != 0, timestamp))
                    }
                    protocol::wire_pin_type::ANALOG_INPUT => {
                        Message::Value(Value::analog(index, value.value, timestamp))
                    }
                    other => {
                        log::warn!("Value with unknown pin type {}", other);
                        return;
                    }
                };
                self.event_queue.push(message);
            }
            cmd::VALUE_IMU => {
                let (qw, qx, qy, qz) = parse_quaternion(&packet.payload);
                let angles = quat_to_euler(qw, qx, qy, qz);
                let imu_index = self.shared.imu_index.read();
                let timestamp = packet.timestamp as u64;
                for (axis, value) in [
                    (ImuAxis::Yaw, angles.yaw),
                    (ImuAxis::Pitch, angles.pitch),
                    (ImuAxis::Roll, angles.roll),
                ] {
                    if let Some(&index) = imu_index.get(&axis) {
                        self.event_queue
                            .push(Message::Value(Value::continuous(index, value, timestamp)));
                    }
                }
            }
            cmd::ACK => {
                let ack = AckPayload::parse(&packet.payload);
                if self.shared.verify_acks.load(Ordering::Acquire) {
                    self.shared.tracker.confirm(ack.uuid());
                }
                if ack.status != status::OK {
                    let text = format!(
                        "Controller reported {} for cmd {}",
                        translate_status_code(ack.status),
                        ack.acked_cmd
                    );
                    log::warn!("{}", text);
                    if let Some(kind) = status_to_error_kind(ack.status) {
                        self.event_queue
                            .push(Message::Error(ErrorMessage::new(kind, None, text)));
                    }
                }
            }
            other => {
                log::debug!("Ignoring packet with cmd {}", other);
            }
        }
    }
}

fn read_loop(
    mut transport: Box<dyn Transport>,
    shared: Arc<Shared>,
    event_queue: Arc<SynchronizedQueue<Message>>,
) {
    let mut decoder = PacketDecoder::new(Arc::clone(&shared), event_queue);
    let mut chunk = [0u8; PACKET_LENGTH];

    while shared.state.load() == ThreadState::Running {
        match transport.read(&mut chunk) {
            Ok(0) => thread::sleep(READ_IDLE_PAUSE),
            Ok(n) => decoder.feed_bytes(&chunk[..n]),
            Err(e) => {
                if shared.connected.swap(false, Ordering::AcqRel) {
                    log::error!("Serial read failed: {}", e);
                }
                thread::sleep(READ_WRITE_TIMEOUT.min(Duration::from_millis(100)));
            }
        }
    }
    log::debug!("Serial reader exiting");
}

fn write_loop(
    mut transport: Box<dyn Transport>,
    shared: Arc<Shared>,
    to_frontend_queue: Arc<SynchronizedQueue<Command>>,
    event_queue: Arc<SynchronizedQueue<Message>>,
) {
    while shared.state.load() == ThreadState::Running {
        if shared.verify_acks.load(Ordering::Acquire) {
            for expired in shared.tracker.take_expired() {
                handle_expired(expired, &mut *transport, &event_queue);
            }
        }

        if !to_frontend_queue.wait_for_data(WRITE_WAIT) {
            continue;
        }
        while let Some(command) = to_frontend_queue.pop() {
            let Some(packet) = encode_command(&command) else {
                log::debug!("Command {:?} has no wire form", command.op);
                continue;
            };
            let raw = packet.to_bytes();
            match transport.write(&raw) {
                Ok(_) => {
                    shared.connected.store(true, Ordering::Release);
                    if shared.verify_acks.load(Ordering::Acquire) {
                        shared.tracker.track(packet.uuid(), raw.to_vec());
                    }
                }
                Err(e) => {
                    if shared.connected.swap(false, Ordering::AcqRel) {
                        log::error!("Serial write failed: {}", e);
                    }
                }
            }
        }
    }
    log::debug!("Serial writer exiting");
}

/// Resend or surface a command whose ack never came.
fn handle_expired(
    expired: Expired,
    transport: &mut dyn Transport,
    event_queue: &SynchronizedQueue<Message>,
) {
    match expired {
        Expired::Retry { uuid, bytes } => {
            log::warn!("Resending unacked packet {:#x}", uuid);
            if let Err(e) = transport.write(&bytes) {
                log::error!("Resend failed: {}", e);
            }
        }
        Expired::GaveUp { uuid } => {
            event_queue.push(Message::Error(ErrorMessage::new(
                ErrorKind::TimeoutOnResponse,
                None,
                format!("No ack for packet {:#x} after retries", uuid),
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ValueBody;
    use crate::transport::MockTransport;
    use super::protocol::wire_pin_type;

    fn decoder_fixture() -> (PacketDecoder, Arc<Shared>, Arc<SynchronizedQueue<Message>>) {
        let shared = Arc::new(Shared::new());
        let queue = Arc::new(SynchronizedQueue::new());
        let decoder = PacketDecoder::new(Arc::clone(&shared), Arc::clone(&queue));
        (decoder, shared, queue)
    }

    fn value_packet(pin_id: u16, value: u16, pin_type: u8, timestamp: u32) -> DataPacket {
        let mut packet = DataPacket::new(cmd::VALUE, 0, timestamp);
        ValuePayload {
            pin_id,
            value,
            pin_type,
        }
        .write(&mut packet.payload);
        packet
    }

    #[test]
    fn analog_value_is_mapped_through_pin_table() {
        let (mut decoder, shared, queue) = decoder_fixture();
        shared.pin_to_id.write().insert(12, 10);

        let packet = value_packet(12, 35, wire_pin_type::ANALOG_INPUT, 1234);
        decoder.feed_bytes(&packet.to_bytes());

        let Some(Message::Value(value)) = queue.pop() else {
            panic!("expected a value message");
        };
        assert_eq!(value.index, 10);
        assert_eq!(value.body, ValueBody::AnalogRaw(35));
        assert_eq!(value.timestamp, 1234);
        assert!(queue.empty());
    }

    #[test]
    fn digital_value_decodes_as_bool() {
        let (mut decoder, shared, queue) = decoder_fixture();
        shared.pin_to_id.write().insert(3, 3);

        let packet = value_packet(3, 1, wire_pin_type::DIGITAL_INPUT, 10);
        decoder.feed_bytes(&packet.to_bytes());

        let Some(Message::Value(value)) = queue.pop() else {
            panic!("expected a value message");
        };
        assert_eq!(value.body, ValueBody::Digital(true));
    }

    #[test]
    fn unmapped_pin_produces_no_message() {
        let (mut decoder, _shared, queue) = decoder_fixture();
        let packet = value_packet(9, 1, wire_pin_type::ANALOG_INPUT, 1);
        decoder.feed_bytes(&packet.to_bytes());
        assert!(queue.empty());
    }

    #[test]
    fn imu_packet_emits_one_value_per_mapped_axis() {
        let (mut decoder, shared, queue) = decoder_fixture();

        // Without a table the packet produces nothing
        let packet = DataPacket::new(cmd::VALUE_IMU, 2, 55);
        decoder.feed_bytes(&packet.to_bytes());
        assert!(queue.empty());

        {
            let mut imu_index = shared.imu_index.write();
            imu_index.insert(ImuAxis::Yaw, 0);
            imu_index.insert(ImuAxis::Pitch, 1);
            imu_index.insert(ImuAxis::Roll, 2);
        }

        // Zero quaternion decodes to all-zero angles
        decoder.feed_bytes(&packet.to_bytes());
        for expected_index in [0u16, 1, 2] {
            let Some(Message::Value(value)) = queue.pop() else {
                panic!("expected imu value {}", expected_index);
            };
            assert_eq!(value.index, expected_index);
            assert_eq!(value.body, ValueBody::Continuous(0.0));
            assert_eq!(value.timestamp, 55);
        }
        assert!(queue.empty());
    }

    #[test]
    fn muted_frontend_discards_corrupt_and_valid_packets() {
        let (mut decoder, shared, queue) = decoder_fixture();
        shared.pin_to_id.write().insert(1, 1);
        shared.muted.store(true, Ordering::Release);

        // Corrupt packet while muted: silence
        let mut corrupt = value_packet(1, 7, wire_pin_type::ANALOG_INPUT, 1).to_bytes();
        corrupt[10] ^= 0xFF;
        decoder.feed_bytes(&corrupt);
        assert!(queue.empty());

        // Valid packet while muted: still silence
        decoder.feed_bytes(&value_packet(1, 7, wire_pin_type::ANALOG_INPUT, 2).to_bytes());
        assert!(queue.empty());

        // Unmuted valid packet: message
        shared.muted.store(false, Ordering::Release);
        decoder.feed_bytes(&value_packet(1, 7, wire_pin_type::ANALOG_INPUT, 3).to_bytes());
        assert!(!queue.empty());
    }

    #[test]
    fn decoder_resyncs_on_garbage_bytes() {
        let (mut decoder, shared, queue) = decoder_fixture();
        shared.pin_to_id.write().insert(1, 1);

        let mut stream = vec![0xEE, 0x42, 0x00];
        stream.extend_from_slice(&value_packet(1, 5, wire_pin_type::ANALOG_INPUT, 4).to_bytes());
        decoder.feed_bytes(&stream);
        assert!(!queue.empty());
    }

    #[test]
    fn failed_ack_status_becomes_error_message() {
        let (mut decoder, _shared, queue) = decoder_fixture();
        let mut packet = DataPacket::new(cmd::ACK, 0, 9);
        AckPayload {
            status: status::CRC_NOT_CORRECT,
            acked_cmd: cmd::CONFIGURE_PIN,
            acked_sub_cmd: 1,
            acked_timestamp: 5,
        }
        .write(&mut packet.payload);
        decoder.feed_bytes(&packet.to_bytes());

        let Some(Message::Error(error)) = queue.pop() else {
            panic!("expected an error message");
        };
        assert_eq!(error.kind, ErrorKind::CrcNotCorrect);
    }

    #[test]
    fn matching_ack_confirms_tracked_packet() {
        let (mut decoder, shared, queue) = decoder_fixture();
        shared.verify_acks.store(true, Ordering::Release);

        let sent = DataPacket::new(cmd::CONFIGURE_PIN, 3, 88);
        shared.tracker.track(sent.uuid(), sent.to_bytes().to_vec());
        assert_eq!(shared.tracker.pending_count(), 1);

        let mut ack = DataPacket::new(cmd::ACK, 0, 99);
        AckPayload {
            status: status::OK,
            acked_cmd: sent.cmd,
            acked_sub_cmd: sent.sub_cmd,
            acked_timestamp: sent.timestamp,
        }
        .write(&mut ack.payload);
        decoder.feed_bytes(&ack.to_bytes());

        assert_eq!(shared.tracker.pending_count(), 0);
        assert!(queue.empty());
    }

    #[test]
    fn gave_up_entry_reports_timeout_error() {
        let queue = SynchronizedQueue::new();
        let mut transport = MockTransport::new();
        handle_expired(Expired::GaveUp { uuid: 0xABCD }, &mut transport, &queue);

        let Some(Message::Error(error)) = queue.pop() else {
            panic!("expected an error message");
        };
        assert_eq!(error.kind, ErrorKind::TimeoutOnResponse);
    }

    #[test]
    fn frontend_threads_move_data_both_ways() {
        let transport = MockTransport::new();
        let to_frontend = Arc::new(SynchronizedQueue::new());
        let events = Arc::new(SynchronizedQueue::new());
        let mut frontend = SerialFrontend::new(
            Box::new(transport.clone()),
            Arc::clone(&to_frontend),
            Arc::clone(&events),
        );
        frontend.install_pin_table(vec![(12, 10)]);
        frontend.run();
        assert!(frontend.connected());

        // Inbound: value packet ends up on the event queue
        transport.inject_read(&value_packet(12, 35, wire_pin_type::ANALOG_INPUT, 1234).to_bytes());
        assert!(events.wait_for_data(Duration::from_secs(2)));

        // Outbound: command ends up on the wire
        to_frontend.push(Command::new(
            3,
            crate::message::CommandOp::SetSendingDeltaTicks(100),
        ));
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while transport.get_written().is_empty() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let written = transport.get_written();
        assert_eq!(written.len(), PACKET_LENGTH);
        assert_eq!(written[3], cmd::CONFIGURE_PIN);

        frontend.stop();
    }
}
