//! Frontend for the XMOS-based board over a local stream socket.
//!
//! The writer keeps a deque of pending outbound packets. With ack
//! verification enabled at most one packet is in flight: the writer blocks
//! on a condition variable until the reader sees the matching ack, retrying
//! on timeout up to a bound before surfacing a TIMEOUT_ON_RESPONSE error.
//! Sequence numbers are monotonic per connection and reset when the link is
//! re-established; `connected` is asserted by the handshake ack and cleared
//! on any transport I/O error.

pub mod protocol;

use self::protocol::{
    cmd, status, AckPayload, CommandCreator, ControlPacket, ValuePayload, PACKET_LENGTH,
};
use super::{AtomicThreadState, HwFrontend, ThreadState, READ_WRITE_TIMEOUT};
use crate::message::{timestamp_now, Command, ErrorKind, ErrorMessage, Message, Value};
use crate::queue::SynchronizedQueue;
use crate::transport::{SocketTransport, Transport};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Writer wake-up period when idle
const WRITE_WAIT: Duration = Duration::from_millis(50);

/// Pause after an empty read on a non-blocking transport
const READ_IDLE_PAUSE: Duration = Duration::from_millis(2);

/// Pause after a failed read before retrying
const READ_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Default time to wait for an ack before resending
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(500);

/// Default resend attempts before giving up on a packet
const DEFAULT_MAX_RETRIES: u32 = 3;

struct Pending {
    packet: ControlPacket,
    sent_at: Instant,
    retries: u32,
}

/// Writer-side send queue, guarded by one mutex with the ready-to-send
/// condition variable attached.
struct SendState {
    list: VecDeque<ControlPacket>,
    pending: Option<Pending>,
    creator: CommandCreator,
}

struct Shared {
    state: AtomicThreadState,
    connected: AtomicBool,
    muted: AtomicBool,
    verify_acks: AtomicBool,
    send_state: Mutex<SendState>,
    ready_to_send: Condvar,
    pin_to_id: RwLock<HashMap<u16, u16>>,
    /// Fresh reader-side transport handed over after a reconnect
    reader_swap: Mutex<Option<Box<dyn Transport>>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicThreadState::new(ThreadState::Stopped),
            connected: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            verify_acks: AtomicBool::new(false),
            send_state: Mutex::new(SendState {
                list: VecDeque::new(),
                pending: None,
                creator: CommandCreator::new(),
            }),
            ready_to_send: Condvar::new(),
            pin_to_id: RwLock::new(HashMap::new()),
            reader_swap: Mutex::new(None),
        }
    }
}

/// XMOS hardware frontend
pub struct XmosFrontend {
    transport: Box<dyn Transport>,
    to_frontend_queue: Arc<SynchronizedQueue<Command>>,
    event_queue: Arc<SynchronizedQueue<Message>>,
    shared: Arc<Shared>,
    socket_path: Option<PathBuf>,
    ack_timeout: Duration,
    max_retries: u32,
    read_handle: Option<JoinHandle<()>>,
    write_handle: Option<JoinHandle<()>>,
}

impl XmosFrontend {
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
            socket_path: None,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            read_handle: None,
            write_handle: None,
        }
    }

    /// Enable reconnection by remembering the peer socket path
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    /// Override ack timing (before `run`)
    pub fn set_ack_config(&mut self, timeout: Duration, max_retries: u32) {
        self.ack_timeout = timeout;
        self.max_retries = max_retries;
    }
}

impl HwFrontend for XmosFrontend {
    fn run(&mut self) {
        if self.shared.state.load() == ThreadState::Running {
            return;
        }
        self.shared.state.store(ThreadState::Running);

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

        // Handshake goes out first; connected flips on its ack
        {
            let mut send_state = self.shared.send_state.lock();
            let hello = send_state.creator.make_hello(timestamp_now() as u32);
            send_state.list.push_back(hello);
        }

        let reader_shared = Arc::clone(&self.shared);
        let reader_queue = Arc::clone(&self.event_queue);
        self.read_handle = thread::Builder::new()
            .name("xmos-reader".to_string())
            .spawn(move || read_loop(reader_transport, reader_shared, reader_queue))
            .ok();

        let writer_shared = Arc::clone(&self.shared);
        let writer_in = Arc::clone(&self.to_frontend_queue);
        let writer_out = Arc::clone(&self.event_queue);
        let socket_path = self.socket_path.clone();
        let ack_timeout = self.ack_timeout;
        let max_retries = self.max_retries;
        self.write_handle = thread::Builder::new()
            .name("xmos-writer".to_string())
            .spawn(move || {
                write_loop(
                    writer_transport,
                    writer_shared,
                    writer_in,
                    writer_out,
                    socket_path,
                    ack_timeout,
                    max_retries,
                )
            })
            .ok();

        log::info!("XMOS frontend started");
    }

    fn stop(&mut self) {
        if self.shared.state.load() != ThreadState::Running {
            return;
        }
        self.shared.state.store(ThreadState::Stopping);
        self.shared.ready_to_send.notify_all();
        if let Some(handle) = self.read_handle.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.write_handle.take() {
            let _ = handle.join();
        }
        self.shared.state.store(ThreadState::Stopped);
        log::info!("XMOS frontend stopped");
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
            // Release a writer parked on the ack gate
            self.shared.ready_to_send.notify_all();
        }
    }

    fn install_pin_table(&self, table: Vec<(u16, u16)>) {
        let mut pin_to_id = self.shared.pin_to_id.write();
        pin_to_id.clear();
        pin_to_id.extend(table);
    }
}

impl Drop for XmosFrontend {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_loop(
    mut transport: Box<dyn Transport>,
    shared: Arc<Shared>,
    event_queue: Arc<SynchronizedQueue<Message>>,
) {
    let mut buffer: Vec<u8> = Vec::with_capacity(PACKET_LENGTH * 8);
    let mut chunk = [0u8; PACKET_LENGTH * 2];

    while shared.state.load() == ThreadState::Running {
        // Adopt the fresh handle after a writer-side reconnect
        if let Some(fresh) = shared.reader_swap.lock().take() {
            transport = fresh;
            buffer.clear();
        }

        match transport.read(&mut chunk) {
            Ok(0) => thread::sleep(READ_IDLE_PAUSE),
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                while buffer.len() >= PACKET_LENGTH {
                    let mut raw = [0u8; PACKET_LENGTH];
                    raw.copy_from_slice(&buffer[..PACKET_LENGTH]);
                    buffer.drain(0..PACKET_LENGTH);
                    handle_packet(&ControlPacket::from_bytes(&raw), &shared, &event_queue);
                }
            }
            Err(e) => {
                if shared.connected.swap(false, Ordering::AcqRel) {
                    log::error!("XMOS read failed: {}", e);
                }
                thread::sleep(READ_ERROR_PAUSE);
            }
        }
    }
    log::debug!("XMOS reader exiting");
}

fn handle_packet(
    packet: &ControlPacket,
    shared: &Arc<Shared>,
    event_queue: &Arc<SynchronizedQueue<Message>>,
) {
    match packet.cmd {
        cmd::ACK => {
            let ack = AckPayload::parse(&packet.payload);
            shared.connected.store(true, Ordering::Release);

            let mut send_state = shared.send_state.lock();
            if let Some(pending) = &send_state.pending {
                if pending.packet.sequence_no == ack.acked_sequence_no {
                    send_state.pending = None;
                    shared.ready_to_send.notify_one();
                }
            }
            drop(send_state);

            if ack.status != status::OK {
                let text = format!(
                    "Board rejected packet seq {} (status {})",
                    ack.acked_sequence_no, ack.status
                );
                log::warn!("{}", text);
                event_queue.push(Message::Error(ErrorMessage::new(
                    ErrorKind::GenericError,
                    None,
                    text,
                )));
            }
        }
        cmd::VALUE => {
            if shared.muted.load(Ordering::Acquire) {
                return;
            }
            let value = ValuePayload::parse(&packet.payload);
            let pin_to_id = shared.pin_to_id.read();
            let Some(&index) = pin_to_id.get(&value.pin_id) else {
                log::warn!("Value for unmapped hardware pin {}", value.pin_id);
                return;
            };
            let timestamp = packet.timestamp as u64;
            let message = match value.pin_type {
                protocol::wire_pin_type::DIGITAL_INPUT => {
                    Value::digital(index, value.value != 0, timestamp)
                }
                protocol::wire_pin_type::ANALOG_INPUT => {
                    Value::analog(index, value.value, timestamp)
                }
                protocol::wire_pin_type::IMU_INPUT => {
                    Value::continuous(index, value.value as f32, timestamp)
                }
                other => {
                    log::warn!("Value with unknown pin type {}", other);
                    return;
                }
            };
            event_queue.push(Message::Value(message));
        }
        other => {
            log::debug!("Ignoring packet with cmd {}", other);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn write_loop(
    mut transport: Box<dyn Transport>,
    shared: Arc<Shared>,
    to_frontend_queue: Arc<SynchronizedQueue<Command>>,
    event_queue: Arc<SynchronizedQueue<Message>>,
    socket_path: Option<PathBuf>,
    ack_timeout: Duration,
    max_retries: u32,
) {
    while shared.state.load() == ThreadState::Running {
        // Move freshly arrived commands into the send list, in queue order
        if to_frontend_queue.wait_for_data(WRITE_WAIT) {
            let mut send_state = shared.send_state.lock();
            while let Some(command) = to_frontend_queue.pop() {
                match send_state.creator.make_command(&command) {
                    Some(packet) => send_state.list.push_back(packet),
                    None => log::debug!("Command {:?} has no wire form", command.op),
                }
            }
        }

        // Decide what goes on the wire under the lock, write after releasing
        let mut to_write: Vec<[u8; PACKET_LENGTH]> = Vec::new();
        let mut gave_up_seq: Option<u32> = None;
        {
            let mut send_state = shared.send_state.lock();
            if !shared.verify_acks.load(Ordering::Acquire) {
                send_state.pending = None;
                while let Some(packet) = send_state.list.pop_front() {
                    to_write.push(packet.to_bytes());
                }
            } else {
                if let Some(pending) = &mut send_state.pending {
                    if pending.sent_at.elapsed() >= ack_timeout {
                        if pending.retries < max_retries {
                            pending.retries += 1;
                            pending.sent_at = Instant::now();
                            log::warn!(
                                "Resending packet seq {} (attempt {})",
                                pending.packet.sequence_no,
                                pending.retries
                            );
                            to_write.push(pending.packet.to_bytes());
                        } else {
                            gave_up_seq = Some(pending.packet.sequence_no);
                            send_state.pending = None;
                        }
                    }
                }
                if send_state.pending.is_none() {
                    if let Some(packet) = send_state.list.pop_front() {
                        to_write.push(packet.to_bytes());
                        send_state.pending = Some(Pending {
                            packet,
                            sent_at: Instant::now(),
                            retries: 0,
                        });
                    }
                }
            }
        }

        if let Some(seq) = gave_up_seq {
            event_queue.push(Message::Error(ErrorMessage::new(
                ErrorKind::TimeoutOnResponse,
                None,
                format!("No ack for packet seq {} after retries", seq),
            )));
        }

        let mut write_failed = false;
        for bytes in &to_write {
            if let Err(e) = transport.write(bytes) {
                if shared.connected.swap(false, Ordering::AcqRel) {
                    log::error!("XMOS write failed: {}", e);
                }
                write_failed = true;
                break;
            }
        }

        if write_failed {
            if let Some(path) = &socket_path {
                try_reconnect(path, &mut transport, &shared);
            }
            continue;
        }

        // Ack gate: park until the reader confirms or the timeout cadence
        if shared.verify_acks.load(Ordering::Acquire) {
            let mut send_state = shared.send_state.lock();
            if send_state.pending.is_some() {
                shared
                    .ready_to_send
                    .wait_for(&mut send_state, ack_timeout.min(WRITE_WAIT));
            }
        }
    }
    log::debug!("XMOS writer exiting");
}

/// Re-establish the stream socket. On success the sequence numbering
/// restarts, a fresh handshake is queued and the reader receives its new
/// handle through the swap slot.
fn try_reconnect(path: &PathBuf, transport: &mut Box<dyn Transport>, shared: &Arc<Shared>) {
    match SocketTransport::connect(path, READ_WRITE_TIMEOUT) {
        Ok(fresh) => {
            let reader_half = match fresh.try_clone() {
                Ok(t) => t,
                Err(e) => {
                    log::error!("Reconnected but failed to clone for reader: {}", e);
                    return;
                }
            };
            *shared.reader_swap.lock() = Some(reader_half);
            *transport = Box::new(fresh);

            let mut send_state = shared.send_state.lock();
            send_state.creator.reset_sequence();
            send_state.pending = None;
            let hello = send_state.creator.make_hello(timestamp_now() as u32);
            send_state.list.push_front(hello);
            log::info!("Reconnected to XMOS socket {}", path.display());
        }
        Err(e) => {
            log::debug!("Reconnect attempt failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CommandOp, ValueBody};
    use crate::transport::MockTransport;

    fn frontend_fixture(
        ack_timeout: Duration,
        max_retries: u32,
    ) -> (
        XmosFrontend,
        MockTransport,
        Arc<SynchronizedQueue<Command>>,
        Arc<SynchronizedQueue<Message>>,
    ) {
        let transport = MockTransport::new();
        let to_frontend = Arc::new(SynchronizedQueue::new());
        let events = Arc::new(SynchronizedQueue::new());
        let mut frontend = XmosFrontend::new(
            Box::new(transport.clone()),
            Arc::clone(&to_frontend),
            Arc::clone(&events),
        );
        frontend.set_ack_config(ack_timeout, max_retries);
        (frontend, transport, to_frontend, events)
    }

    fn ack_packet(acked_sequence_no: u32) -> ControlPacket {
        let mut packet = ControlPacket::new(cmd::ACK, 0, 0, 0);
        AckPayload {
            acked_sequence_no,
            status: status::OK,
        }
        .write(&mut packet.payload);
        packet
    }

    fn written_packet_count(transport: &MockTransport) -> usize {
        transport.get_written().len() / PACKET_LENGTH
    }

    fn wait_until(deadline: Duration, mut predicate: impl FnMut() -> bool) -> bool {
        let end = Instant::now() + deadline;
        while Instant::now() < end {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn handshake_ack_asserts_connected() {
        let (mut frontend, transport, _to_frontend, _events) =
            frontend_fixture(DEFAULT_ACK_TIMEOUT, DEFAULT_MAX_RETRIES);
        frontend.run();
        assert!(!frontend.connected());

        // Hello goes out with seq 0
        assert!(wait_until(Duration::from_secs(2), || {
            written_packet_count(&transport) >= 1
        }));
        transport.inject_read(&ack_packet(0).to_bytes());
        assert!(wait_until(Duration::from_secs(2), || frontend.connected()));
        frontend.stop();
    }

    #[test]
    fn ack_verification_allows_one_packet_in_flight() {
        let (mut frontend, transport, to_frontend, _events) =
            frontend_fixture(Duration::from_secs(10), 1);
        frontend.verify_acks(true);
        frontend.run();

        // Hello (seq 0) is in flight; both commands must queue behind it
        to_frontend.push(Command::new(1, CommandOp::SetSendingDeltaTicks(5)));
        to_frontend.push(Command::new(2, CommandOp::SetSendingDeltaTicks(6)));
        assert!(wait_until(Duration::from_secs(2), || {
            written_packet_count(&transport) == 1
        }));
        thread::sleep(Duration::from_millis(150));
        assert_eq!(written_packet_count(&transport), 1);

        // Ack hello: exactly one command follows
        transport.inject_read(&ack_packet(0).to_bytes());
        assert!(wait_until(Duration::from_secs(2), || {
            written_packet_count(&transport) == 2
        }));
        thread::sleep(Duration::from_millis(150));
        assert_eq!(written_packet_count(&transport), 2);

        // Ack the first command: the second follows in order
        transport.inject_read(&ack_packet(1).to_bytes());
        assert!(wait_until(Duration::from_secs(2), || {
            written_packet_count(&transport) == 3
        }));
        let written = transport.get_written();
        let last = ControlPacket::from_bytes(
            written[PACKET_LENGTH * 2..PACKET_LENGTH * 3]
                .try_into()
                .unwrap(),
        );
        assert_eq!(last.sequence_no, 2);
        frontend.stop();
    }

    #[test]
    fn unacked_packet_retries_then_reports_timeout() {
        let (mut frontend, transport, to_frontend, events) =
            frontend_fixture(Duration::from_millis(20), 2);
        frontend.verify_acks(true);
        frontend.run();
        to_frontend.push(Command::new(1, CommandOp::SetSendingDeltaTicks(5)));

        // No acks ever arrive: expect a timeout error on the event queue
        let found_error = wait_until(Duration::from_secs(5), || {
            while let Some(message) = events.pop() {
                if let Message::Error(error) = message {
                    if error.kind == ErrorKind::TimeoutOnResponse {
                        return true;
                    }
                }
            }
            false
        });
        assert!(found_error, "expected a TIMEOUT_ON_RESPONSE error");

        // The hello packet went out more than once (initial send + retries)
        assert!(written_packet_count(&transport) >= 2);
        frontend.stop();
    }

    #[test]
    fn value_packets_map_through_pin_table_and_respect_mute() {
        let (mut frontend, transport, _to_frontend, events) =
            frontend_fixture(DEFAULT_ACK_TIMEOUT, DEFAULT_MAX_RETRIES);
        frontend.install_pin_table(vec![(7, 2)]);
        frontend.run();

        let mut value = ControlPacket::new(cmd::VALUE, 0, 9, 500);
        ValuePayload {
            pin_id: 7,
            value: 321,
            pin_type: protocol::wire_pin_type::ANALOG_INPUT,
        }
        .write(&mut value.payload);

        frontend.mute(true);
        transport.inject_read(&value.to_bytes());
        thread::sleep(Duration::from_millis(100));
        assert!(events.empty());

        frontend.mute(false);
        transport.inject_read(&value.to_bytes());
        assert!(events.wait_for_data(Duration::from_secs(2)));
        let Some(Message::Value(decoded)) = events.pop() else {
            panic!("expected a value message");
        };
        assert_eq!(decoded.index, 2);
        assert_eq!(decoded.body, ValueBody::AnalogRaw(321));
        assert_eq!(decoded.timestamp, 500);
        frontend.stop();
    }
}
