//! Control protocol for the XMOS-based board.
//!
//! Wire unit is a fixed 32-byte packet over a reliable byte-stream
//! transport, so there is no framing header or checksum:
//!
//! ```text
//! ┌─────┬─────────┬──────────┬─────────────┬───────────┬──────────┐
//! │ cmd │ sub_cmd │ reserved │ payload[20] │ seq (u32) │ ts (u32) │
//! └─────┴─────────┴──────────┴─────────────┴───────────┴──────────┘
//! ```
//!
//! Sequence numbers are monotonic per connection and reset on reconnect;
//! an ack packet carries the acknowledged sequence number.

use crate::message::{Command, CommandOp, PinType, SendingMode};

pub const PACKET_LENGTH: usize = 32;
pub const PAYLOAD_LENGTH: usize = 20;

/// Wire opcodes
pub mod cmd {
    pub const SYSTEM_CONTROL: u8 = 1;
    pub const SET_TICK_RATE: u8 = 2;
    pub const CONFIGURE_PIN: u8 = 3;
    pub const SET_DIGITAL_PIN: u8 = 4;
    pub const ENABLE_SENDING: u8 = 5;
    pub const VALUE: u8 = 0x10;
    pub const ACK: u8 = 0x20;
}

/// Sub commands for `SYSTEM_CONTROL`
pub mod system {
    pub const HELLO: u8 = 1;
    pub const STOP: u8 = 2;
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
    pub const IMU_INPUT: u8 = 3;
}

pub mod status {
    pub const OK: u8 = 0;
}

/// Fixed-size control packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlPacket {
    pub cmd: u8,
    pub sub_cmd: u8,
    pub payload: [u8; PAYLOAD_LENGTH],
    pub sequence_no: u32,
    pub timestamp: u32,
}

impl ControlPacket {
    pub fn new(cmd: u8, sub_cmd: u8, sequence_no: u32, timestamp: u32) -> Self {
        Self {
            cmd,
            sub_cmd,
            payload: [0; PAYLOAD_LENGTH],
            sequence_no,
            timestamp,
        }
    }

    pub fn to_bytes(&self) -> [u8; PACKET_LENGTH] {
        let mut raw = [0u8; PACKET_LENGTH];
        raw[0] = self.cmd;
        raw[1] = self.sub_cmd;
        raw[4..24].copy_from_slice(&self.payload);
        raw[24..28].copy_from_slice(&self.sequence_no.to_le_bytes());
        raw[28..32].copy_from_slice(&self.timestamp.to_le_bytes());
        raw
    }

    pub fn from_bytes(raw: &[u8; PACKET_LENGTH]) -> Self {
        let mut payload = [0u8; PAYLOAD_LENGTH];
        payload.copy_from_slice(&raw[4..24]);
        Self {
            cmd: raw[0],
            sub_cmd: raw[1],
            payload,
            sequence_no: u32::from_le_bytes([raw[24], raw[25], raw[26], raw[27]]),
            timestamp: u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]),
        }
    }
}

/// Ack payload: `acked seq (u32) | status (u8)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AckPayload {
    pub acked_sequence_no: u32,
    pub status: u8,
}

impl AckPayload {
    pub fn parse(payload: &[u8]) -> Self {
        Self {
            acked_sequence_no: u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
            status: payload[4],
        }
    }

    pub fn write(&self, payload: &mut [u8]) {
        payload[0..4].copy_from_slice(&self.acked_sequence_no.to_le_bytes());
        payload[4] = self.status;
    }
}

/// Value payload: `pin_id (u16) | value (u16) | pin_type (u8)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValuePayload {
    pub pin_id: u16,
    pub value: u16,
    pub pin_type: u8,
}

impl ValuePayload {
    pub fn parse(payload: &[u8]) -> Self {
        Self {
            pin_id: u16::from_le_bytes([payload[0], payload[1]]),
            value: u16::from_le_bytes([payload[2], payload[3]]),
            pin_type: payload[4],
        }
    }

    pub fn write(&self, payload: &mut [u8]) {
        payload[0..2].copy_from_slice(&self.pin_id.to_le_bytes());
        payload[2..4].copy_from_slice(&self.value.to_le_bytes());
        payload[4] = self.pin_type;
    }
}

/// Builds outbound packets with monotonic sequence numbers.
pub struct CommandCreator {
    sequence_no: u32,
}

impl Default for CommandCreator {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandCreator {
    pub fn new() -> Self {
        Self { sequence_no: 0 }
    }

    /// Restart numbering after a reconnect
    pub fn reset_sequence(&mut self) {
        self.sequence_no = 0;
    }

    fn next_sequence(&mut self) -> u32 {
        let seq = self.sequence_no;
        self.sequence_no = self.sequence_no.wrapping_add(1);
        seq
    }

    /// Handshake packet sent when a connection is (re)established
    pub fn make_hello(&mut self, timestamp: u32) -> ControlPacket {
        ControlPacket::new(
            cmd::SYSTEM_CONTROL,
            system::HELLO,
            self.next_sequence(),
            timestamp,
        )
    }

    /// Encode an internal command. Returns `None` for commands with no wire
    /// representation (host-side mapping configuration).
    pub fn make_command(&mut self, command: &Command) -> Option<ControlPacket> {
        let timestamp = command.timestamp as u32;
        let pin_idx = command.index.max(0) as u16;

        let mut configure = |selector: u8, value: u32| -> ControlPacket {
            let mut packet =
                ControlPacket::new(cmd::CONFIGURE_PIN, selector, self.next_sequence(), timestamp);
            packet.payload[0..2].copy_from_slice(&pin_idx.to_le_bytes());
            packet.payload[2..6].copy_from_slice(&value.to_le_bytes());
            packet
        };

        match command.op {
            CommandOp::SetPinType(pin_type) => {
                let code = match pin_type {
                    PinType::DigitalInput => wire_pin_type::DIGITAL_INPUT,
                    PinType::AnalogInput => wire_pin_type::ANALOG_INPUT,
                    PinType::ImuInput => wire_pin_type::IMU_INPUT,
                    PinType::Disabled => 0,
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
            CommandOp::SetSendingDeltaTicks(ticks) => {
                Some(configure(pin_config::DELTA_TICKS, ticks))
            }
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
                let mut packet =
                    ControlPacket::new(cmd::SET_TICK_RATE, 0, self.next_sequence(), timestamp);
                packet.payload[0..4].copy_from_slice(&rate.to_le_bytes());
                Some(packet)
            }
            CommandOp::SendDigitalPinValue(value) => {
                let mut packet =
                    ControlPacket::new(cmd::SET_DIGITAL_PIN, 0, self.next_sequence(), timestamp);
                packet.payload[0..2].copy_from_slice(&pin_idx.to_le_bytes());
                packet.payload[2] = value as u8;
                Some(packet)
            }
            CommandOp::EnableSending(enabled) => {
                let mut packet =
                    ControlPacket::new(cmd::ENABLE_SENDING, 0, self.next_sequence(), timestamp);
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
}

/// Decode a command packet back into its internal form. Mirrors
/// [`CommandCreator::make_command`]; timestamp and sequence number are not
/// recovered.
pub fn decode_command(packet: &ControlPacket) -> Option<Command> {
    match packet.cmd {
        cmd::CONFIGURE_PIN => {
            let pin = u16::from_le_bytes([packet.payload[0], packet.payload[1]]);
            let value = u32::from_le_bytes([
                packet.payload[2],
                packet.payload[3],
                packet.payload[4],
                packet.payload[5],
            ]);
            let op = match packet.sub_cmd {
                pin_config::PIN_TYPE => CommandOp::SetPinType(match value as u8 {
                    wire_pin_type::DIGITAL_INPUT => PinType::DigitalInput,
                    wire_pin_type::ANALOG_INPUT => PinType::AnalogInput,
                    wire_pin_type::IMU_INPUT => PinType::ImuInput,
                    _ => PinType::Disabled,
                }),
                pin_config::SENDING_MODE => CommandOp::SetSendingMode(match value {
                    0 => SendingMode::OnValueChanged,
                    1 => SendingMode::Continuous,
                    2 => SendingMode::OnPress,
                    3 => SendingMode::OnRelease,
                    _ => return None,
                }),
                pin_config::DELTA_TICKS => CommandOp::SetSendingDeltaTicks(value),
                pin_config::ADC_BITS => CommandOp::SetAdcBitResolution(value as u8),
                pin_config::FILTER_ORDER => CommandOp::SetLowpassFilterOrder(value as u8),
                pin_config::LOWPASS_CUTOFF => CommandOp::SetLowpassCutoff(f32::from_bits(value)),
                pin_config::SLIDER_THRESHOLD => CommandOp::SetSliderThreshold(value as u16),
                _ => return None,
            };
            Some(Command::new(pin as i32, op))
        }
        cmd::SET_TICK_RATE => {
            let rate = f32::from_le_bytes([
                packet.payload[0],
                packet.payload[1],
                packet.payload[2],
                packet.payload[3],
            ]);
            Some(Command::global(CommandOp::SetSamplingRate(rate)))
        }
        cmd::SET_DIGITAL_PIN => {
            let pin = u16::from_le_bytes([packet.payload[0], packet.payload[1]]);
            Some(Command::new(
                pin as i32,
                CommandOp::SendDigitalPinValue(packet.payload[2] != 0),
            ))
        }
        cmd::ENABLE_SENDING => Some(Command::global(CommandOp::EnableSending(
            packet.payload[0] != 0,
        ))),
        _ => None,
    }
}
