//! Serial wire protocol for the microcontroller link.
//!
//! Wire unit is a fixed 64-byte packet:
//!
//! ```text
//! ┌───────────┬─────┬─────────┬─────────────┬──────┬──────────┬─────┬───────────┐
//! │ start 1 2 3│ cmd │ sub_cmd │ payload[49] │ cont │ ts (u32) │ crc │ stop 4 5 6│
//! └───────────┴─────┴─────────┴─────────────┴──────┴──────────┴─────┴───────────┘
//! ```
//!
//! The crc is the unsigned 16-bit sum of cmd, sub_cmd and every byte of
//! payload, continuation and timestamp. It is a plain sum kept bit-for-bit
//! for wire compatibility, not a collision-resistant checksum. Multi-part
//! payloads set `continuation = 1` on the first packet and `0` on the last;
//! exactly two consecutive halves are joined.

use crate::message::{Command, CommandOp, ErrorKind, PinType, SendingMode};

pub const START_HEADER: [u8; 3] = [1, 2, 3];
pub const STOP_HEADER: [u8; 3] = [4, 5, 6];

pub const PAYLOAD_LENGTH: usize = 49;
pub const PACKET_LENGTH: usize = 64;

/// Sampling rate the divisor-based wire encoding is relative to
pub const MAX_SAMPLING_RATE_HZ: f32 = 1000.0;

/*
 * To avoid singularities near 90 degrees this is set below 0.5;
 * 0.4995 clamps at around 86 degrees.
 */
pub const QUATERNION_SINGULARITY_LIMIT: f32 = 0.4995;

/// Wire opcodes
pub mod cmd {
    pub const HELLO: u8 = 1;
    pub const ENABLE_SENDING_PACKETS: u8 = 4;
    pub const SET_SAMPLING_RATE: u8 = 5;
    pub const CONFIGURE_PIN: u8 = 100;
    pub const SET_DIGITAL_PIN: u8 = 104;
    pub const ACK: u8 = 250;
    pub const VALUE_IMU: u8 = 253;
    pub const VALUE: u8 = 255;
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
    pub const DISABLED: u8 = 0;
    pub const DIGITAL_INPUT: u8 = 1;
    pub const ANALOG_INPUT: u8 = 2;
    pub const IMU_INPUT: u8 = 3;
}

/// Controller status codes carried in ack packets
pub mod status {
    pub const OK: u8 = 0;
    pub const START_HEADER_NOT_PRESENT: u8 = 1;
    pub const STOP_HEADER_NOT_PRESENT: u8 = 2;
    pub const CRC_NOT_CORRECT: u8 = 3;
    pub const CMD_NOT_VALID: u8 = 4;
    pub const CMD_NOT_PROCESSED: u8 = 5;
    pub const TIMEOUT_ON_RESPONSE: u8 = 6;
    pub const IMU_NOT_CONNECTED: u8 = 7;
    pub const SERIAL_DEVICE_PORT_NOT_OPEN: u8 = 8;
    pub const GENERIC_ERROR: u8 = 255;
}

/// Translate a controller status code for logs and error reports
pub fn translate_status_code(code: u8) -> &'static str {
    match code {
        status::OK => "OK",
        status::START_HEADER_NOT_PRESENT => "START_HEADER_NOT_PRESENT",
        status::STOP_HEADER_NOT_PRESENT => "STOP_HEADER_NOT_PRESENT",
        status::CRC_NOT_CORRECT => "CRC_NOT_CORRECT",
        status::CMD_NOT_VALID => "CMD_NOT_VALID",
        status::CMD_NOT_PROCESSED => "CMD_NOT_PROCESSED",
        status::TIMEOUT_ON_RESPONSE => "TIMEOUT_ON_RESPONSE",
        status::IMU_NOT_CONNECTED => "IMU_NOT_CONNECTED",
        status::SERIAL_DEVICE_PORT_NOT_OPEN => "SERIAL_DEVICE_PORT_NOT_OPEN",
        status::GENERIC_ERROR => "GENERIC_ERROR",
        _ => "UNKNOWN_STATUS_CODE",
    }
}

/// Map a non-OK controller status to the internal error kind
pub fn status_to_error_kind(code: u8) -> Option<ErrorKind> {
    match code {
        status::OK => None,
        status::START_HEADER_NOT_PRESENT => Some(ErrorKind::StartHeaderNotPresent),
        status::STOP_HEADER_NOT_PRESENT => Some(ErrorKind::StopHeaderNotPresent),
        status::CRC_NOT_CORRECT => Some(ErrorKind::CrcNotCorrect),
        status::CMD_NOT_VALID => Some(ErrorKind::CmdNotValid),
        status::TIMEOUT_ON_RESPONSE => Some(ErrorKind::TimeoutOnResponse),
        status::IMU_NOT_CONNECTED => Some(ErrorKind::ImuNotConnected),
        status::SERIAL_DEVICE_PORT_NOT_OPEN => Some(ErrorKind::SerialDevicePortNotOpen),
        _ => Some(ErrorKind::GenericError),
    }
}

/// Decoded 64-byte data packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataPacket {
    pub cmd: u8,
    pub sub_cmd: u8,
    pub payload: [u8; PAYLOAD_LENGTH],
    pub continuation: u8,
    pub timestamp: u32,
}

impl DataPacket {
    pub fn new(cmd: u8, sub_cmd: u8, timestamp: u32) -> Self {
        Self {
            cmd,
            sub_cmd,
            payload: [0; PAYLOAD_LENGTH],
            continuation: 0,
            timestamp,
        }
    }

    /// Parse a raw 64-byte buffer without verifying headers or crc
    pub fn from_bytes(raw: &[u8; PACKET_LENGTH]) -> Self {
        let mut payload = [0u8; PAYLOAD_LENGTH];
        payload.copy_from_slice(&raw[5..54]);
        Self {
            cmd: raw[3],
            sub_cmd: raw[4],
            payload,
            continuation: raw[54],
            timestamp: u32::from_le_bytes([raw[55], raw[56], raw[57], raw[58]]),
        }
    }

    /// Serialize, computing the crc
    pub fn to_bytes(&self) -> [u8; PACKET_LENGTH] {
        let mut raw = [0u8; PACKET_LENGTH];
        raw[0..3].copy_from_slice(&START_HEADER);
        raw[3] = self.cmd;
        raw[4] = self.sub_cmd;
        raw[5..54].copy_from_slice(&self.payload);
        raw[54] = self.continuation;
        raw[55..59].copy_from_slice(&self.timestamp.to_le_bytes());
        let crc = calculate_crc(self);
        raw[59..61].copy_from_slice(&crc.to_le_bytes());
        raw[61..64].copy_from_slice(&STOP_HEADER);
        raw
    }

    /// Packet identity used to correlate acks to sent commands
    pub fn uuid(&self) -> u64 {
        packet_uuid(self.cmd, self.sub_cmd, self.timestamp)
    }
}

/// `uuid = timestamp | cmd << 32 | sub_cmd << 48`
#[inline]
pub fn packet_uuid(cmd: u8, sub_cmd: u8, timestamp: u32) -> u64 {
    timestamp as u64 | ((cmd as u64) << 32) | ((sub_cmd as u64) << 48)
}

/// Unsigned 16-bit sum over the packet's scanned fields. Pure: identical
/// inputs yield identical outputs.
pub fn calculate_crc(packet: &DataPacket) -> u16 {
    let mut sum = packet.cmd as u16;
    sum = sum.wrapping_add(packet.sub_cmd as u16);
    for byte in packet.payload {
        sum = sum.wrapping_add(byte as u16);
    }
    sum = sum.wrapping_add(packet.continuation as u16);
    for byte in packet.timestamp.to_le_bytes() {
        sum = sum.wrapping_add(byte as u16);
    }
    sum
}

/// Verify that a received 64-byte buffer has not been corrupted.
pub fn verify_message(raw: &[u8; PACKET_LENGTH]) -> Result<(), ErrorKind> {
    if raw[0..3] != START_HEADER {
        return Err(ErrorKind::StartHeaderNotPresent);
    }
    if raw[61..64] != STOP_HEADER {
        return Err(ErrorKind::StopHeaderNotPresent);
    }
    let stored = u16::from_le_bytes([raw[59], raw[60]]);
    if calculate_crc(&DataPacket::from_bytes(raw)) != stored {
        return Err(ErrorKind::CrcNotCorrect);
    }
    Ok(())
}

/// Euler angles derived from the IMU quaternion, in radians
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EulerAngles {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

/// Convert a quaternion to Euler angles, emitting the degenerate branch
/// near the +/-90 degree pitch singularity.
pub fn quat_to_euler(qw: f32, qx: f32, qy: f32, qz: f32) -> EulerAngles {
    use std::f32::consts::FRAC_PI_2;
    let singularity = qw * qx + qy * qz;
    if singularity > QUATERNION_SINGULARITY_LIMIT {
        EulerAngles {
            yaw: 2.0 * qx.atan2(qw),
            pitch: FRAC_PI_2,
            roll: 0.0,
        }
    } else if singularity < -QUATERNION_SINGULARITY_LIMIT {
        EulerAngles {
            yaw: -2.0 * qx.atan2(qw),
            pitch: -FRAC_PI_2,
            roll: 0.0,
        }
    } else {
        EulerAngles {
            yaw: (2.0 * qy * qw - 2.0 * qx * qz).atan2(1.0 - 2.0 * qy * qy - 2.0 * qz * qz),
            pitch: (2.0 * qx * qy + 2.0 * qz * qw).asin(),
            roll: (2.0 * qx * qw - 2.0 * qy * qz).atan2(1.0 - 2.0 * qx * qx - 2.0 * qz * qz),
        }
    }
}

/// Assembles payloads sent as two consecutive packets.
///
/// The first part arrives with `continuation = 1`, the second with `0`.
/// Single-part payloads pass straight through.
pub struct MessageConcatenator {
    waiting: bool,
    storage: [u8; PAYLOAD_LENGTH * 2],
}

impl Default for MessageConcatenator {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageConcatenator {
    pub fn new() -> Self {
        Self {
            waiting: false,
            storage: [0; PAYLOAD_LENGTH * 2],
        }
    }

    /// Returns the complete payload when one is available.
    pub fn add(&mut self, packet: &DataPacket) -> Option<&[u8]> {
        if !self.waiting && packet.continuation == 0 {
            self.storage[..PAYLOAD_LENGTH].copy_from_slice(&packet.payload);
            return Some(&self.storage[..PAYLOAD_LENGTH]);
        }
        if packet.continuation != 0 {
            self.storage[..PAYLOAD_LENGTH].copy_from_slice(&packet.payload);
            self.waiting = true;
            return None;
        }
        // waiting and this is the closing half
        self.storage[PAYLOAD_LENGTH..].copy_from_slice(&packet.payload);
        self.waiting = false;
        Some(&self.storage)
    }
}

// ============================================================================
// Incoming payload views
// ============================================================================

/// Value report payload: `pin_id (u16) | value (u16) | pin_type (u8)`
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

/// IMU report payload: quaternion `(qw, qx, qy, qz)` as four f32
pub fn parse_quaternion(payload: &[u8]) -> (f32, f32, f32, f32) {
    let read = |offset: usize| {
        f32::from_le_bytes([
            payload[offset],
            payload[offset + 1],
            payload[offset + 2],
            payload[offset + 3],
        ])
    };
    (read(0), read(4), read(8), read(12))
}

/// Ack payload: `status (u8) | acked cmd (u8) | acked sub_cmd (u8) | acked ts (u32)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AckPayload {
    pub status: u8,
    pub acked_cmd: u8,
    pub acked_sub_cmd: u8,
    pub acked_timestamp: u32,
}

impl AckPayload {
    pub fn parse(payload: &[u8]) -> Self {
        Self {
            status: payload[0],
            acked_cmd: payload[1],
            acked_sub_cmd: payload[2],
            acked_timestamp: u32::from_le_bytes([payload[3], payload[4], payload[5], payload[6]]),
        }
    }

    pub fn write(&self, payload: &mut [u8]) {
        payload[0] = self.status;
        payload[1] = self.acked_cmd;
        payload[2] = self.acked_sub_cmd;
        payload[3..7].copy_from_slice(&self.acked_timestamp.to_le_bytes());
    }

    /// Identity of the packet being acknowledged
    pub fn uuid(&self) -> u64 {
        packet_uuid(self.acked_cmd, self.acked_sub_cmd, self.acked_timestamp)
    }
}

// ============================================================================
// Pin configuration payload (CONFIGURE_PIN)
// ============================================================================

/// Packed pin-configuration payload:
///
/// ```text
/// 0..2   pin_idx (u16)      8      adc_bits (u8)
/// 2      pin_type (u8)      9      filter_order (u8)
/// 3      sending_mode (u8)  10..14 lowpass_cutoff (f32)
/// 4..8   delta_ticks (u32)  14..16 slider_threshold (u16)
/// ```
///
/// The sub command selects which field the controller applies.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PinConfigPayload {
    pub pin_idx: u16,
    pub pin_type: u8,
    pub sending_mode: u8,
    pub delta_ticks: u32,
    pub adc_bits: u8,
    pub filter_order: u8,
    pub lowpass_cutoff: f32,
    pub slider_threshold: u16,
}

impl PinConfigPayload {
    pub fn parse(payload: &[u8]) -> Self {
        Self {
            pin_idx: u16::from_le_bytes([payload[0], payload[1]]),
            pin_type: payload[2],
            sending_mode: payload[3],
            delta_ticks: u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]),
            adc_bits: payload[8],
            filter_order: payload[9],
            lowpass_cutoff: f32::from_le_bytes([
                payload[10],
                payload[11],
                payload[12],
                payload[13],
            ]),
            slider_threshold: u16::from_le_bytes([payload[14], payload[15]]),
        }
    }

    pub fn write(&self, payload: &mut [u8]) {
        payload[0..2].copy_from_slice(&self.pin_idx.to_le_bytes());
        payload[2] = self.pin_type;
        payload[3] = self.sending_mode;
        payload[4..8].copy_from_slice(&self.delta_ticks.to_le_bytes());
        payload[8] = self.adc_bits;
        payload[9] = self.filter_order;
        payload[10..14].copy_from_slice(&self.lowpass_cutoff.to_le_bytes());
        payload[14..16].copy_from_slice(&self.slider_threshold.to_le_bytes());
    }
}

fn pin_type_to_wire(pin_type: PinType) -> u8 {
    match pin_type {
        PinType::Disabled => wire_pin_type::DISABLED,
        PinType::DigitalInput => wire_pin_type::DIGITAL_INPUT,
        PinType::AnalogInput => wire_pin_type::ANALOG_INPUT,
        PinType::ImuInput => wire_pin_type::IMU_INPUT,
    }
}

fn pin_type_from_wire(code: u8) -> Option<PinType> {
    match code {
        wire_pin_type::DISABLED => Some(PinType::Disabled),
        wire_pin_type::DIGITAL_INPUT => Some(PinType::DigitalInput),
        wire_pin_type::ANALOG_INPUT => Some(PinType::AnalogInput),
        wire_pin_type::IMU_INPUT => Some(PinType::ImuInput),
        _ => None,
    }
}

fn sending_mode_to_wire(mode: SendingMode) -> u8 {
    match mode {
        SendingMode::OnValueChanged => 0,
        SendingMode::Continuous => 1,
        SendingMode::OnPress => 2,
        SendingMode::OnRelease => 3,
    }
}

fn sending_mode_from_wire(code: u8) -> Option<SendingMode> {
    match code {
        0 => Some(SendingMode::OnValueChanged),
        1 => Some(SendingMode::Continuous),
        2 => Some(SendingMode::OnPress),
        3 => Some(SendingMode::OnRelease),
        _ => None,
    }
}

/// Encode an internal command as a wire packet. Returns `None` for commands
/// with no wire representation (host-side mapping configuration).
pub fn encode_command(command: &Command) -> Option<DataPacket> {
    let timestamp = command.timestamp as u32;
    let pin_idx = command.index.max(0) as u16;

    let configure =
        |selector: u8, config: PinConfigPayload| -> DataPacket {
            let mut packet = DataPacket::new(cmd::CONFIGURE_PIN, selector, timestamp);
            config.write(&mut packet.payload);
            packet
        };
    let base = PinConfigPayload {
        pin_idx,
        ..Default::default()
    };

    match command.op {
        CommandOp::SetPinType(pin_type) => Some(configure(
            pin_config::PIN_TYPE,
            PinConfigPayload {
                pin_type: pin_type_to_wire(pin_type),
                ..base
            },
        )),
        CommandOp::SetSendingMode(mode) => Some(configure(
            pin_config::SENDING_MODE,
            PinConfigPayload {
                sending_mode: sending_mode_to_wire(mode),
                ..base
            },
        )),
        CommandOp::SetSendingDeltaTicks(ticks) => Some(configure(
            pin_config::DELTA_TICKS,
            PinConfigPayload {
                delta_ticks: ticks,
                ..base
            },
        )),
        CommandOp::SetAdcBitResolution(bits) => Some(configure(
            pin_config::ADC_BITS,
            PinConfigPayload {
                adc_bits: bits,
                ..base
            },
        )),
        CommandOp::SetLowpassFilterOrder(order) => Some(configure(
            pin_config::FILTER_ORDER,
            PinConfigPayload {
                filter_order: order,
                ..base
            },
        )),
        CommandOp::SetLowpassCutoff(cutoff) => Some(configure(
            pin_config::LOWPASS_CUTOFF,
            PinConfigPayload {
                lowpass_cutoff: cutoff,
                ..base
            },
        )),
        CommandOp::SetSliderThreshold(threshold) => Some(configure(
            pin_config::SLIDER_THRESHOLD,
            PinConfigPayload {
                slider_threshold: threshold,
                ..base
            },
        )),
        CommandOp::SetSamplingRate(rate) => {
            let mut packet = DataPacket::new(cmd::SET_SAMPLING_RATE, 0, timestamp);
            let divisor = if rate > 0.0 {
                (MAX_SAMPLING_RATE_HZ / rate).round().clamp(1.0, 255.0) as u8
            } else {
                1
            };
            packet.payload[0] = divisor;
            Some(packet)
        }
        CommandOp::SendDigitalPinValue(value) => {
            let mut packet = DataPacket::new(cmd::SET_DIGITAL_PIN, 0, timestamp);
            packet.payload[0..2].copy_from_slice(&pin_idx.to_le_bytes());
            packet.payload[2] = value as u8;
            Some(packet)
        }
        CommandOp::EnableSending(enabled) => {
            let mut packet = DataPacket::new(cmd::ENABLE_SENDING_PACKETS, 0, timestamp);
            packet.payload[0] = enabled as u8;
            Some(packet)
        }
        // Host-side configuration and internal state never hit the wire
        CommandOp::SetInvertEnabled(_)
        | CommandOp::SetInputScaleRange { .. }
        | CommandOp::SetOutputRange { .. }
        | CommandOp::SetMuteStatus(_)
        | CommandOp::VerifyAcks(_)
        | CommandOp::ReloadConfig => None,
    }
}

/// Decode a command packet back into its internal form. Mirrors
/// [`encode_command`]; the timestamp is not recovered.
pub fn decode_command(packet: &DataPacket) -> Option<Command> {
    match packet.cmd {
        cmd::CONFIGURE_PIN => {
            let config = PinConfigPayload::parse(&packet.payload);
            let index = config.pin_idx as i32;
            let op = match packet.sub_cmd {
                pin_config::PIN_TYPE => {
                    CommandOp::SetPinType(pin_type_from_wire(config.pin_type)?)
                }
                pin_config::SENDING_MODE => {
                    CommandOp::SetSendingMode(sending_mode_from_wire(config.sending_mode)?)
                }
                pin_config::DELTA_TICKS => CommandOp::SetSendingDeltaTicks(config.delta_ticks),
                pin_config::ADC_BITS => CommandOp::SetAdcBitResolution(config.adc_bits),
                pin_config::FILTER_ORDER => CommandOp::SetLowpassFilterOrder(config.filter_order),
                pin_config::LOWPASS_CUTOFF => CommandOp::SetLowpassCutoff(config.lowpass_cutoff),
                pin_config::SLIDER_THRESHOLD => {
                    CommandOp::SetSliderThreshold(config.slider_threshold)
                }
                _ => return None,
            };
            Some(Command::new(index, op))
        }
        cmd::SET_SAMPLING_RATE => {
            let divisor = packet.payload[0].max(1);
            Some(Command::global(CommandOp::SetSamplingRate(
                MAX_SAMPLING_RATE_HZ / divisor as f32,
            )))
        }
        cmd::SET_DIGITAL_PIN => {
            let pin = u16::from_le_bytes([packet.payload[0], packet.payload[1]]);
            Some(Command::new(
                pin as i32,
                CommandOp::SendDigitalPinValue(packet.payload[2] != 0),
            ))
        }
        cmd::ENABLE_SENDING_PACKETS => Some(Command::global(CommandOp::EnableSending(
            packet.payload[0] != 0,
        ))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Captured controller packet (cmd 0xFF, crc 0x04C3)
    const TEST_MSG: [u8; PACKET_LENGTH] = [
        0x1, 0x2, 0x3, 0xff, 0x0, 0x0, 0x0, 0x0, //
        0x0, 0x8c, 0x3, 0x0, 0x0, 0x64, 0x1, 0x0, //
        0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, //
        0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, //
        0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, //
        0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, //
        0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0xe8, //
        0xe2, 0xf6, 0x10, 0xc3, 0x4, 0x4, 0x5, 0x6,
    ];

    #[test]
    fn captured_packet_verifies() {
        assert_eq!(verify_message(&TEST_MSG), Ok(()));
    }

    #[test]
    fn corrupted_header_and_crc_are_rejected() {
        let mut bad_start = TEST_MSG;
        bad_start[0] = 0x7;
        assert_eq!(
            verify_message(&bad_start),
            Err(ErrorKind::StartHeaderNotPresent)
        );

        let mut bad_stop = TEST_MSG;
        bad_stop[63] = 0x7;
        assert_eq!(
            verify_message(&bad_stop),
            Err(ErrorKind::StopHeaderNotPresent)
        );

        let mut bad_crc = TEST_MSG;
        bad_crc[10] ^= 0x01;
        assert_eq!(verify_message(&bad_crc), Err(ErrorKind::CrcNotCorrect));
    }

    #[test]
    fn crc_is_pure_over_scanned_fields() {
        let packet = DataPacket::from_bytes(&TEST_MSG);
        assert_eq!(calculate_crc(&packet), calculate_crc(&packet));
        assert_eq!(calculate_crc(&packet), 0x04C3);
    }

    #[test]
    fn serialized_packets_verify() {
        let mut packet = DataPacket::new(cmd::VALUE, 0, 1234);
        ValuePayload {
            pin_id: 12,
            value: 35,
            pin_type: wire_pin_type::ANALOG_INPUT,
        }
        .write(&mut packet.payload);
        let raw = packet.to_bytes();
        assert_eq!(verify_message(&raw), Ok(()));
        assert_eq!(DataPacket::from_bytes(&raw), packet);
    }

    #[test]
    fn uuid_packs_timestamp_cmd_and_sub_cmd() {
        let packet = DataPacket::new(0x64, 0x03, 0x1000);
        assert_eq!(packet.uuid(), 0x1000 | (0x64u64 << 32) | (0x03u64 << 48));
    }

    #[test]
    fn ack_uuid_matches_sent_packet_uuid() {
        let sent = DataPacket::new(cmd::CONFIGURE_PIN, pin_config::DELTA_TICKS, 777);
        let mut ack = AckPayload {
            status: status::OK,
            acked_cmd: sent.cmd,
            acked_sub_cmd: sent.sub_cmd,
            acked_timestamp: sent.timestamp,
        };
        let mut buffer = [0u8; PAYLOAD_LENGTH];
        ack.write(&mut buffer);
        ack = AckPayload::parse(&buffer);
        assert_eq!(ack.uuid(), sent.uuid());
    }

    #[test]
    fn quat_to_euler_identity_is_zero() {
        let angles = quat_to_euler(1.0, 0.0, 0.0, 0.0);
        assert_eq!(angles.yaw, 0.0);
        assert_eq!(angles.pitch, 0.0);
        assert_eq!(angles.roll, 0.0);
    }

    #[test]
    fn quat_to_euler_handles_singularity() {
        use std::f32::consts::FRAC_PI_2;
        // qw*qx + qy*qz = 0.5 > limit
        let angles = quat_to_euler(
            std::f32::consts::FRAC_1_SQRT_2,
            std::f32::consts::FRAC_1_SQRT_2,
            0.0,
            0.0,
        );
        assert_eq!(angles.pitch, FRAC_PI_2);
        assert_eq!(angles.roll, 0.0);

        let angles = quat_to_euler(
            std::f32::consts::FRAC_1_SQRT_2,
            -std::f32::consts::FRAC_1_SQRT_2,
            0.0,
            0.0,
        );
        assert_eq!(angles.pitch, -FRAC_PI_2);
    }

    #[test]
    fn concatenator_passes_single_part_through() {
        let mut concat = MessageConcatenator::new();
        let mut packet = DataPacket::new(cmd::VALUE, 0, 1);
        packet.payload[0] = 0xAB;
        let payload = concat.add(&packet).expect("single part payload");
        assert_eq!(payload.len(), PAYLOAD_LENGTH);
        assert_eq!(payload[0], 0xAB);
    }

    #[test]
    fn concatenator_joins_two_halves() {
        let mut concat = MessageConcatenator::new();
        let mut first = DataPacket::new(cmd::VALUE, 0, 1);
        first.continuation = 1;
        first.payload[0] = 0x11;
        assert!(concat.add(&first).is_none());

        let mut second = DataPacket::new(cmd::VALUE, 0, 2);
        second.payload[0] = 0x22;
        let joined = concat.add(&second).expect("joined payload").to_vec();
        assert_eq!(joined.len(), PAYLOAD_LENGTH * 2);
        assert_eq!(joined[0], 0x11);
        assert_eq!(joined[PAYLOAD_LENGTH], 0x22);
    }

    #[test]
    fn delta_ticks_encodes_as_configure_pin() {
        let command = Command::new(3, CommandOp::SetSendingDeltaTicks(100));
        let packet = encode_command(&command).unwrap();
        assert_eq!(packet.cmd, cmd::CONFIGURE_PIN);
        let config = PinConfigPayload::parse(&packet.payload);
        assert_eq!(config.pin_idx, 3);
        assert_eq!(config.delta_ticks, 100);
    }

    #[test]
    fn lowpass_cutoff_encodes_as_configure_pin() {
        let command = Command::new(4, CommandOp::SetLowpassCutoff(1234.0));
        let packet = encode_command(&command).unwrap();
        assert_eq!(packet.cmd, cmd::CONFIGURE_PIN);
        let config = PinConfigPayload::parse(&packet.payload);
        assert_eq!(config.lowpass_cutoff, 1234.0);
    }

    #[test]
    fn wire_commands_round_trip() {
        let commands = [
            Command::new(2, CommandOp::SetPinType(PinType::AnalogInput)),
            Command::new(2, CommandOp::SetSendingMode(SendingMode::Continuous)),
            Command::new(2, CommandOp::SetSendingDeltaTicks(10)),
            Command::new(2, CommandOp::SetAdcBitResolution(12)),
            Command::new(2, CommandOp::SetLowpassFilterOrder(2)),
            Command::new(2, CommandOp::SetLowpassCutoff(125.0)),
            Command::new(2, CommandOp::SetSliderThreshold(9)),
            Command::global(CommandOp::SetSamplingRate(500.0)),
            Command::new(5, CommandOp::SendDigitalPinValue(true)),
            Command::global(CommandOp::EnableSending(true)),
        ];
        for command in commands {
            let packet = encode_command(&command).expect("encodable command");
            let decoded = decode_command(&packet).expect("decodable packet");
            assert_eq!(decoded.index, command.index);
            assert_eq!(decoded.op, command.op);
        }
    }

    #[test]
    fn host_side_commands_have_no_wire_form() {
        assert!(encode_command(&Command::new(1, CommandOp::SetInvertEnabled(true))).is_none());
        assert!(encode_command(&Command::global(CommandOp::ReloadConfig)).is_none());
    }
}
