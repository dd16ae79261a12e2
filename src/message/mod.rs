//! Internal message types carried on the event queues.
//!
//! Every item exchanged between the hardware frontends, the event handler
//! and the user frontend is a [`Message`]: a value decoded from a wire
//! packet, a configuration command, or an error report. Ownership is
//! exclusive and transfers when a message is enqueued.

mod command;

pub use command::{
    Command, CommandErrorCode, CommandOp, CommandTarget, PinType, SendingMode,
};

use crate::queue::QueueItem;

/// Current time in microseconds since the epoch, used as the source-assigned
/// message timestamp when the hardware does not provide one.
#[inline]
pub fn timestamp_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// IMU rotation axes, used as keys in the frontend's axis-to-sensor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImuAxis {
    Yaw,
    Pitch,
    Roll,
}

/// Payload of a decoded sensor reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueBody {
    /// On/off reading from a digital input pin
    Digital(bool),
    /// Raw ADC reading from an analog input pin
    AnalogRaw(u16),
    /// Already-continuous reading (IMU axes, normalized sources)
    Continuous(f32),
}

/// A sensor reading addressed by logical sensor index.
///
/// Created by a hardware frontend when it decodes a value packet; consumed
/// by the mapping processor which emits (or discards) the mapped output.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub index: u16,
    pub body: ValueBody,
    pub timestamp: u64,
}

impl Value {
    pub fn digital(index: u16, value: bool, timestamp: u64) -> Self {
        Self {
            index,
            body: ValueBody::Digital(value),
            timestamp,
        }
    }

    pub fn analog(index: u16, value: u16, timestamp: u64) -> Self {
        Self {
            index,
            body: ValueBody::AnalogRaw(value),
            timestamp,
        }
    }

    pub fn continuous(index: u16, value: f32, timestamp: u64) -> Self {
        Self {
            index,
            body: ValueBody::Continuous(value),
            timestamp,
        }
    }
}

/// Error conditions reported through the event queue.
///
/// These are protocol- and command-level conditions that the system recovers
/// from by dropping the offending item; fatal init errors use
/// [`crate::error::Error`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidPinIndex,
    InvalidValue,
    InvalidCommandForPinType,
    UninitializedPin,
    CrcNotCorrect,
    StartHeaderNotPresent,
    StopHeaderNotPresent,
    CmdNotValid,
    TimeoutOnResponse,
    SerialDevicePortNotOpen,
    ImuNotConnected,
    GenericError,
}

/// An error report produced by any component and consumed by the event
/// handler, which logs it and optionally notifies the user frontend.
#[derive(Debug, Clone)]
pub struct ErrorMessage {
    pub kind: ErrorKind,
    /// Pin the error relates to, if any
    pub index: Option<i32>,
    pub text: String,
    pub timestamp: u64,
}

impl ErrorMessage {
    pub fn new(kind: ErrorKind, index: Option<i32>, text: impl Into<String>) -> Self {
        Self {
            kind,
            index,
            text: text.into(),
            timestamp: timestamp_now(),
        }
    }
}

/// Tagged message envelope carried on the event queue.
#[derive(Debug, Clone)]
pub enum Message {
    Value(Value),
    Command(Command),
    Error(ErrorMessage),
}

impl Message {
    pub fn timestamp(&self) -> u64 {
        match self {
            Message::Value(v) => v.timestamp,
            Message::Command(c) => c.timestamp,
            Message::Error(e) => e.timestamp,
        }
    }
}

impl QueueItem for Message {
    /// Value samples may be shed under queue pressure; commands and errors
    /// are never dropped.
    fn discardable(&self) -> bool {
        matches!(self, Message::Value(_))
    }
}

impl QueueItem for Command {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_messages_are_discardable() {
        let value = Message::Value(Value::analog(3, 512, 1));
        let cmd = Message::Command(Command::global(CommandOp::SetMuteStatus(true)));
        let err = Message::Error(ErrorMessage::new(ErrorKind::GenericError, None, "x"));
        assert!(value.discardable());
        assert!(!cmd.discardable());
        assert!(!err.discardable());
    }

    #[test]
    fn timestamps_are_monotonic_enough() {
        let a = timestamp_now();
        let b = timestamp_now();
        assert!(b >= a);
    }
}
