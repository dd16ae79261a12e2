//! Configuration commands and their routing metadata.

use serde::Deserialize;

use super::timestamp_now;

/// Pin operating mode, set with [`CommandOp::SetPinType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinType {
    DigitalInput,
    AnalogInput,
    ImuInput,
    Disabled,
}

/// When a mapped value is forwarded to the output backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendingMode {
    OnValueChanged,
    Continuous,
    OnPress,
    OnRelease,
}

/// Result of applying a command in the mapping layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandErrorCode {
    Ok,
    InvalidPinIndex,
    InvalidValue,
    InvalidCommandForPinType,
    UninitializedPin,
}

impl CommandErrorCode {
    pub fn is_ok(self) -> bool {
        self == CommandErrorCode::Ok
    }
}

/// The operation a [`Command`] performs. Exhaustive over the control surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandOp {
    SetPinType(PinType),
    SetSendingMode(SendingMode),
    SetSendingDeltaTicks(u32),
    /// Global sampling rate in Hz
    SetSamplingRate(f32),
    SetAdcBitResolution(u8),
    SetLowpassFilterOrder(u8),
    /// Cutoff frequency in Hz
    SetLowpassCutoff(f32),
    SetSliderThreshold(u16),
    SetInvertEnabled(bool),
    SetInputScaleRange { low: f32, high: f32 },
    SetOutputRange { low: f32, high: f32 },
    /// Drive a digital output pin on the controller
    SendDigitalPinValue(bool),
    /// Start/stop the controller's unsolicited value stream
    EnableSending(bool),
    SetMuteStatus(bool),
    VerifyAcks(bool),
    ReloadConfig,
}

/// Which components a command is routed to.
///
/// Derived from the operation; a single command may address more than one
/// component (`SetPinType` configures both the mapper and the controller).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTarget {
    pub mapping: bool,
    pub hw_frontend: bool,
    pub internal: bool,
}

/// A configuration command addressed to a pin (or `index == -1` for global).
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub index: i32,
    pub op: CommandOp,
    pub timestamp: u64,
}

/// Index value for commands that do not address a single pin.
pub const GLOBAL_INDEX: i32 = -1;

impl Command {
    pub fn new(index: i32, op: CommandOp) -> Self {
        Self {
            index,
            op,
            timestamp: timestamp_now(),
        }
    }

    /// A command with no pin association (system-wide)
    pub fn global(op: CommandOp) -> Self {
        Self::new(GLOBAL_INDEX, op)
    }

    pub fn target(&self) -> CommandTarget {
        use CommandOp::*;
        match self.op {
            // Per-pin configuration lives in the mapper and must also be
            // pushed down to the controller so its sampling matches.
            SetPinType(_)
            | SetSendingMode(_)
            | SetSendingDeltaTicks(_)
            | SetAdcBitResolution(_)
            | SetLowpassFilterOrder(_)
            | SetLowpassCutoff(_)
            | SetSliderThreshold(_) => CommandTarget {
                mapping: true,
                hw_frontend: true,
                internal: false,
            },
            // Host-side mapping only; the controller never sees these.
            SetInvertEnabled(_) | SetInputScaleRange { .. } | SetOutputRange { .. } => {
                CommandTarget {
                    mapping: true,
                    hw_frontend: false,
                    internal: false,
                }
            }
            // Controller only.
            SendDigitalPinValue(_) | EnableSending(_) => CommandTarget {
                mapping: false,
                hw_frontend: true,
                internal: false,
            },
            // Global: the controller changes its scan rate and the analog
            // filters re-derive their coefficients from the new rate. The
            // dispatcher applies the mapping side itself because the global
            // index (-1) never passes per-pin validation.
            SetSamplingRate(_) => CommandTarget {
                mapping: false,
                hw_frontend: true,
                internal: true,
            },
            // Event-handler state.
            SetMuteStatus(_) | VerifyAcks(_) | ReloadConfig => CommandTarget {
                mapping: false,
                hw_frontend: false,
                internal: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_pin_type_targets_mapping_and_frontend() {
        let cmd = Command::new(4, CommandOp::SetPinType(PinType::AnalogInput));
        let target = cmd.target();
        assert!(target.mapping);
        assert!(target.hw_frontend);
        assert!(!target.internal);
    }

    #[test]
    fn output_range_is_mapping_only() {
        let cmd = Command::new(
            4,
            CommandOp::SetOutputRange {
                low: 0.0,
                high: 1.0,
            },
        );
        let target = cmd.target();
        assert!(target.mapping);
        assert!(!target.hw_frontend);
    }

    #[test]
    fn mute_is_internal() {
        let cmd = Command::global(CommandOp::SetMuteStatus(true));
        let target = cmd.target();
        assert!(target.internal);
        assert!(!target.mapping);
        assert!(!target.hw_frontend);
    }
}
