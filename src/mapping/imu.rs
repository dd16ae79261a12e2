//! Per-pin mapper for IMU axes
//!
//! IMU values arrive as already-continuous readings (radians, derived from
//! the quaternion by the frontend). No filtering happens at this layer; the
//! mapper only applies the optional input/output range map.

use crate::message::{Command, CommandErrorCode, CommandOp, PinType, SendingMode};
use crate::message::{Value, ValueBody};
use crate::output_backend::OutputBackend;

#[derive(Debug)]
pub struct ImuMapper {
    index: u16,
    sending_mode: SendingMode,
    input_range: Option<(f32, f32)>,
    output_range: Option<(f32, f32)>,
    last_sent: Option<f32>,
}

impl ImuMapper {
    pub fn new(index: u16) -> Self {
        Self {
            index,
            sending_mode: SendingMode::Continuous,
            input_range: None,
            output_range: None,
            last_sent: None,
        }
    }

    pub fn apply_command(&mut self, cmd: &Command) -> CommandErrorCode {
        match cmd.op {
            CommandOp::SetSendingMode(mode) => match mode {
                SendingMode::OnValueChanged | SendingMode::Continuous => {
                    self.sending_mode = mode;
                    CommandErrorCode::Ok
                }
                SendingMode::OnPress | SendingMode::OnRelease => CommandErrorCode::InvalidValue,
            },
            CommandOp::SetInputScaleRange { low, high } => {
                if low >= high {
                    return CommandErrorCode::InvalidValue;
                }
                self.input_range = Some((low, high));
                CommandErrorCode::Ok
            }
            CommandOp::SetOutputRange { low, high } => {
                if low >= high {
                    return CommandErrorCode::InvalidValue;
                }
                self.output_range = Some((low, high));
                CommandErrorCode::Ok
            }
            _ => CommandErrorCode::InvalidCommandForPinType,
        }
    }

    pub fn process(&mut self, value: &Value, backend: &mut dyn OutputBackend) {
        let ValueBody::Continuous(raw) = value.body else {
            log::warn!("IMU pin {} got a non-continuous value", self.index);
            return;
        };

        let output = match (self.input_range, self.output_range) {
            (Some((in_low, in_high)), Some((out_low, out_high))) => {
                let normalized = ((raw - in_low) / (in_high - in_low)).clamp(0.0, 1.0);
                out_low + normalized * (out_high - out_low)
            }
            _ => raw,
        };

        if self.sending_mode == SendingMode::OnValueChanged && self.last_sent == Some(output) {
            return;
        }
        self.last_sent = Some(output);
        backend.send_continuous(self.index, output, value.timestamp);
    }

    pub fn put_config_commands_into(&self, out: &mut Vec<Command>) {
        let index = self.index as i32;
        out.push(Command::new(index, CommandOp::SetPinType(PinType::ImuInput)));
        out.push(Command::new(
            index,
            CommandOp::SetSendingMode(self.sending_mode),
        ));
        if let Some((low, high)) = self.input_range {
            out.push(Command::new(
                index,
                CommandOp::SetInputScaleRange { low, high },
            ));
        }
        if let Some((low, high)) = self.output_range {
            out.push(Command::new(index, CommandOp::SetOutputRange { low, high }));
        }
    }
}
