//! Per-pin mapper for digital inputs

use crate::message::{Command, CommandErrorCode, CommandOp, PinType, SendingMode};
use crate::message::{Value, ValueBody};
use crate::output_backend::OutputBackend;

/// Maps raw digital readings to on/off outputs with edge gating.
#[derive(Debug)]
pub struct DigitalMapper {
    index: u16,
    sending_mode: SendingMode,
    invert: bool,
    last_value: Option<bool>,
}

impl DigitalMapper {
    pub fn new(index: u16) -> Self {
        Self {
            index,
            sending_mode: SendingMode::OnValueChanged,
            invert: false,
            last_value: None,
        }
    }

    pub fn apply_command(&mut self, cmd: &Command) -> CommandErrorCode {
        match cmd.op {
            CommandOp::SetSendingMode(mode) => {
                self.sending_mode = mode;
                CommandErrorCode::Ok
            }
            CommandOp::SetInvertEnabled(enabled) => {
                self.invert = enabled;
                CommandErrorCode::Ok
            }
            _ => CommandErrorCode::InvalidCommandForPinType,
        }
    }

    pub fn process(&mut self, value: &Value, backend: &mut dyn OutputBackend) {
        let ValueBody::Digital(raw) = value.body else {
            log::warn!("Digital pin {} got a non-digital value", self.index);
            return;
        };
        let state = raw ^ self.invert;

        let emit = match self.sending_mode {
            SendingMode::Continuous => true,
            SendingMode::OnValueChanged => self.last_value != Some(state),
            SendingMode::OnPress => state && self.last_value != Some(true),
            SendingMode::OnRelease => !state && self.last_value != Some(false),
        };
        self.last_value = Some(state);

        if emit {
            backend.send_digital(self.index, state, value.timestamp);
        }
    }

    pub fn put_config_commands_into(&self, out: &mut Vec<Command>) {
        let index = self.index as i32;
        out.push(Command::new(
            index,
            CommandOp::SetPinType(PinType::DigitalInput),
        ));
        out.push(Command::new(
            index,
            CommandOp::SetSendingMode(self.sending_mode),
        ));
        out.push(Command::new(index, CommandOp::SetInvertEnabled(self.invert)));
    }
}
