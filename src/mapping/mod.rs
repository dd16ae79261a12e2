//! Mapping layer: raw controller readings to normalized output values.
//!
//! Holds one optional mapper per logical pin. Mappers form a closed set
//! (digital, analog, IMU) and are replaced wholesale when a pin's type
//! changes; a mapper's type never mutates in place. Only the dispatcher
//! thread touches this module.

mod analog;
mod digital;
mod filter;
mod imu;

pub use analog::AnalogMapper;
pub use digital::DigitalMapper;
pub use imu::ImuMapper;

use crate::message::{Command, CommandErrorCode, CommandOp, PinType, Value};
use crate::output_backend::OutputBackend;

/// Per-pin transformation state, one variant per pin type.
#[derive(Debug)]
pub enum Mapper {
    Digital(DigitalMapper),
    Analog(AnalogMapper),
    Imu(ImuMapper),
}

impl Mapper {
    fn apply_command(&mut self, cmd: &Command) -> CommandErrorCode {
        match self {
            Mapper::Digital(m) => m.apply_command(cmd),
            Mapper::Analog(m) => m.apply_command(cmd),
            Mapper::Imu(m) => m.apply_command(cmd),
        }
    }

    fn process(&mut self, value: &Value, backend: &mut dyn OutputBackend) {
        match self {
            Mapper::Digital(m) => m.process(value, backend),
            Mapper::Analog(m) => m.process(value, backend),
            Mapper::Imu(m) => m.process(value, backend),
        }
    }

    fn put_config_commands_into(&self, out: &mut Vec<Command>) {
        match self {
            Mapper::Digital(m) => m.put_config_commands_into(out),
            Mapper::Analog(m) => m.put_config_commands_into(out),
            Mapper::Imu(m) => m.put_config_commands_into(out),
        }
    }
}

/// Dense array of per-pin mappers plus the shared sampling rate.
pub struct MappingProcessor {
    mappers: Vec<Option<Mapper>>,
    sampling_rate_hz: f32,
}

impl MappingProcessor {
    pub fn new(max_n_pins: usize) -> Self {
        let mut mappers = Vec::with_capacity(max_n_pins);
        mappers.resize_with(max_n_pins, || None);
        Self {
            mappers,
            sampling_rate_hz: 1000.0,
        }
    }

    /// Update the global sampling rate; analog filters re-derive their
    /// coefficients from it.
    pub fn set_sampling_rate(&mut self, rate_hz: f32) {
        if rate_hz <= 0.0 {
            log::warn!("Ignoring non-positive sampling rate {}", rate_hz);
            return;
        }
        self.sampling_rate_hz = rate_hz;
        for mapper in self.mappers.iter_mut().flatten() {
            if let Mapper::Analog(m) = mapper {
                m.set_sampling_rate(rate_hz);
            }
        }
    }

    /// Apply a per-pin configuration command.
    ///
    /// `SetPinType` constructs (or replaces) the mapper at the slot; every
    /// other command is delegated to an existing mapper.
    pub fn apply_command(&mut self, cmd: &Command) -> CommandErrorCode {
        let index = cmd.index;
        if index < 0 || index as usize >= self.mappers.len() {
            return CommandErrorCode::InvalidPinIndex;
        }
        let slot = index as usize;

        if let CommandOp::SetPinType(pin_type) = cmd.op {
            match pin_type {
                PinType::DigitalInput => {
                    self.mappers[slot] = Some(Mapper::Digital(DigitalMapper::new(index as u16)));
                }
                PinType::AnalogInput => {
                    self.mappers[slot] = Some(Mapper::Analog(AnalogMapper::new(
                        index as u16,
                        self.sampling_rate_hz,
                    )));
                }
                PinType::ImuInput => {
                    self.mappers[slot] = Some(Mapper::Imu(ImuMapper::new(index as u16)));
                }
                PinType::Disabled => return CommandErrorCode::InvalidValue,
            }
            return CommandErrorCode::Ok;
        }

        match &mut self.mappers[slot] {
            Some(mapper) => mapper.apply_command(cmd),
            None => CommandErrorCode::UninitializedPin,
        }
    }

    /// Route a decoded value to its mapper, which transforms it and emits
    /// through the backend (or drops it per its send-mode gating).
    pub fn process(&mut self, value: &Value, backend: &mut dyn OutputBackend) {
        let slot = value.index as usize;
        match self.mappers.get_mut(slot) {
            Some(Some(mapper)) => mapper.process(value, backend),
            _ => {
                log::warn!("Got value for uninitialized pin {}", value.index);
            }
        }
    }

    /// Emit, for every initialized mapper, the commands that reproduce its
    /// configuration. Used for config save and reload verification.
    pub fn put_config_commands_into(&self, out: &mut Vec<Command>) {
        for mapper in self.mappers.iter().flatten() {
            mapper.put_config_commands_into(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SendingMode;

    #[derive(Debug, PartialEq)]
    enum Sent {
        Digital(u16, bool),
        Analog(u16, f32),
        Continuous(u16, f32),
    }

    #[derive(Default)]
    struct CaptureBackend {
        sent: Vec<Sent>,
    }

    impl OutputBackend for CaptureBackend {
        fn send_digital(&mut self, index: u16, value: bool, _timestamp: u64) {
            self.sent.push(Sent::Digital(index, value));
        }
        fn send_analog(&mut self, index: u16, value: f32, _timestamp: u64) {
            self.sent.push(Sent::Analog(index, value));
        }
        fn send_continuous(&mut self, index: u16, value: f32, _timestamp: u64) {
            self.sent.push(Sent::Continuous(index, value));
        }
    }

    fn cmd(index: i32, op: CommandOp) -> Command {
        Command::new(index, op)
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut processor = MappingProcessor::new(8);
        for index in [-1, 8, 9] {
            assert_eq!(
                processor.apply_command(&cmd(index, CommandOp::SetPinType(PinType::AnalogInput))),
                CommandErrorCode::InvalidPinIndex
            );
        }
    }

    #[test]
    fn disabled_pin_type_is_invalid_value() {
        let mut processor = MappingProcessor::new(8);
        assert_eq!(
            processor.apply_command(&cmd(1, CommandOp::SetPinType(PinType::Disabled))),
            CommandErrorCode::InvalidValue
        );
    }

    #[test]
    fn command_on_uninitialized_pin_is_rejected() {
        let mut processor = MappingProcessor::new(8);
        assert_eq!(
            processor.apply_command(&cmd(2, CommandOp::SetInvertEnabled(true))),
            CommandErrorCode::UninitializedPin
        );
    }

    #[test]
    fn pin_type_change_replaces_the_mapper() {
        let mut processor = MappingProcessor::new(8);
        processor.apply_command(&cmd(0, CommandOp::SetPinType(PinType::AnalogInput)));
        // Slider threshold is analog-only
        assert_eq!(
            processor.apply_command(&cmd(0, CommandOp::SetSliderThreshold(4))),
            CommandErrorCode::Ok
        );
        processor.apply_command(&cmd(0, CommandOp::SetPinType(PinType::DigitalInput)));
        assert_eq!(
            processor.apply_command(&cmd(0, CommandOp::SetSliderThreshold(4))),
            CommandErrorCode::InvalidCommandForPinType
        );
    }

    #[test]
    fn digital_on_value_changed_emits_edges_only() {
        let mut processor = MappingProcessor::new(4);
        let mut backend = CaptureBackend::default();
        processor.apply_command(&cmd(1, CommandOp::SetPinType(PinType::DigitalInput)));

        processor.process(&Value::digital(1, true, 1), &mut backend);
        processor.process(&Value::digital(1, true, 2), &mut backend);
        processor.process(&Value::digital(1, false, 3), &mut backend);

        assert_eq!(
            backend.sent,
            vec![Sent::Digital(1, true), Sent::Digital(1, false)]
        );
    }

    #[test]
    fn digital_on_press_ignores_releases() {
        let mut processor = MappingProcessor::new(4);
        let mut backend = CaptureBackend::default();
        processor.apply_command(&cmd(1, CommandOp::SetPinType(PinType::DigitalInput)));
        processor.apply_command(&cmd(1, CommandOp::SetSendingMode(SendingMode::OnPress)));

        processor.process(&Value::digital(1, true, 1), &mut backend);
        processor.process(&Value::digital(1, false, 2), &mut backend);
        processor.process(&Value::digital(1, true, 3), &mut backend);

        assert_eq!(
            backend.sent,
            vec![Sent::Digital(1, true), Sent::Digital(1, true)]
        );
    }

    #[test]
    fn digital_invert_flips_output() {
        let mut processor = MappingProcessor::new(4);
        let mut backend = CaptureBackend::default();
        processor.apply_command(&cmd(1, CommandOp::SetPinType(PinType::DigitalInput)));
        processor.apply_command(&cmd(1, CommandOp::SetInvertEnabled(true)));

        processor.process(&Value::digital(1, true, 1), &mut backend);
        assert_eq!(backend.sent, vec![Sent::Digital(1, false)]);
    }

    #[test]
    fn analog_maps_into_output_range() {
        let mut processor = MappingProcessor::new(4);
        let mut backend = CaptureBackend::default();
        processor.apply_command(&cmd(2, CommandOp::SetPinType(PinType::AnalogInput)));
        processor.apply_command(&cmd(2, CommandOp::SetAdcBitResolution(10)));
        processor.apply_command(&cmd(
            2,
            CommandOp::SetOutputRange {
                low: 0.0,
                high: 10.0,
            },
        ));

        processor.process(&Value::analog(2, 1023, 1), &mut backend);
        let Sent::Analog(index, output) = backend.sent[0] else {
            panic!("expected analog output");
        };
        assert_eq!(index, 2);
        assert!((output - 10.0).abs() < 1e-5);
    }

    #[test]
    fn analog_clamps_to_adc_range() {
        let mut processor = MappingProcessor::new(4);
        let mut backend = CaptureBackend::default();
        processor.apply_command(&cmd(2, CommandOp::SetPinType(PinType::AnalogInput)));
        processor.apply_command(&cmd(2, CommandOp::SetAdcBitResolution(8)));

        // 4000 is far above the 8-bit maximum of 255
        processor.process(&Value::analog(2, 4000, 1), &mut backend);
        let Sent::Analog(_, output) = backend.sent[0] else {
            panic!("expected analog output");
        };
        assert!((output - 1.0).abs() < 1e-5);
    }

    #[test]
    fn analog_slider_threshold_gates_small_changes() {
        let mut processor = MappingProcessor::new(4);
        let mut backend = CaptureBackend::default();
        processor.apply_command(&cmd(2, CommandOp::SetPinType(PinType::AnalogInput)));
        processor.apply_command(&cmd(2, CommandOp::SetSliderThreshold(10)));

        processor.process(&Value::analog(2, 100, 1), &mut backend);
        processor.process(&Value::analog(2, 104, 2), &mut backend); // within band
        processor.process(&Value::analog(2, 115, 3), &mut backend); // outside
        assert_eq!(backend.sent.len(), 2);
    }

    #[test]
    fn analog_invert_mirrors_normalized_value() {
        let mut processor = MappingProcessor::new(4);
        let mut backend = CaptureBackend::default();
        processor.apply_command(&cmd(2, CommandOp::SetPinType(PinType::AnalogInput)));
        processor.apply_command(&cmd(2, CommandOp::SetAdcBitResolution(8)));
        processor.apply_command(&cmd(2, CommandOp::SetInvertEnabled(true)));

        processor.process(&Value::analog(2, 0, 1), &mut backend);
        let Sent::Analog(_, output) = backend.sent[0] else {
            panic!("expected analog output");
        };
        assert!((output - 1.0).abs() < 1e-5);
    }

    #[test]
    fn analog_continuous_respects_delta_ticks() {
        let mut processor = MappingProcessor::new(4);
        let mut backend = CaptureBackend::default();
        processor.apply_command(&cmd(2, CommandOp::SetPinType(PinType::AnalogInput)));
        processor.apply_command(&cmd(
            2,
            CommandOp::SetSendingMode(SendingMode::Continuous),
        ));
        processor.apply_command(&cmd(2, CommandOp::SetSendingDeltaTicks(3)));

        for ts in 0..9 {
            processor.process(&Value::analog(2, 100, ts), &mut backend);
        }
        assert_eq!(backend.sent.len(), 3);
    }

    #[test]
    fn imu_passes_value_through() {
        let mut processor = MappingProcessor::new(4);
        let mut backend = CaptureBackend::default();
        processor.apply_command(&cmd(3, CommandOp::SetPinType(PinType::ImuInput)));

        processor.process(&Value::continuous(3, 1.25, 1), &mut backend);
        assert_eq!(backend.sent, vec![Sent::Continuous(3, 1.25)]);
    }

    #[test]
    fn config_commands_reproduce_equal_mapper_set() {
        let mut processor = MappingProcessor::new(8);
        processor.apply_command(&cmd(0, CommandOp::SetPinType(PinType::DigitalInput)));
        processor.apply_command(&cmd(0, CommandOp::SetInvertEnabled(true)));
        processor.apply_command(&cmd(2, CommandOp::SetPinType(PinType::AnalogInput)));
        processor.apply_command(&cmd(2, CommandOp::SetAdcBitResolution(10)));
        processor.apply_command(&cmd(2, CommandOp::SetLowpassFilterOrder(2)));
        processor.apply_command(&cmd(2, CommandOp::SetLowpassCutoff(50.0)));
        processor.apply_command(&cmd(5, CommandOp::SetPinType(PinType::ImuInput)));

        let mut commands = Vec::new();
        processor.put_config_commands_into(&mut commands);

        let mut rebuilt = MappingProcessor::new(8);
        for command in &commands {
            assert_eq!(
                rebuilt.apply_command(command),
                CommandErrorCode::Ok,
                "failed to re-apply {:?}",
                command
            );
        }

        let mut rebuilt_commands = Vec::new();
        rebuilt.put_config_commands_into(&mut rebuilt_commands);

        let ops = |cmds: &[Command]| cmds.iter().map(|c| (c.index, c.op)).collect::<Vec<_>>();
        assert_eq!(ops(&commands), ops(&rebuilt_commands));
    }
}
