//! Per-pin mapper for analog inputs
//!
//! Processing pipeline for each raw reading:
//! clamp to the ADC range -> lowpass -> slider-threshold gating ->
//! linear map from the input scale range to the output range -> invert ->
//! send-mode / delta-ticks gating -> backend.

use super::filter::Lowpass;
use crate::message::{Command, CommandErrorCode, CommandOp, PinType, SendingMode};
use crate::message::{Value, ValueBody};
use crate::output_backend::OutputBackend;

const MAX_ADC_BITS: u8 = 16;
const MAX_FILTER_ORDER: u8 = 2;

#[derive(Debug)]
pub struct AnalogMapper {
    index: u16,
    sending_mode: SendingMode,
    delta_ticks: u32,
    tick_counter: u32,
    adc_bits: u8,
    filter: Lowpass,
    lowpass_order: u8,
    lowpass_cutoff_hz: f32,
    sampling_rate_hz: f32,
    slider_threshold: u16,
    invert: bool,
    input_low: f32,
    input_high: f32,
    /// Tracks whether the input range was set explicitly; if not it follows
    /// the ADC resolution.
    input_range_explicit: bool,
    output_low: f32,
    output_high: f32,
    last_gated_raw: Option<f32>,
    last_sent: Option<f32>,
}

impl AnalogMapper {
    pub fn new(index: u16, sampling_rate_hz: f32) -> Self {
        let adc_bits = 12;
        Self {
            index,
            sending_mode: SendingMode::OnValueChanged,
            delta_ticks: 1,
            tick_counter: 0,
            adc_bits,
            filter: Lowpass::bypass(),
            lowpass_order: 0,
            lowpass_cutoff_hz: 0.0,
            sampling_rate_hz,
            slider_threshold: 0,
            invert: false,
            input_low: 0.0,
            input_high: adc_max(adc_bits),
            input_range_explicit: false,
            output_low: 0.0,
            output_high: 1.0,
            last_gated_raw: None,
            last_sent: None,
        }
    }

    /// Re-derive the filter coefficients after a sampling-rate change
    pub fn set_sampling_rate(&mut self, rate_hz: f32) {
        self.sampling_rate_hz = rate_hz;
        self.reconfigure_filter();
    }

    fn reconfigure_filter(&mut self) {
        self.filter
            .configure(self.lowpass_order, self.lowpass_cutoff_hz, self.sampling_rate_hz);
    }

    pub fn apply_command(&mut self, cmd: &Command) -> CommandErrorCode {
        match cmd.op {
            CommandOp::SetSendingMode(mode) => match mode {
                SendingMode::OnValueChanged | SendingMode::Continuous => {
                    self.sending_mode = mode;
                    CommandErrorCode::Ok
                }
                // Edge modes only make sense for digital pins
                SendingMode::OnPress | SendingMode::OnRelease => CommandErrorCode::InvalidValue,
            },
            CommandOp::SetSendingDeltaTicks(ticks) => {
                if ticks == 0 {
                    return CommandErrorCode::InvalidValue;
                }
                self.delta_ticks = ticks;
                self.tick_counter = 0;
                CommandErrorCode::Ok
            }
            CommandOp::SetAdcBitResolution(bits) => {
                if bits == 0 || bits > MAX_ADC_BITS {
                    return CommandErrorCode::InvalidValue;
                }
                self.adc_bits = bits;
                if !self.input_range_explicit {
                    self.input_low = 0.0;
                    self.input_high = adc_max(bits);
                }
                CommandErrorCode::Ok
            }
            CommandOp::SetLowpassFilterOrder(order) => {
                if order == 0 || order > MAX_FILTER_ORDER {
                    return CommandErrorCode::InvalidValue;
                }
                self.lowpass_order = order;
                self.reconfigure_filter();
                CommandErrorCode::Ok
            }
            CommandOp::SetLowpassCutoff(cutoff) => {
                if cutoff <= 0.0 {
                    return CommandErrorCode::InvalidValue;
                }
                self.lowpass_cutoff_hz = cutoff;
                // Cutoff alone enables a first-order section
                if self.lowpass_order == 0 {
                    self.lowpass_order = 1;
                }
                self.reconfigure_filter();
                CommandErrorCode::Ok
            }
            CommandOp::SetSliderThreshold(threshold) => {
                self.slider_threshold = threshold;
                CommandErrorCode::Ok
            }
            CommandOp::SetInvertEnabled(enabled) => {
                self.invert = enabled;
                CommandErrorCode::Ok
            }
            CommandOp::SetInputScaleRange { low, high } => {
                if low >= high {
                    return CommandErrorCode::InvalidValue;
                }
                self.input_low = low;
                self.input_high = high;
                self.input_range_explicit = true;
                CommandErrorCode::Ok
            }
            CommandOp::SetOutputRange { low, high } => {
                if low >= high {
                    return CommandErrorCode::InvalidValue;
                }
                self.output_low = low;
                self.output_high = high;
                CommandErrorCode::Ok
            }
            _ => CommandErrorCode::InvalidCommandForPinType,
        }
    }

    pub fn process(&mut self, value: &Value, backend: &mut dyn OutputBackend) {
        let ValueBody::AnalogRaw(raw) = value.body else {
            log::warn!("Analog pin {} got a non-analog value", self.index);
            return;
        };

        let max_raw = adc_max(self.adc_bits);
        let clamped = (raw as f32).min(max_raw);
        let filtered = self.filter.process(clamped);

        // Slider threshold: suppress change events within the dead band
        if self.sending_mode == SendingMode::OnValueChanged && self.slider_threshold > 0 {
            if let Some(last) = self.last_gated_raw {
                if (filtered - last).abs() < self.slider_threshold as f32 {
                    return;
                }
            }
            self.last_gated_raw = Some(filtered);
        }

        let span = self.input_high - self.input_low;
        let mut normalized = ((filtered - self.input_low) / span).clamp(0.0, 1.0);
        if self.invert {
            normalized = 1.0 - normalized;
        }
        let output = self.output_low + normalized * (self.output_high - self.output_low);

        let emit = match self.sending_mode {
            SendingMode::OnValueChanged => self.last_sent != Some(output),
            SendingMode::Continuous => {
                self.tick_counter += 1;
                if self.tick_counter >= self.delta_ticks {
                    self.tick_counter = 0;
                    true
                } else {
                    false
                }
            }
            // Rejected at apply time; treat as change-driven if ever hit
            SendingMode::OnPress | SendingMode::OnRelease => self.last_sent != Some(output),
        };

        if emit {
            self.last_sent = Some(output);
            backend.send_analog(self.index, output, value.timestamp);
        }
    }

    pub fn put_config_commands_into(&self, out: &mut Vec<Command>) {
        let index = self.index as i32;
        out.push(Command::new(
            index,
            CommandOp::SetPinType(PinType::AnalogInput),
        ));
        out.push(Command::new(
            index,
            CommandOp::SetSendingMode(self.sending_mode),
        ));
        out.push(Command::new(
            index,
            CommandOp::SetSendingDeltaTicks(self.delta_ticks),
        ));
        out.push(Command::new(
            index,
            CommandOp::SetAdcBitResolution(self.adc_bits),
        ));
        if self.lowpass_order > 0 {
            out.push(Command::new(
                index,
                CommandOp::SetLowpassFilterOrder(self.lowpass_order),
            ));
            out.push(Command::new(
                index,
                CommandOp::SetLowpassCutoff(self.lowpass_cutoff_hz),
            ));
        }
        out.push(Command::new(
            index,
            CommandOp::SetSliderThreshold(self.slider_threshold),
        ));
        out.push(Command::new(index, CommandOp::SetInvertEnabled(self.invert)));
        out.push(Command::new(
            index,
            CommandOp::SetInputScaleRange {
                low: self.input_low,
                high: self.input_high,
            },
        ));
        out.push(Command::new(
            index,
            CommandOp::SetOutputRange {
                low: self.output_low,
                high: self.output_high,
            },
        ));
    }
}

fn adc_max(bits: u8) -> f32 {
    ((1u32 << bits) - 1) as f32
}
