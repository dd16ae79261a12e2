//! User-facing control surface.
//!
//! A thin command producer: every method builds a well-formed command and
//! pushes it onto the event queue, validating indices and payloads first.
//! The core does not trust this layer; the mapping processor re-validates
//! everything on application.

use crate::error::{Error, Result};
use crate::message::{
    Command, CommandOp, ErrorMessage, Message, PinType, SendingMode,
};
use crate::queue::SynchronizedQueue;
use std::sync::Arc;

/// Handle for injecting runtime configuration commands.
#[derive(Clone)]
pub struct UserFrontend {
    event_queue: Arc<SynchronizedQueue<Message>>,
    max_input_pins: usize,
    max_digital_out_pins: usize,
}

impl UserFrontend {
    pub fn new(
        event_queue: Arc<SynchronizedQueue<Message>>,
        max_input_pins: usize,
        max_digital_out_pins: usize,
    ) -> Self {
        Self {
            event_queue,
            max_input_pins,
            max_digital_out_pins,
        }
    }

    fn check_pin(&self, pin: usize) -> Result<i32> {
        if pin >= self.max_input_pins {
            return Err(Error::Other(format!(
                "pin index {} out of range (max {})",
                pin,
                self.max_input_pins - 1
            )));
        }
        Ok(pin as i32)
    }

    fn push(&self, index: i32, op: CommandOp) {
        self.event_queue.push(Message::Command(Command::new(index, op)));
    }

    pub fn set_pin_type(&self, pin: usize, pin_type: PinType) -> Result<()> {
        let index = self.check_pin(pin)?;
        self.push(index, CommandOp::SetPinType(pin_type));
        Ok(())
    }

    pub fn set_sending_mode(&self, pin: usize, mode: SendingMode) -> Result<()> {
        let index = self.check_pin(pin)?;
        self.push(index, CommandOp::SetSendingMode(mode));
        Ok(())
    }

    pub fn set_sending_delta_ticks(&self, pin: usize, ticks: u32) -> Result<()> {
        let index = self.check_pin(pin)?;
        if ticks == 0 {
            return Err(Error::Other("delta ticks must be at least 1".to_string()));
        }
        self.push(index, CommandOp::SetSendingDeltaTicks(ticks));
        Ok(())
    }

    pub fn set_sampling_rate(&self, rate_hz: f32) -> Result<()> {
        if rate_hz <= 0.0 {
            return Err(Error::Other("sampling rate must be positive".to_string()));
        }
        self.push(-1, CommandOp::SetSamplingRate(rate_hz));
        Ok(())
    }

    pub fn set_adc_bit_resolution(&self, pin: usize, bits: u8) -> Result<()> {
        let index = self.check_pin(pin)?;
        self.push(index, CommandOp::SetAdcBitResolution(bits));
        Ok(())
    }

    pub fn set_lowpass_filter_order(&self, pin: usize, order: u8) -> Result<()> {
        let index = self.check_pin(pin)?;
        self.push(index, CommandOp::SetLowpassFilterOrder(order));
        Ok(())
    }

    pub fn set_lowpass_cutoff(&self, pin: usize, cutoff_hz: f32) -> Result<()> {
        let index = self.check_pin(pin)?;
        self.push(index, CommandOp::SetLowpassCutoff(cutoff_hz));
        Ok(())
    }

    pub fn set_slider_threshold(&self, pin: usize, threshold: u16) -> Result<()> {
        let index = self.check_pin(pin)?;
        self.push(index, CommandOp::SetSliderThreshold(threshold));
        Ok(())
    }

    pub fn set_invert_enabled(&self, pin: usize, enabled: bool) -> Result<()> {
        let index = self.check_pin(pin)?;
        self.push(index, CommandOp::SetInvertEnabled(enabled));
        Ok(())
    }

    pub fn set_input_scale_range(&self, pin: usize, low: f32, high: f32) -> Result<()> {
        let index = self.check_pin(pin)?;
        if low >= high {
            return Err(Error::Other("range low must be below high".to_string()));
        }
        self.push(index, CommandOp::SetInputScaleRange { low, high });
        Ok(())
    }

    pub fn set_output_range(&self, pin: usize, low: f32, high: f32) -> Result<()> {
        let index = self.check_pin(pin)?;
        if low >= high {
            return Err(Error::Other("range low must be below high".to_string()));
        }
        self.push(index, CommandOp::SetOutputRange { low, high });
        Ok(())
    }

    pub fn send_digital_pin_value(&self, pin: usize, value: bool) -> Result<()> {
        if pin >= self.max_digital_out_pins {
            return Err(Error::Other(format!(
                "digital output pin {} out of range (max {})",
                pin,
                self.max_digital_out_pins - 1
            )));
        }
        self.push(pin as i32, CommandOp::SendDigitalPinValue(value));
        Ok(())
    }

    pub fn enable_sending(&self, enabled: bool) {
        self.push(-1, CommandOp::EnableSending(enabled));
    }

    pub fn set_mute_status(&self, muted: bool) {
        self.push(-1, CommandOp::SetMuteStatus(muted));
    }

    pub fn set_verify_acks(&self, enabled: bool) {
        self.push(-1, CommandOp::VerifyAcks(enabled));
    }

    pub fn reload_config(&self) {
        self.push(-1, CommandOp::ReloadConfig);
    }

    /// Error reports routed back from the dispatcher
    pub fn notify_error(&self, error: &ErrorMessage) {
        log::warn!(
            "Command error {:?} (pin {:?}): {}",
            error.kind,
            error.index,
            error.text
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frontend_fixture() -> (UserFrontend, Arc<SynchronizedQueue<Message>>) {
        let queue = Arc::new(SynchronizedQueue::new());
        (UserFrontend::new(Arc::clone(&queue), 8, 4), queue)
    }

    #[test]
    fn valid_commands_are_enqueued() {
        let (frontend, queue) = frontend_fixture();
        frontend.set_pin_type(3, PinType::AnalogInput).unwrap();
        frontend.set_slider_threshold(3, 5).unwrap();

        let Some(Message::Command(first)) = queue.pop() else {
            panic!("expected a command");
        };
        assert_eq!(first.index, 3);
        assert_eq!(first.op, CommandOp::SetPinType(PinType::AnalogInput));
        assert!(queue.pop().is_some());
        assert!(queue.empty());
    }

    #[test]
    fn out_of_range_pin_is_rejected_before_enqueueing() {
        let (frontend, queue) = frontend_fixture();
        assert!(frontend.set_pin_type(8, PinType::DigitalInput).is_err());
        assert!(frontend.send_digital_pin_value(4, true).is_err());
        assert!(queue.empty());
    }

    #[test]
    fn invalid_payloads_are_rejected() {
        let (frontend, queue) = frontend_fixture();
        assert!(frontend.set_sending_delta_ticks(0, 0).is_err());
        assert!(frontend.set_sampling_rate(0.0).is_err());
        assert!(frontend.set_input_scale_range(0, 5.0, 1.0).is_err());
        assert!(queue.empty());
    }

    #[test]
    fn global_commands_use_the_global_index() {
        let (frontend, queue) = frontend_fixture();
        frontend.set_mute_status(true);
        let Some(Message::Command(command)) = queue.pop() else {
            panic!("expected a command");
        };
        assert_eq!(command.index, -1);
        assert_eq!(command.op, CommandOp::SetMuteStatus(true));
    }
}
