//! The event handler: single-threaded owner of the core's lifecycle.
//!
//! Drains the event queue in strict FIFO order and routes each message:
//! values to the mapping processor (which emits through the output backend),
//! commands to the mapping processor and/or the to-frontend queue per their
//! target, internal commands to its own state. Component errors are logged
//! and surfaced to the user frontend; the dispatcher never terminates on a
//! handled error.

use crate::config::Config;
use crate::error::Result;
use crate::hw_frontend::{create_frontend, HwFrontend};
use crate::mapping::MappingProcessor;
use crate::message::{
    Command, CommandErrorCode, CommandOp, ErrorKind, ErrorMessage, Message,
};
use crate::output_backend::{create_backend, OutputBackend};
use crate::queue::SynchronizedQueue;
use crate::user_frontend::UserFrontend;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct EventHandler {
    config_path: PathBuf,
    event_queue: Arc<SynchronizedQueue<Message>>,
    to_frontend_queue: Arc<SynchronizedQueue<Command>>,
    hw_frontend: Box<dyn HwFrontend>,
    processor: MappingProcessor,
    output_backend: Box<dyn OutputBackend>,
    user_frontend: UserFrontend,
    stopped: bool,
}

impl EventHandler {
    /// Construct all sub-components, start the hardware frontend and apply
    /// the initial configuration by replaying it as a command stream through
    /// the handler's own routing.
    pub fn init(
        max_input_pins: usize,
        max_digital_out_pins: usize,
        config_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let config_path = config_path.into();
        let config = Config::load(&config_path)?;

        let event_queue = Arc::new(SynchronizedQueue::new());
        let to_frontend_queue = Arc::new(SynchronizedQueue::new());

        let output_backend = create_backend(&config.output)?;
        let processor = MappingProcessor::new(max_input_pins);
        let hw_frontend = create_frontend(
            &config,
            Arc::clone(&to_frontend_queue),
            Arc::clone(&event_queue),
        )?;
        let user_frontend = UserFrontend::new(
            Arc::clone(&event_queue),
            max_input_pins,
            max_digital_out_pins,
        );

        let mut handler = Self {
            config_path,
            event_queue,
            to_frontend_queue,
            hw_frontend,
            processor,
            output_backend,
            user_frontend,
            stopped: false,
        };
        handler.hw_frontend.run();

        for command in config.command_stream() {
            handler.apply_command(command);
        }

        log::info!("Event handler initialized ({} input pins)", max_input_pins);
        Ok(handler)
    }

    /// Drain the event queue after at most one bounded wait, so the host can
    /// check its stop flag between calls.
    pub fn handle_events(&mut self, wait_period: Duration) {
        if !self.event_queue.wait_for_data(wait_period) {
            return;
        }
        while let Some(message) = self.event_queue.pop() {
            match message {
                Message::Value(value) => {
                    self.processor.process(&value, &mut *self.output_backend);
                }
                Message::Command(command) => self.apply_command(command),
                Message::Error(error) => self.handle_error(error),
            }
        }
    }

    /// Stop the frontend and drain the queues. Idempotent; remaining
    /// components are released when the handler is dropped.
    pub fn deinit(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.hw_frontend.stop();
        while self.event_queue.pop().is_some() {}
        while self.to_frontend_queue.pop().is_some() {}
        log::info!("Event handler deinitialized");
    }

    /// Re-read the configuration source and replay it as a command stream.
    pub fn reload_config(&mut self) -> Result<()> {
        let config = Config::load(&self.config_path)?;
        self.hw_frontend.install_pin_table(config.pin_table());
        self.hw_frontend.install_imu_table(config.imu_table());
        for command in config.command_stream() {
            self.apply_command(command);
        }
        log::info!("Configuration reloaded");
        Ok(())
    }

    /// Handle for the runtime control surface
    pub fn user_frontend(&self) -> UserFrontend {
        self.user_frontend.clone()
    }

    pub fn connected(&self) -> bool {
        self.hw_frontend.connected()
    }

    fn apply_command(&mut self, command: Command) {
        let target = command.target();

        if target.mapping {
            let code = self.processor.apply_command(&command);
            if !code.is_ok() {
                let error = ErrorMessage::new(
                    command_error_kind(code),
                    Some(command.index),
                    format!("Command {:?} rejected: {:?}", command.op, code),
                );
                self.handle_error(error);
            }
        }
        if target.hw_frontend {
            self.to_frontend_queue.push(command.clone());
        }
        if target.internal {
            self.apply_internal(&command);
        }
    }

    fn apply_internal(&mut self, command: &Command) {
        match command.op {
            CommandOp::SetMuteStatus(muted) => {
                log::info!("Mute {}", if muted { "enabled" } else { "disabled" });
                self.hw_frontend.mute(muted);
            }
            CommandOp::VerifyAcks(enabled) => {
                log::info!(
                    "Ack verification {}",
                    if enabled { "enabled" } else { "disabled" }
                );
                self.hw_frontend.verify_acks(enabled);
            }
            CommandOp::SetSamplingRate(rate) => {
                self.processor.set_sampling_rate(rate);
            }
            CommandOp::ReloadConfig => {
                if let Err(e) = self.reload_config() {
                    log::error!("Config reload failed: {}", e);
                }
            }
            _ => {}
        }
    }

    fn handle_error(&mut self, error: ErrorMessage) {
        match error.kind {
            ErrorKind::TimeoutOnResponse | ErrorKind::SerialDevicePortNotOpen => {
                log::error!("{:?}: {}", error.kind, error.text);
            }
            _ => log::warn!("{:?}: {}", error.kind, error.text),
        }
        self.user_frontend.notify_error(&error);
    }
}

impl Drop for EventHandler {
    fn drop(&mut self) {
        self.deinit();
    }
}

fn command_error_kind(code: CommandErrorCode) -> ErrorKind {
    match code {
        CommandErrorCode::InvalidPinIndex => ErrorKind::InvalidPinIndex,
        CommandErrorCode::InvalidValue => ErrorKind::InvalidValue,
        CommandErrorCode::InvalidCommandForPinType => ErrorKind::InvalidCommandForPinType,
        CommandErrorCode::UninitializedPin => ErrorKind::UninitializedPin,
        CommandErrorCode::Ok => ErrorKind::GenericError,
    }
}
