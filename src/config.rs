//! Configuration loading from TOML
//!
//! # Configuration File Format
//!
//! ```toml
//! [system]
//! sampling_rate_hz = 1000.0
//! max_input_pins = 64
//! max_digital_out_pins = 32
//!
//! [hardware]
//! frontend = "serial"          # "serial" | "xmos" | "gpio"
//! port = "/dev/ttyACM0"        # serial frontends
//! # socket = "/tmp/xmos_ctrl"  # xmos / gpio frontends
//!
//! [output]
//! backend = "osc"              # "osc" | "stdout"
//! host = "127.0.0.1"
//! port = 23023
//!
//! [[pins]]
//! index = 0
//! hw_pin_id = 0                # defaults to index
//! pin_type = "analog_input"
//! sending_mode = "on_value_changed"
//! delta_ticks = 1
//! adc_bits = 12
//! lowpass_order = 1
//! lowpass_cutoff_hz = 100.0
//! slider_threshold = 2
//! invert = false
//! input_range = [0.0, 4095.0]
//! output_range = [0.0, 1.0]
//!
//! [imu]                        # optional axis -> sensor index table
//! yaw = 6
//! pitch = 7
//! roll = 8
//! ```
//!
//! Loading produces two things: the pin/axis tables installed into the
//! hardware frontend, and a command stream that is replayed through the
//! event handler to bring mappers and hardware into the configured state.

use crate::error::{Error, Result};
use crate::message::{Command, CommandOp, ImuAxis, PinType, SendingMode};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Global system parameters
#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    /// Controller sampling rate in Hz, shared by all pins
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate_hz: f32,

    /// Number of addressable input pins
    #[serde(default = "default_max_input_pins")]
    pub max_input_pins: usize,

    /// Number of addressable digital output pins
    #[serde(default = "default_max_digital_out_pins")]
    pub max_digital_out_pins: usize,
}

fn default_sampling_rate() -> f32 {
    1000.0
}
fn default_max_input_pins() -> usize {
    64
}
fn default_max_digital_out_pins() -> usize {
    32
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            sampling_rate_hz: default_sampling_rate(),
            max_input_pins: default_max_input_pins(),
            max_digital_out_pins: default_max_digital_out_pins(),
        }
    }
}

/// Hardware transport choice and its parameters
#[derive(Debug, Clone, Deserialize)]
pub struct HardwareConfig {
    /// Transport type: "serial", "xmos" or "gpio"
    pub frontend: String,

    /// Serial port path (required for "serial")
    #[serde(default)]
    pub port: Option<String>,

    /// Peer socket name (required for "xmos" and "gpio")
    #[serde(default)]
    pub socket: Option<String>,
}

/// Output sink choice and its parameters
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Sink type: "osc" or "stdout"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// OSC destination host
    #[serde(default = "default_osc_host")]
    pub host: String,

    /// OSC destination port
    #[serde(default = "default_osc_port")]
    pub port: u16,
}

fn default_backend() -> String {
    "osc".to_string()
}
fn default_osc_host() -> String {
    "127.0.0.1".to_string()
}
fn default_osc_port() -> u16 {
    23023
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            host: default_osc_host(),
            port: default_osc_port(),
        }
    }
}

/// Declarative per-pin configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PinConfig {
    /// Logical sensor index used in all internal messages
    pub index: u16,

    /// Hardware pin id used on the wire. Defaults to `index`.
    #[serde(default)]
    pub hw_pin_id: Option<u16>,

    pub pin_type: PinType,

    #[serde(default)]
    pub sending_mode: Option<SendingMode>,

    #[serde(default)]
    pub delta_ticks: Option<u32>,

    #[serde(default)]
    pub adc_bits: Option<u8>,

    #[serde(default)]
    pub lowpass_order: Option<u8>,

    #[serde(default)]
    pub lowpass_cutoff_hz: Option<f32>,

    #[serde(default)]
    pub slider_threshold: Option<u16>,

    #[serde(default)]
    pub invert: Option<bool>,

    /// Raw input range mapped onto `output_range`
    #[serde(default)]
    pub input_range: Option<[f32; 2]>,

    #[serde(default)]
    pub output_range: Option<[f32; 2]>,
}

/// IMU axis to logical sensor index table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImuConfig {
    #[serde(default)]
    pub yaw: Option<u16>,
    #[serde(default)]
    pub pitch: Option<u16>,
    #[serde(default)]
    pub roll: Option<u16>,
}

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub system: SystemConfig,
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub pins: Vec<PinConfig>,
    #[serde(default)]
    pub imu: Option<ImuConfig>,
}

const MAX_ADC_BITS: u8 = 16;
const MAX_FILTER_ORDER: u8 = 2;

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Validation
    ///
    /// - "serial" frontend requires `port`, "xmos"/"gpio" require `socket`
    /// - pin indices must be below `max_input_pins`
    /// - `adc_bits` within 1-16, `lowpass_order` within 1-2
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = basic_toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        match config.hardware.frontend.as_str() {
            "serial" => {
                if config.hardware.port.is_none() {
                    return Err(Error::Config(
                        "serial frontend requires [hardware] port".to_string(),
                    ));
                }
            }
            "xmos" | "gpio" => {
                if config.hardware.socket.is_none() {
                    return Err(Error::Config(format!(
                        "{} frontend requires [hardware] socket",
                        config.hardware.frontend
                    )));
                }
            }
            other => {
                return Err(Error::UnknownFrontend(other.to_string()));
            }
        }

        match config.output.backend.as_str() {
            "osc" | "stdout" => {}
            other => return Err(Error::UnknownBackend(other.to_string())),
        }

        let max_pins = config.system.max_input_pins;
        for pin in &config.pins {
            if pin.index as usize >= max_pins {
                return Err(Error::Config(format!(
                    "pin index {} out of range (max_input_pins = {})",
                    pin.index, max_pins
                )));
            }
            if let Some(bits) = pin.adc_bits {
                if bits == 0 || bits > MAX_ADC_BITS {
                    return Err(Error::Config(format!(
                        "pin {}: adc_bits must be within 1-{}",
                        pin.index, MAX_ADC_BITS
                    )));
                }
            }
            if let Some(order) = pin.lowpass_order {
                if order == 0 || order > MAX_FILTER_ORDER {
                    return Err(Error::Config(format!(
                        "pin {}: lowpass_order must be within 1-{}",
                        pin.index, MAX_FILTER_ORDER
                    )));
                }
            }
            if let Some([low, high]) = pin.input_range {
                if low >= high {
                    return Err(Error::Config(format!(
                        "pin {}: input_range low must be below high ({} >= {})",
                        pin.index, low, high
                    )));
                }
            }
        }

        Ok(config)
    }

    /// Hardware pin id -> logical sensor index pairs for the frontend
    pub fn pin_table(&self) -> Vec<(u16, u16)> {
        self.pins
            .iter()
            .map(|p| (p.hw_pin_id.unwrap_or(p.index), p.index))
            .collect()
    }

    /// IMU axis -> logical sensor index pairs for the frontend
    pub fn imu_table(&self) -> Vec<(ImuAxis, u16)> {
        let Some(imu) = &self.imu else {
            return Vec::new();
        };
        let mut table = Vec::new();
        if let Some(idx) = imu.yaw {
            table.push((ImuAxis::Yaw, idx));
        }
        if let Some(idx) = imu.pitch {
            table.push((ImuAxis::Pitch, idx));
        }
        if let Some(idx) = imu.roll {
            table.push((ImuAxis::Roll, idx));
        }
        table
    }

    /// Expand the declarative configuration into the command stream that
    /// brings mappers and hardware into the configured state.
    ///
    /// Ordering is significant: the global sampling rate goes first, each
    /// pin's `SetPinType` strictly precedes its per-pin commands, and the
    /// controller's value stream is enabled last.
    pub fn command_stream(&self) -> Vec<Command> {
        let mut commands = Vec::new();
        commands.push(Command::global(CommandOp::SetSamplingRate(
            self.system.sampling_rate_hz,
        )));

        for pin in &self.pins {
            let index = pin.index as i32;
            commands.push(Command::new(index, CommandOp::SetPinType(pin.pin_type)));

            if let Some(mode) = pin.sending_mode {
                commands.push(Command::new(index, CommandOp::SetSendingMode(mode)));
            }
            if let Some(ticks) = pin.delta_ticks {
                commands.push(Command::new(index, CommandOp::SetSendingDeltaTicks(ticks)));
            }
            if let Some(bits) = pin.adc_bits {
                commands.push(Command::new(index, CommandOp::SetAdcBitResolution(bits)));
            }
            if let Some(order) = pin.lowpass_order {
                commands.push(Command::new(index, CommandOp::SetLowpassFilterOrder(order)));
            }
            if let Some(cutoff) = pin.lowpass_cutoff_hz {
                commands.push(Command::new(index, CommandOp::SetLowpassCutoff(cutoff)));
            }
            if let Some(threshold) = pin.slider_threshold {
                commands.push(Command::new(index, CommandOp::SetSliderThreshold(threshold)));
            }
            if let Some(invert) = pin.invert {
                commands.push(Command::new(index, CommandOp::SetInvertEnabled(invert)));
            }
            if let Some([low, high]) = pin.input_range {
                commands.push(Command::new(
                    index,
                    CommandOp::SetInputScaleRange { low, high },
                ));
            }
            if let Some([low, high]) = pin.output_range {
                commands.push(Command::new(index, CommandOp::SetOutputRange { low, high }));
            }
        }

        commands.push(Command::global(CommandOp::EnableSending(true)));
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
        [system]
        sampling_rate_hz = 500.0
        max_input_pins = 16

        [hardware]
        frontend = "serial"
        port = "/dev/ttyACM0"

        [output]
        backend = "stdout"

        [[pins]]
        index = 2
        hw_pin_id = 5
        pin_type = "analog_input"
        sending_mode = "on_value_changed"
        adc_bits = 12
        slider_threshold = 4
        input_range = [0.0, 4095.0]
        output_range = [0.0, 1.0]

        [[pins]]
        index = 3
        pin_type = "digital_input"
        invert = true

        [imu]
        yaw = 6
        pitch = 7
    "#;

    #[test]
    fn parses_full_config() {
        let config = Config::parse(EXAMPLE).unwrap();
        assert_eq!(config.system.sampling_rate_hz, 500.0);
        assert_eq!(config.pins.len(), 2);
        assert_eq!(config.pins[0].pin_type, PinType::AnalogInput);
        assert_eq!(config.pin_table(), vec![(5, 2), (3, 3)]);
        assert_eq!(
            config.imu_table(),
            vec![(ImuAxis::Yaw, 6), (ImuAxis::Pitch, 7)]
        );
    }

    #[test]
    fn command_stream_orders_pin_type_first() {
        let config = Config::parse(EXAMPLE).unwrap();
        let commands = config.command_stream();

        assert!(matches!(commands[0].op, CommandOp::SetSamplingRate(_)));
        assert!(matches!(
            commands.last().unwrap().op,
            CommandOp::EnableSending(true)
        ));

        let first_pin2 = commands.iter().position(|c| c.index == 2).unwrap();
        assert!(matches!(commands[first_pin2].op, CommandOp::SetPinType(_)));
        let first_pin3 = commands.iter().position(|c| c.index == 3).unwrap();
        assert!(matches!(commands[first_pin3].op, CommandOp::SetPinType(_)));
    }

    #[test]
    fn rejects_unknown_frontend() {
        let bad = EXAMPLE.replace("\"serial\"", "\"spi\"");
        assert!(matches!(
            Config::parse(&bad),
            Err(Error::UnknownFrontend(_))
        ));
    }

    #[test]
    fn rejects_serial_without_port() {
        let bad = EXAMPLE.replace("port = \"/dev/ttyACM0\"", "");
        assert!(matches!(Config::parse(&bad), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_out_of_range_pin() {
        let bad = EXAMPLE.replace("index = 3", "index = 20");
        assert!(matches!(Config::parse(&bad), Err(Error::Config(_))));
    }
}
