//! TarangIO - Sensor bridge daemon for music hardware controllers
//!
//! Sits between a low-level hardware controller (serial microcontroller,
//! XMOS board, or a GPIO process over a local socket) and downstream
//! consumers of normalized sensor events (OSC, stdout). The event handler
//! drives a per-pin mapping layer from a declarative configuration and
//! keeps the hardware link alive under reconnection, muting and ack
//! verification.

pub mod config;
pub mod error;
pub mod event_handler;
pub mod hw_frontend;
pub mod mapping;
pub mod message;
pub mod output_backend;
pub mod queue;
pub mod transport;
pub mod user_frontend;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use event_handler::EventHandler;
pub use user_frontend::UserFrontend;
