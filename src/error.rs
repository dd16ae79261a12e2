//! Error types for TarangIO
//!
//! # Error Recovery Strategies
//!
//! ## Fatal Errors (Require Restart)
//!
//! - **`ThreadPanic`**: A frontend I/O thread panicked. The frontend must be
//!   recreated; the event handler logs the error and aborts `init()` if it
//!   happens during startup.
//!
//! ## Transient Errors (Retry Recommended)
//!
//! - **`Serial`**: Serial port communication error. Often caused by cable
//!   disconnection or a device reset; the frontend flips its connected flag
//!   and retries from its own loop.
//!
//! - **`Io`**: Generic I/O error on a socket transport. Usually retryable
//!   after a brief delay.
//!
//! ## Configuration Errors (Fix and Restart)
//!
//! - **`Config`**: Configuration file is missing or invalid. Fix and restart.
//! - **`UnknownFrontend`** / **`UnknownBackend`**: Transport or output choice
//!   not recognized. Check the `[hardware]` / `[output]` config sections.
//!
//! Recoverable protocol-level conditions (bad CRC, unknown opcode, unknown
//! pin) are not crate errors; they travel as ERROR messages on the event
//! queue and are defined in [`crate::message`].

use thiserror::Error;

/// Errors that can occur in TarangIO
#[derive(Error, Debug)]
pub enum Error {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Thread panic")]
    ThreadPanic,

    #[error("Unknown hardware frontend: {0}")]
    UnknownFrontend(String),

    #[error("Unknown output backend: {0}")]
    UnknownBackend(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
