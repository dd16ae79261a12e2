//! TarangIO - Sensor bridge daemon for music hardware controllers

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tarang_io::error::Error;
use tarang_io::{EventHandler, Result};

/// Addressable input pins across all supported controllers
const MAX_INPUT_PINS: usize = 64;

/// Addressable digital output pins
const MAX_DIGITAL_OUT_PINS: usize = 32;

/// One dispatch cycle per wait period when the system is idle
const EVENT_WAIT_PERIOD: Duration = Duration::from_millis(250);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("TarangIO v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/tarang-io.toml".to_string());
    log::info!("Using config: {}", config_path);

    let mut handler = EventHandler::init(MAX_INPUT_PINS, MAX_DIGITAL_OUT_PINS, &config_path)
        .map_err(|e| {
            log::error!("Init failed: {}", e);
            e
        })?;

    // Graceful shutdown on SIGINT/SIGTERM
    let running = Arc::new(AtomicBool::new(true));
    let signal_running = Arc::clone(&running);
    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| Error::Other(format!("Error setting signal handler: {}", e)))?;
    thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            log::info!("Received signal {}, shutting down", signal);
            signal_running.store(false, Ordering::Relaxed);
        }
    });

    log::info!("TarangIO running. Press Ctrl-C to stop.");

    while running.load(Ordering::Relaxed) {
        handler.handle_events(EVENT_WAIT_PERIOD);
    }

    log::info!("Shutting down...");
    handler.deinit();
    log::info!("TarangIO stopped");
    Ok(())
}
