//! SetuCAN - gamepad/mission to CAN bridge daemon
//!
//! Opens the SLCAN adapter, runs the adapter handshake, then transmits the
//! configured frames until Ctrl-C. The link is closed with `C` on exit.

use setu_can::gamepad::NoGamepad;
use setu_can::{Bridge, BridgeConfig, Error, Result};
use std::env;
use std::path::Path;

/// Command line options
struct Args {
    config_path: String,
    port: Option<String>,
}

/// Parse options from command line arguments.
///
/// Supports:
/// - `setu-can <path>` (positional)
/// - `setu-can --config <path>` / `-c <path>`
/// - `--port <device>` / `-p <device>` overriding the configured port
///
/// Defaults to `setu-can.toml` in the working directory.
fn parse_args() -> Args {
    let args: Vec<String> = env::args().collect();
    let mut config_path = None;
    let mut port = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" if i + 1 < args.len() => {
                config_path = Some(args[i + 1].clone());
                i += 1;
            }
            "--port" | "-p" if i + 1 < args.len() => {
                port = Some(args[i + 1].clone());
                i += 1;
            }
            arg if !arg.starts_with('-') && config_path.is_none() => {
                config_path = Some(arg.to_string());
            }
            arg => log::warn!("Ignoring argument '{}'", arg),
        }
        i += 1;
    }

    Args {
        config_path: config_path.unwrap_or_else(|| "setu-can.toml".to_string()),
        port,
    }
}

fn load_config(path: &str) -> Result<BridgeConfig> {
    if Path::new(path).exists() {
        log::info!("Using config: {}", path);
        BridgeConfig::from_file(path)
    } else {
        log::warn!("Config {} not found, using defaults", path);
        Ok(BridgeConfig::default())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("SetuCAN v{} starting...", env!("CARGO_PKG_VERSION"));

    let args = parse_args();
    let mut config = load_config(&args.config_path)?;
    if let Some(port) = args.port {
        config.serial.port = port;
    }

    let validated = config.validated();
    if !validated.issues.is_empty() {
        log::warn!(
            "{} config value(s) replaced by defaults",
            validated.issues.len()
        );
    }

    let mut bridge = Bridge::new(validated, Box::new(NoGamepad))?;

    let shutdown = bridge.shutdown_flag();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    if let Err(e) = bridge.connect_serial() {
        log::error!("{}", e);
        bridge.shutdown();
        return Err(e);
    }

    log::info!("Press Ctrl+C to stop");
    bridge.run()?;

    log::info!("Shutting down...");
    bridge.shutdown();
    Ok(())
}
