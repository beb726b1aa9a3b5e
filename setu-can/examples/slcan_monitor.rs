//! SLCAN receive monitor
//!
//! Opens the adapter with no periodic frames configured and reports what
//! arrives on the bus for 10 seconds: per-id frame counts, the decoded VCU
//! status and the serial load.
//!
//! Usage: `cargo run --example slcan_monitor -- [port] [baud]`

use setu_can::config::BridgeConfig;
use setu_can::{LinkIo, SharedContext, SlcanLink};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = BridgeConfig::default();
    if let Some(port) = args.get(1) {
        config.serial.port = port.clone();
    }
    if let Some(baud) = args.get(2) {
        config.serial.baud_rate = baud.parse()?;
    }
    config.can.periodic_frames.clear();

    let validated = config.validated();
    log::info!("=== SLCAN Monitor ===");
    log::info!("{}", validated.describe());

    let ctx = Arc::new(SharedContext::new());
    let io = LinkIo::serial(&validated.port, validated.link.baud_rate)?;
    let link = SlcanLink::connect(io, validated.link.clone(), Arc::clone(&ctx))?;
    log::info!(
        "Adapter version: {}",
        link.adapter_version().as_deref().unwrap_or("-")
    );

    let start = Instant::now();
    let mut last_mission = ctx.mission();
    let mut last_report = Instant::now();

    while start.elapsed() < Duration::from_secs(10) && link.is_connected() {
        std::thread::sleep(Duration::from_millis(20));

        let mission = ctx.mission();
        if mission != last_mission {
            println!(
                "[{:>6}ms] VCU status: handshake={} go={} AS={} AMI={}",
                start.elapsed().as_millis(),
                mission.handshake,
                mission.go_signal,
                mission.as_state,
                mission.ami_state
            );
            last_mission = mission;
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            let counts: Vec<String> = ctx
                .telemetry
                .rx_counts()
                .iter()
                .map(|(id, n)| format!("0x{:03X}={}", id, n))
                .collect();
            println!(
                "[{:>6}ms] rx {} frames [{}] load {}",
                start.elapsed().as_millis(),
                ctx.telemetry.rx_total(),
                counts.join(" "),
                ctx.telemetry.load_meter.sample(validated.link.baud_rate)
            );
            last_report = Instant::now();
        }
    }

    if let Some(record) = ctx.telemetry.last_rx() {
        println!("Last frame: {}", record.frame);
    }
    link.disconnect("monitor finished", true);
    Ok(())
}
