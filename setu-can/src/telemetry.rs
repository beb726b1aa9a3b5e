//! Observable bridge state.
//!
//! Everything a status display needs is computed here; rendering is left to
//! the consumer. Each field has a single writer:
//! - link status: the link
//! - serial load: the load sampler
//! - scheduler state, tx counters: the transmit scheduler
//! - rx counters, last rx frame: the link read thread
//! - mission label, dual-input warning: the control ticker
//! - local state label: the state sequencer
//!
//! The link zeroes the traffic counters on connect, before the read thread
//! and the scheduler start.

use crate::core::types::{CanFrame, ControlVector, MissionState, timestamp_us};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// Bits on the wire per byte (8N1)
const BITS_PER_BYTE: f64 = 10.0;

/// Utilization at or above which the link is close to overrun
const LOAD_HIGH: f64 = 0.85;

/// Utilization at or above which the link is considered busy
const LOAD_ELEVATED: f64 = 0.65;

/// Serial link lifecycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LinkStatus {
    #[default]
    Idle,
    Connecting,
    Connected { version: Option<String> },
    Disconnected { reason: String },
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Idle => write!(f, "not connected"),
            LinkStatus::Connecting => write!(f, "connecting"),
            LinkStatus::Connected { version: Some(v) } => write!(f, "connected ({})", v),
            LinkStatus::Connected { version: None } => write!(f, "connected"),
            LinkStatus::Disconnected { reason } => write!(f, "{}", reason),
        }
    }
}

/// Transmit scheduler state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "loops", rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Stopped,
    NoFramesConfigured,
    Running(usize),
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Stopped => write!(f, "stopped"),
            SchedulerState::NoFramesConfigured => write!(f, "no frames configured"),
            SchedulerState::Running(n) => write!(f, "running ({} loops)", n),
        }
    }
}

/// Serial utilization band
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadLevel {
    #[default]
    Ok,
    Elevated,
    High,
}

impl LoadLevel {
    pub fn from_utilization(utilization: f64) -> Self {
        if utilization >= LOAD_HIGH {
            LoadLevel::High
        } else if utilization >= LOAD_ELEVATED {
            LoadLevel::Elevated
        } else {
            LoadLevel::Ok
        }
    }
}

/// One serial load sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SerialLoad {
    pub bits_per_sec: f64,
    /// Fraction of the configured baud rate in use
    pub utilization: f64,
    pub rx_bytes_per_sec: f64,
    pub tx_bytes_per_sec: f64,
    pub level: LoadLevel,
}

impl SerialLoad {
    /// Estimate load from byte counts over a window
    pub fn compute(rx_bytes: u64, tx_bytes: u64, elapsed_ms: u64, baud_rate: u32) -> Self {
        if elapsed_ms == 0 || baud_rate == 0 {
            return Self::default();
        }
        let seconds = elapsed_ms as f64 / 1000.0;
        let bits_per_sec = (rx_bytes + tx_bytes) as f64 * BITS_PER_BYTE / seconds;
        let utilization = bits_per_sec / baud_rate as f64;
        Self {
            bits_per_sec,
            utilization,
            rx_bytes_per_sec: rx_bytes as f64 / seconds,
            tx_bytes_per_sec: tx_bytes as f64 / seconds,
            level: LoadLevel::from_utilization(utilization),
        }
    }
}

impl fmt::Display for SerialLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.level {
            LoadLevel::High => "high (overrun risk)",
            LoadLevel::Elevated => "elevated",
            LoadLevel::Ok => "ok",
        };
        write!(
            f,
            "{:.1}% {} | RX {:.0} B/s TX {:.0} B/s",
            self.utilization * 100.0,
            label,
            self.rx_bytes_per_sec,
            self.tx_bytes_per_sec
        )
    }
}

/// Byte counters sampled into [`SerialLoad`]
#[derive(Debug)]
pub struct SerialLoadMeter {
    rx_bytes: AtomicU64,
    tx_bytes: AtomicU64,
    window_start: Mutex<Instant>,
}

impl SerialLoadMeter {
    pub fn new() -> Self {
        Self {
            rx_bytes: AtomicU64::new(0),
            tx_bytes: AtomicU64::new(0),
            window_start: Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_rx(&self, bytes: usize) {
        self.rx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_tx(&self, bytes: usize) {
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Zero the counters and restart the window
    pub fn reset(&self) {
        self.rx_bytes.store(0, Ordering::Relaxed);
        self.tx_bytes.store(0, Ordering::Relaxed);
        *self.window_start.lock() = Instant::now();
    }

    /// Take a sample over the window since the last sample, then restart it
    pub fn sample(&self, baud_rate: u32) -> SerialLoad {
        let elapsed_ms = {
            let mut start = self.window_start.lock();
            let elapsed = start.elapsed().as_millis() as u64;
            *start = Instant::now();
            elapsed
        };
        let rx = self.rx_bytes.swap(0, Ordering::Relaxed);
        let tx = self.tx_bytes.swap(0, Ordering::Relaxed);
        SerialLoad::compute(rx, tx, elapsed_ms, baud_rate)
    }
}

impl Default for SerialLoadMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Timestamped frame for last-seen displays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    pub timestamp_us: u64,
    pub frame: CanFrame,
}

/// Mission label and derived control flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MissionLabel {
    /// `AS_DRIVING_STATIC_A (AS 3)` style label
    pub label: String,
    /// Human readable phase description
    pub status_text: String,
    pub ready_to_drive: bool,
}

/// Shared telemetry registry
#[derive(Debug, Default)]
pub struct Telemetry {
    link: Mutex<LinkStatus>,
    scheduler: Mutex<SchedulerState>,
    tx_count: AtomicU64,
    last_tx: Mutex<Option<FrameRecord>>,
    rx_total: AtomicU64,
    rx_counts: Mutex<BTreeMap<u16, u64>>,
    last_rx: Mutex<Option<FrameRecord>>,
    mission: Mutex<MissionLabel>,
    load: Mutex<SerialLoad>,
    last_command_error: Mutex<Option<String>>,
    dual_input_warning: AtomicBool,
    local_state: Mutex<Option<String>>,
    pub load_meter: SerialLoadMeter,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Link
    // ========================================================================

    pub fn set_link_status(&self, status: LinkStatus) {
        log::info!("Link: {}", status);
        *self.link.lock() = status;
    }

    pub fn link_status(&self) -> LinkStatus {
        self.link.lock().clone()
    }

    pub fn set_serial_load(&self, load: SerialLoad) {
        *self.load.lock() = load;
    }

    pub fn serial_load(&self) -> SerialLoad {
        *self.load.lock()
    }

    pub fn record_command_error(&self, message: String) {
        log::warn!("Command failed: {}", message);
        *self.last_command_error.lock() = Some(message);
    }

    pub fn last_command_error(&self) -> Option<String> {
        self.last_command_error.lock().clone()
    }

    // ========================================================================
    // Transmit
    // ========================================================================

    pub fn set_scheduler_state(&self, state: SchedulerState) {
        let mut current = self.scheduler.lock();
        if *current != state {
            log::info!("Scheduler: {}", state);
        }
        *current = state;
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        *self.scheduler.lock()
    }

    pub fn record_tx(&self, frame: CanFrame) {
        self.tx_count.fetch_add(1, Ordering::Relaxed);
        *self.last_tx.lock() = Some(FrameRecord {
            timestamp_us: timestamp_us(),
            frame,
        });
    }

    pub fn tx_count(&self) -> u64 {
        self.tx_count.load(Ordering::Relaxed)
    }

    pub fn last_tx(&self) -> Option<FrameRecord> {
        self.last_tx.lock().clone()
    }

    // ========================================================================
    // Receive
    // ========================================================================

    /// Count a received frame; `matched` frames also become the last rx frame
    pub fn record_rx(&self, frame: &CanFrame, matched: bool) {
        self.rx_total.fetch_add(1, Ordering::Relaxed);
        *self.rx_counts.lock().entry(frame.id).or_insert(0) += 1;
        if matched {
            *self.last_rx.lock() = Some(FrameRecord {
                timestamp_us: timestamp_us(),
                frame: frame.clone(),
            });
        }
    }

    pub fn rx_total(&self) -> u64 {
        self.rx_total.load(Ordering::Relaxed)
    }

    pub fn rx_counts(&self) -> BTreeMap<u16, u64> {
        self.rx_counts.lock().clone()
    }

    pub fn last_rx(&self) -> Option<FrameRecord> {
        self.last_rx.lock().clone()
    }

    /// Forget the previous session's traffic; called on every connect
    pub fn reset_link_counters(&self) {
        self.tx_count.store(0, Ordering::Relaxed);
        *self.last_tx.lock() = None;
        self.rx_total.store(0, Ordering::Relaxed);
        self.rx_counts.lock().clear();
        *self.last_rx.lock() = None;
    }

    // ========================================================================
    // Control
    // ========================================================================

    pub fn set_mission_label(&self, label: MissionLabel) {
        let mut current = self.mission.lock();
        if current.label != label.label {
            log::debug!("Mission: {} - {}", label.label, label.status_text);
        }
        *current = label;
    }

    pub fn mission_label(&self) -> MissionLabel {
        self.mission.lock().clone()
    }

    pub fn set_dual_input_warning(&self, active: bool) {
        let was = self.dual_input_warning.swap(active, Ordering::Relaxed);
        if active && !was {
            log::warn!("Both steering axes deflected in opposite directions");
        }
    }

    pub fn dual_input_warning(&self) -> bool {
        self.dual_input_warning.load(Ordering::Relaxed)
    }

    /// `AS_READY (2)` style label of the operator-stepped state
    pub fn set_local_state(&self, label: String) {
        log::info!("Local state: {}", label);
        *self.local_state.lock() = Some(label);
    }

    pub fn local_state(&self) -> Option<String> {
        self.local_state.lock().clone()
    }
}

/// Point-in-time copy of everything observable
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub link: LinkStatus,
    pub scheduler: SchedulerState,
    pub tx_count: u64,
    pub last_tx: Option<String>,
    pub rx_total: u64,
    pub rx_counts: BTreeMap<String, u64>,
    pub last_rx: Option<String>,
    pub mission_state: MissionState,
    pub control: ControlVector,
    pub mission_timer_ms: u32,
    pub mission: MissionLabel,
    pub allow_torque: bool,
    pub finish_requested: bool,
    pub emergency_active: bool,
    pub serial_load: SerialLoad,
    pub last_command_error: Option<String>,
    pub dual_input_warning: bool,
    pub local_state: Option<String>,
}

impl TelemetrySnapshot {
    /// Assemble from the registry plus the current shared values
    pub fn capture(
        telemetry: &Telemetry,
        mission_state: MissionState,
        control: ControlVector,
        mission_timer_ms: u32,
    ) -> Self {
        let record = |r: Option<FrameRecord>| r.map(|r| r.frame.to_string());
        Self {
            link: telemetry.link_status(),
            scheduler: telemetry.scheduler_state(),
            tx_count: telemetry.tx_count(),
            last_tx: record(telemetry.last_tx()),
            rx_total: telemetry.rx_total(),
            rx_counts: telemetry
                .rx_counts()
                .into_iter()
                .map(|(id, n)| (format!("0x{:03X}", id), n))
                .collect(),
            last_rx: record(telemetry.last_rx()),
            mission_state,
            control,
            mission_timer_ms,
            mission: telemetry.mission_label(),
            allow_torque: control.allow_torque(),
            finish_requested: control.finish_requested(),
            emergency_active: control.emergency_active(),
            serial_load: telemetry.serial_load(),
            last_command_error: telemetry.last_command_error(),
            dual_input_warning: telemetry.dual_input_warning(),
            local_state: telemetry.local_state(),
        }
    }
}

impl fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "link={} | scheduler={} | tx={} rx={} | {} | AS={} AMI={} | steer={} speed={} torque={} brake={} | load {}",
            self.link,
            self.scheduler,
            self.tx_count,
            self.rx_total,
            self.mission.label,
            self.mission_state.as_state,
            self.mission_state.ami_state,
            self.control.steer,
            self.control.speed,
            self.control.torque,
            self.control.brake,
            self.serial_load
        )
    }
}
