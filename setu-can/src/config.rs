//! Configuration for the SLCAN bridge
//!
//! Loaded from TOML. Every field has a default, so a partial file (or no
//! file at all) is valid. [`BridgeConfig::validated`] turns the raw values
//! into the settings the link and controller consume, replacing each
//! invalid value with its default and logging a warning.

use crate::control::{ControlMode, ControlSettings, ManualLimits, StateTable};
use crate::control::sequence::DEFAULT_STATES;
use crate::core::types::{PeriodicFrame, TRACKED_BUTTONS};
use crate::error::{Error, Result};
use crate::link::{LinkSettings, RX_POLL_INTERVAL};
use crate::protocol::{BitrateCode, parse_can_id};
use crate::transport::SUPPORTED_BAUD_RATES;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

fn default_port() -> String {
    "/dev/ttyACM0".to_string()
}

fn default_baud_rate() -> u32 {
    2_000_000
}

fn default_bitrate_code() -> String {
    "6".to_string()
}

fn default_rx_filter_id() -> String {
    "0x520".to_string()
}

fn default_interval_ms() -> u64 {
    20
}

fn default_periodic_frames() -> Vec<FrameEntry> {
    ["0x510", "0x512", "0x513", "0x514"]
        .iter()
        .map(|id| FrameEntry {
            id: id.to_string(),
            interval_ms: default_interval_ms(),
        })
        .collect()
}

fn default_mode() -> String {
    "state".to_string()
}

fn default_deadband() -> f32 {
    0.05
}

fn default_steer_max() -> f32 {
    300.0
}

fn default_speed_max() -> f32 {
    4000.0
}

fn default_brake_max() -> f32 {
    100.0
}

fn default_drive_torque() -> i32 {
    1950
}

fn default_stop_button() -> usize {
    0
}

fn default_transition_button() -> usize {
    1
}

fn default_states() -> BTreeMap<String, i64> {
    DEFAULT_STATES
        .iter()
        .map(|(name, value)| (name.to_string(), i64::from(*value)))
        .collect()
}

fn default_sequence() -> Vec<String> {
    DEFAULT_STATES.iter().map(|(name, _)| name.to_string()).collect()
}

// ============================================================================
// Raw configuration
// ============================================================================

/// Top-level bridge configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub can: CanConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub mission: MissionConfig,
}

/// Serial adapter
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyACM0` or `COM3`
    #[serde(default = "default_port")]
    pub port: String,
    /// Host-side baud rate; must be one of the supported rates
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// SLCAN bitrate code `0`-`8` (`6` = 500 kbit/s)
    #[serde(default = "default_bitrate_code")]
    pub bitrate_code: String,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            bitrate_code: default_bitrate_code(),
        }
    }
}

/// One periodic transmission
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FrameEntry {
    /// Hex id, `0x510` or `510`
    pub id: String,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

/// CAN traffic
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CanConfig {
    /// Id decoded into the mission state
    #[serde(default = "default_rx_filter_id")]
    pub rx_filter_id: String,
    #[serde(default = "default_periodic_frames")]
    pub periodic_frames: Vec<FrameEntry>,
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            rx_filter_id: default_rx_filter_id(),
            periodic_frames: default_periodic_frames(),
        }
    }
}

/// Controller selection and manual mapping
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    /// `state` or `raw`
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_deadband")]
    pub deadband: f32,
    #[serde(default = "default_steer_max")]
    pub steer_max: f32,
    #[serde(default = "default_speed_max")]
    pub speed_max: f32,
    #[serde(default = "default_brake_max")]
    pub brake_max: f32,
    /// Torque request while driving manually
    #[serde(default = "default_drive_torque")]
    pub drive_torque: i32,
    /// Button requesting mission stop in manual driving
    #[serde(default = "default_stop_button")]
    pub stop_button: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            deadband: default_deadband(),
            steer_max: default_steer_max(),
            speed_max: default_speed_max(),
            brake_max: default_brake_max(),
            drive_torque: default_drive_torque(),
            stop_button: default_stop_button(),
        }
    }
}

/// Named mission states and the local sequencer
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MissionConfig {
    /// Sequencer poll period
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Button stepping the local state
    #[serde(default = "default_transition_button")]
    pub transition_button: usize,
    #[serde(default = "default_states")]
    pub states: BTreeMap<String, i64>,
    #[serde(default = "default_sequence")]
    pub sequence: Vec<String>,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            transition_button: default_transition_button(),
            states: default_states(),
            sequence: default_sequence(),
        }
    }
}

// ============================================================================
// Validated settings
// ============================================================================

/// Settings after validation; every value is usable as is
#[derive(Debug)]
pub struct ValidatedConfig {
    pub port: String,
    pub link: LinkSettings,
    pub control: ControlSettings,
    pub states: StateTable,
    pub sequencer_interval: Duration,
    pub transition_button: usize,
    /// One entry per value replaced by its default
    pub issues: Vec<Error>,
}

impl ValidatedConfig {
    /// One-line summary for the startup log
    pub fn describe(&self) -> String {
        let frames = self
            .link
            .periodic_frames
            .iter()
            .map(|f| format!("0x{:03X}@{}ms", f.id, f.interval.as_millis()))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "{} @ {} baud, S{} ({} kbit/s), rx 0x{:03X}, tx [{}], {} mode",
            self.port,
            self.link.baud_rate,
            self.link.bitrate.code(),
            self.link.bitrate.kbps(),
            self.link.rx_filter_id,
            frames,
            self.control.mode
        )
    }

    /// Sequencer line: `20ms, btn#1, AS_INIT=0, ...`
    pub fn describe_states(&self) -> String {
        format!(
            "{}ms, btn#{}, {}",
            self.sequencer_interval.as_millis(),
            self.transition_button,
            self.states.describe()
        )
    }
}

/// Collects validation problems while substituting defaults
struct Validator {
    issues: Vec<Error>,
}

impl Validator {
    fn reject(&mut self, message: String) {
        log::warn!("Config: {}", message);
        self.issues.push(Error::ConfigValidation(message));
    }

    fn interval(&mut self, what: &str, ms: u64) -> Duration {
        if ms == 0 {
            self.reject(format!(
                "{} interval must be positive, using {}ms",
                what,
                default_interval_ms()
            ));
            return Duration::from_millis(default_interval_ms());
        }
        Duration::from_millis(ms)
    }

    fn non_negative(&mut self, what: &str, value: f32, default: f32) -> f32 {
        if value.is_finite() && value >= 0.0 {
            return value;
        }
        self.reject(format!("{} = {} is invalid, using {}", what, value, default));
        default
    }

    fn button(&mut self, what: &str, index: usize, default: usize) -> usize {
        if index < TRACKED_BUTTONS {
            return index;
        }
        self.reject(format!(
            "{} = {} is not one of the tracked buttons 0-{}, using {}",
            what,
            index,
            TRACKED_BUTTONS - 1,
            default
        ));
        default
    }

    fn baud_rate(&mut self, baud: u32) -> u32 {
        if SUPPORTED_BAUD_RATES.contains(&baud) {
            return baud;
        }
        self.reject(format!(
            "baud rate {} not supported (allowed: {:?}), using {}",
            baud,
            SUPPORTED_BAUD_RATES,
            default_baud_rate()
        ));
        default_baud_rate()
    }

    fn bitrate(&mut self, code: &str) -> BitrateCode {
        BitrateCode::parse(code).unwrap_or_else(|e| {
            self.reject(format!("{}, using S{}", e, BitrateCode::DEFAULT.code()));
            BitrateCode::DEFAULT
        })
    }

    fn rx_filter(&mut self, id: &str) -> u16 {
        parse_can_id(id).unwrap_or_else(|e| {
            self.reject(format!("rx_filter_id: {}, using {}", e, default_rx_filter_id()));
            0x520
        })
    }

    fn periodic_frames(&mut self, entries: &[FrameEntry]) -> Vec<PeriodicFrame> {
        let mut frames = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = match parse_can_id(&entry.id) {
                Ok(id) => id,
                Err(e) => {
                    self.reject(format!("periodic frame dropped: {}", e));
                    continue;
                }
            };
            let interval = self.interval(&format!("frame 0x{:03X}", id), entry.interval_ms);
            frames.push(PeriodicFrame { id, interval });
        }
        frames
    }

    fn mode(&mut self, mode: &str) -> ControlMode {
        mode.parse().unwrap_or_else(|e: Error| {
            self.reject(format!("{}, using state", e));
            ControlMode::State
        })
    }

    fn deadband(&mut self, deadband: f32) -> f32 {
        if deadband.is_finite() && (0.0..1.0).contains(&deadband) {
            return deadband;
        }
        self.reject(format!(
            "deadband {} outside [0, 1), using {}",
            deadband,
            default_deadband()
        ));
        default_deadband()
    }

    fn states(&mut self, raw: &BTreeMap<String, i64>, sequence: &[String]) -> StateTable {
        let mut values = BTreeMap::new();
        for (name, &value) in raw {
            match u8::try_from(value) {
                Ok(v) if !name.trim().is_empty() => {
                    values.insert(name.clone(), v);
                }
                _ => self.reject(format!("state {} = {} dropped (expected 0-255)", name, value)),
            }
        }
        if values.is_empty() {
            self.reject("no usable mission states, using defaults".to_string());
            return StateTable::default();
        }

        let mut known = 0;
        for name in sequence {
            if values.contains_key(name) {
                known += 1;
            } else {
                self.reject(format!("sequence entry {} names no state, dropped", name));
            }
        }
        if known == 0 {
            self.reject("empty state sequence, using value order".to_string());
        }
        StateTable::new(values, sequence.to_vec())
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file
    ///
    /// # Example
    /// ```no_run
    /// use setu_can::config::BridgeConfig;
    ///
    /// let config = BridgeConfig::from_file("setu-can.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Check every value, substituting defaults for invalid ones
    pub fn validated(&self) -> ValidatedConfig {
        let mut v = Validator { issues: Vec::new() };

        let link = LinkSettings {
            baud_rate: v.baud_rate(self.serial.baud_rate),
            bitrate: v.bitrate(&self.serial.bitrate_code),
            rx_filter_id: v.rx_filter(&self.can.rx_filter_id),
            periodic_frames: v.periodic_frames(&self.can.periodic_frames),
            rx_poll_interval: RX_POLL_INTERVAL,
        };

        let c = &self.control;
        let states = v.states(&self.mission.states, &self.mission.sequence);
        let control = ControlSettings {
            mode: v.mode(&c.mode),
            limits: ManualLimits {
                deadband: v.deadband(c.deadband),
                steer_max: v.non_negative("steer_max", c.steer_max, default_steer_max()),
                speed_max: v.non_negative("speed_max", c.speed_max, default_speed_max()),
                brake_max: v.non_negative("brake_max", c.brake_max, default_brake_max()),
            },
            drive_torque: c.drive_torque,
            stop_button: v.button("stop_button", c.stop_button, default_stop_button()),
            states: states.as_values(),
        };

        ValidatedConfig {
            port: self.serial.port.clone(),
            link,
            control,
            states,
            sequencer_interval: v.interval("mission", self.mission.interval_ms),
            transition_button: v.button(
                "transition_button",
                self.mission.transition_button,
                default_transition_button(),
            ),
            issues: v.issues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.serial.port, "/dev/ttyACM0");
        assert_eq!(config.serial.baud_rate, 2_000_000);
        assert_eq!(config.can.periodic_frames.len(), 4);

        let validated = config.validated();
        assert!(validated.issues.is_empty(), "{:?}", validated.issues);
        assert_eq!(validated.link.rx_filter_id, 0x520);
        assert_eq!(validated.link.bitrate, BitrateCode::DEFAULT);
        assert_eq!(validated.control.mode, ControlMode::State);
        assert_eq!(validated.transition_button, 1);
        assert_eq!(
            validated.link.periodic_frames[1],
            PeriodicFrame {
                id: 0x512,
                interval: Duration::from_millis(20)
            }
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: BridgeConfig = toml::from_str(
            r#"
[serial]
port = "/dev/ttyUSB0"

[control]
mode = "raw"
steer_max = 250.0
"#,
        )
        .unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.bitrate_code, "6");
        assert_eq!(config.control.speed_max, 4000.0);
        assert_eq!(config.mission.sequence.len(), 6);

        let validated = config.validated();
        assert_eq!(validated.control.mode, ControlMode::Raw);
        assert_eq!(validated.control.limits.steer_max, 250.0);
    }

    #[test]
    fn test_invalid_values_replaced() {
        let config: BridgeConfig = toml::from_str(
            r#"
[serial]
baud_rate = 9600
bitrate_code = "9"

[can]
rx_filter_id = "0x900"
periodic_frames = [
    { id = "0x510", interval_ms = 0 },
    { id = "zz", interval_ms = 20 },
    { id = "513", interval_ms = 50 },
]

[control]
mode = "autopilot"
deadband = 1.5
stop_button = 7
"#,
        )
        .unwrap();

        let validated = config.validated();
        assert_eq!(validated.link.baud_rate, 2_000_000);
        assert_eq!(validated.link.bitrate, BitrateCode::DEFAULT);
        assert_eq!(validated.link.rx_filter_id, 0x520);
        assert_eq!(
            validated.link.periodic_frames,
            vec![
                PeriodicFrame {
                    id: 0x510,
                    interval: Duration::from_millis(20)
                },
                PeriodicFrame {
                    id: 0x513,
                    interval: Duration::from_millis(50)
                },
            ]
        );
        assert_eq!(validated.control.mode, ControlMode::State);
        assert_eq!(validated.control.limits.deadband, 0.05);
        assert_eq!(validated.control.stop_button, 0);
        assert_eq!(validated.issues.len(), 8);
        assert!(validated.issues.iter().all(|e| matches!(e, Error::ConfigValidation(_))));
    }

    #[test]
    fn test_empty_frame_list_is_kept() {
        let config: BridgeConfig = toml::from_str("[can]\nperiodic_frames = []\n").unwrap();
        let validated = config.validated();
        assert!(validated.link.periodic_frames.is_empty());
        assert!(validated.issues.is_empty());
    }

    #[test]
    fn test_mission_states() {
        let config: BridgeConfig = toml::from_str(
            r#"
[mission]
states = { AS_OFF = 10, AS_READY = 20, AS_DRIVING = 30, BAD = 300 }
sequence = ["AS_READY", "MISSING", "AS_DRIVING"]
"#,
        )
        .unwrap();
        let validated = config.validated();
        assert_eq!(
            validated.describe_states(),
            "20ms, btn#1, AS_READY=20, AS_DRIVING=30"
        );
        assert_eq!(validated.control.states.driving, 30);
        assert_eq!(validated.control.states.init, 0);
        assert_eq!(validated.issues.len(), 2);
    }

    #[test]
    fn test_empty_states_fall_back() {
        let config: BridgeConfig = toml::from_str("[mission]\nstates = {}\n").unwrap();
        let validated = config.validated();
        assert_eq!(validated.states, StateTable::default());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("setu-can.toml");

        let mut config = BridgeConfig::default();
        config.serial.port = "COM7".to_string();
        config.control.mode = "raw".to_string();
        config.to_file(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("[serial]"));
        assert!(text.contains("[[can.periodic_frames]]"));

        let loaded = BridgeConfig::from_file(&path).unwrap();
        assert_eq!(loaded.serial.port, "COM7");
        assert_eq!(loaded.control.mode, "raw");
        assert_eq!(loaded.can.periodic_frames, config.can.periodic_frames);
        assert_eq!(loaded.mission.states, config.mission.states);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let result = BridgeConfig::from_file(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_describe() {
        let validated = BridgeConfig::default().validated();
        let line = validated.describe();
        assert!(line.contains("/dev/ttyACM0 @ 2000000 baud"));
        assert!(line.contains("0x510@20ms"));
        assert!(line.contains("state mode"));
    }
}
