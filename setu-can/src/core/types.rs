//! Core data types shared by the codec, link, controller and scheduler.
//!
//! Key types:
//! - [`CanFrame`]: an 11-bit standard frame with 0..=8 payload bytes
//! - [`MissionState`]: decoded from the VCU status frame
//! - [`ControlVector`]: computed by the control logic, packed into outgoing frames
//! - [`GamepadSnapshot`] / [`GamepadInputs`]: controller state as polled and as consumed

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Highest valid standard (11-bit) CAN identifier
pub const MAX_STANDARD_ID: u16 = 0x7FF;

/// Maximum classic CAN payload length
pub const MAX_DLC: usize = 8;

/// Standard CAN data frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u16,
    pub data: Vec<u8>,
}

impl CanFrame {
    /// Create a frame, truncating the payload to 8 bytes.
    ///
    /// Returns `None` for ids above 0x7FF.
    pub fn new(id: u16, data: &[u8]) -> Option<Self> {
        if id > MAX_STANDARD_ID {
            return None;
        }
        let dlc = data.len().min(MAX_DLC);
        Some(Self {
            id,
            data: data[..dlc].to_vec(),
        })
    }

    /// Data length code
    #[inline]
    pub fn dlc(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Display for CanFrame {
    /// `0x520 01 08 23`, or `0x520 (empty)` for DLC 0
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:03X} {}", self.id, format_payload(&self.data))
    }
}

/// Space separated uppercase hex, `(empty)` for no bytes
pub fn format_payload(data: &[u8]) -> String {
    if data.is_empty() {
        return "(empty)".to_string();
    }
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Periodic transmission entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicFrame {
    pub id: u16,
    pub interval: Duration,
}

/// State decoded from the VCU2AI status frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MissionState {
    pub handshake: bool,
    pub go_signal: bool,
    /// Autonomous system state (0..=15)
    pub as_state: u8,
    /// Autonomous mission indicator (0..=15)
    pub ami_state: u8,
}

/// Outgoing control request computed every control tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ControlVector {
    pub mission_status: u8,
    pub steer: i32,
    pub speed: i32,
    pub torque: i32,
    pub brake: i32,
    pub direction: u8,
    pub estop: u8,
}

impl ControlVector {
    /// All requests zero
    pub const NEUTRAL: ControlVector = ControlVector {
        mission_status: 0,
        steer: 0,
        speed: 0,
        torque: 0,
        brake: 0,
        direction: 0,
        estop: 0,
    };

    /// Torque may be applied
    pub fn allow_torque(&self) -> bool {
        self.torque > 0 && self.estop == 0
    }

    /// Mission finished flag
    pub fn finish_requested(&self) -> bool {
        self.mission_status == 3
    }

    /// Emergency stop raised
    pub fn emergency_active(&self) -> bool {
        self.estop != 0
    }
}

/// One gamepad button
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ButtonState {
    pub pressed: bool,
    /// Analog value in [0, 1]
    pub value: f32,
}

impl ButtonState {
    pub fn new(pressed: bool, value: f32) -> Self {
        Self { pressed, value }
    }
}

/// Full state of one controller at one poll
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GamepadSnapshot {
    /// Axis values in [-1, 1]
    pub axes: Vec<f32>,
    pub buttons: Vec<ButtonState>,
}

impl GamepadSnapshot {
    pub fn new(axes: Vec<f32>, buttons: Vec<ButtonState>) -> Self {
        Self { axes, buttons }
    }

    /// Axis value, 0.0 when the axis does not exist
    #[inline]
    pub fn axis(&self, index: usize) -> f32 {
        self.axes.get(index).copied().unwrap_or(0.0)
    }

    /// Button pressed flag, false when the button does not exist
    #[inline]
    pub fn pressed(&self, index: usize) -> bool {
        self.buttons.get(index).map(|b| b.pressed).unwrap_or(false)
    }
}

/// Number of designated buttons tracked for edges
pub const TRACKED_BUTTONS: usize = 4;

/// Controller inputs consumed by the control logic (primary pad)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GamepadInputs {
    /// Primary steering axis (axis 0)
    pub x: f32,
    /// Secondary steering axis (axis 2)
    pub x2: f32,
    /// Throttle/brake axis (axis 1), negative is forward
    pub y: f32,
    /// Instantaneous pressed state of buttons 0..=3
    pub buttons: [bool; TRACKED_BUTTONS],
    /// Rising-edge counters of buttons 0..=3; monotonically non-decreasing
    pub press_counts: [u32; TRACKED_BUTTONS],
}

/// Microseconds since the Unix epoch
#[inline]
pub fn timestamp_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_truncates_payload() {
        let frame = CanFrame::new(0x123, &[0; 12]).unwrap();
        assert_eq!(frame.dlc(), 8);
    }

    #[test]
    fn test_frame_rejects_extended_id() {
        assert!(CanFrame::new(0x800, &[]).is_none());
        assert!(CanFrame::new(0x7FF, &[]).is_some());
    }

    #[test]
    fn test_frame_display() {
        let frame = CanFrame::new(0x520, &[0x01, 0x08, 0x23]).unwrap();
        assert_eq!(frame.to_string(), "0x520 01 08 23");
        let empty = CanFrame::new(0x5, &[]).unwrap();
        assert_eq!(empty.to_string(), "0x005 (empty)");
    }

    #[test]
    fn test_control_vector_flags() {
        let mut cv = ControlVector::NEUTRAL;
        assert!(!cv.allow_torque());
        cv.torque = 1950;
        assert!(cv.allow_torque());
        cv.estop = 1;
        assert!(!cv.allow_torque());
        assert!(cv.emergency_active());
        cv.mission_status = 3;
        assert!(cv.finish_requested());
    }

    #[test]
    fn test_snapshot_missing_controls() {
        let snap = GamepadSnapshot::new(vec![0.5], vec![ButtonState::new(true, 1.0)]);
        assert_eq!(snap.axis(0), 0.5);
        assert_eq!(snap.axis(3), 0.0);
        assert!(snap.pressed(0));
        assert!(!snap.pressed(2));
    }
}
