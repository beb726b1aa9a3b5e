//! Raw manual control
//!
//! Ignores the received AS/AMI pair. Sticks map straight to steer/speed/brake;
//! four buttons latch the remaining requests. Button actions are driven by
//! press counters rather than pressed state, so every counted press is
//! replayed exactly once even when several land between evaluations.

use super::axis::{ManualLimits, manual_drive};
use super::{ControlLogic, ControlOutput};
use crate::core::types::{ControlVector, GamepadInputs, MissionState, TRACKED_BUTTONS};
use crate::telemetry::MissionLabel;

/// Raw-mode mission status cycle, unrelated to the state-mode values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum RawMissionStep {
    #[default]
    Idle = 0,
    Selected = 1,
    Driving = 2,
    Finished = 3,
}

impl RawMissionStep {
    /// 0 -> 1 -> 2 -> 3 -> 0
    pub fn next(self) -> Self {
        match self {
            Self::Idle => Self::Selected,
            Self::Selected => Self::Driving,
            Self::Driving => Self::Finished,
            Self::Finished => Self::Idle,
        }
    }
}

/// Latched raw-mode control
#[derive(Debug, Clone)]
pub struct RawManualControl {
    limits: ManualLimits,
    drive_torque: i32,
    step: RawMissionStep,
    direction: u8,
    estop: u8,
    torque: i32,
    /// Press count already applied, per button
    watermarks: [u32; TRACKED_BUTTONS],
}

impl RawManualControl {
    /// Presses counted before `initial_counts` are never replayed
    pub fn new(limits: ManualLimits, drive_torque: i32, initial_counts: [u32; TRACKED_BUTTONS]) -> Self {
        Self {
            limits,
            drive_torque,
            step: RawMissionStep::Idle,
            direction: 0,
            estop: 0,
            torque: 0,
            watermarks: initial_counts,
        }
    }

    pub fn step(&self) -> RawMissionStep {
        self.step
    }

    fn apply_press(&mut self, button: usize) {
        match button {
            0 => self.step = self.step.next(),
            1 => self.direction ^= 1,
            2 => self.estop ^= 1,
            3 => {
                self.torque = if self.torque == self.drive_torque {
                    0
                } else {
                    self.drive_torque
                };
            }
            _ => {}
        }
    }

    /// Replay every press counted since the last evaluation
    fn replay_presses(&mut self, counts: &[u32; TRACKED_BUTTONS]) {
        for button in 0..TRACKED_BUTTONS {
            while self.watermarks[button] < counts[button] {
                self.apply_press(button);
                self.watermarks[button] += 1;
            }
        }
    }
}

impl ControlLogic for RawManualControl {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn ticks_mission_timer(&self, _mission: &MissionState) -> bool {
        false
    }

    fn evaluate(
        &mut self,
        _mission: &MissionState,
        inputs: &GamepadInputs,
        _timer_ms: u32,
    ) -> ControlOutput {
        self.replay_presses(&inputs.press_counts);
        let drive = manual_drive(inputs, &self.limits);

        ControlOutput {
            control: ControlVector {
                mission_status: self.step as u8,
                steer: drive.steer,
                speed: drive.speed,
                torque: self.torque,
                brake: drive.brake,
                direction: self.direction,
                estop: self.estop,
            },
            label: MissionLabel {
                label: "RAW_MANUAL".to_string(),
                status_text: "Raw manual latched control".to_string(),
                ready_to_drive: self.step != RawMissionStep::Idle,
            },
            reset_timer: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presses(counts: [u32; 4]) -> GamepadInputs {
        GamepadInputs {
            press_counts: counts,
            ..Default::default()
        }
    }

    #[test]
    fn test_counter_jump_replays_each_press() {
        let mut logic = RawManualControl::new(ManualLimits::default(), 1950, [0; 4]);
        let m = MissionState::default();

        let out = logic.evaluate(&m, &presses([3, 0, 0, 0]), 0);
        assert_eq!(out.control.mission_status, 3);

        // Same count again: no replay
        let out = logic.evaluate(&m, &presses([3, 0, 0, 0]), 0);
        assert_eq!(out.control.mission_status, 3);

        let out = logic.evaluate(&m, &presses([4, 0, 0, 0]), 0);
        assert_eq!(out.control.mission_status, 0);
    }

    #[test]
    fn test_toggles() {
        let mut logic = RawManualControl::new(ManualLimits::default(), 1950, [0; 4]);
        let m = MissionState::default();

        let out = logic.evaluate(&m, &presses([0, 1, 1, 1]), 0);
        assert_eq!(out.control.direction, 1);
        assert_eq!(out.control.estop, 1);
        assert_eq!(out.control.torque, 1950);
        assert!(!out.control.allow_torque());

        // Two more presses of each: back to the same state
        let out = logic.evaluate(&m, &presses([0, 3, 3, 3]), 0);
        assert_eq!(out.control.direction, 1);
        assert_eq!(out.control.estop, 1);
        assert_eq!(out.control.torque, 1950);

        let out = logic.evaluate(&m, &presses([0, 4, 4, 4]), 0);
        assert_eq!((out.control.direction, out.control.estop, out.control.torque), (0, 0, 0));
    }

    #[test]
    fn test_initial_counts_not_replayed() {
        let mut logic = RawManualControl::new(ManualLimits::default(), 1950, [5, 2, 0, 0]);
        let out = logic.evaluate(&MissionState::default(), &presses([5, 2, 0, 0]), 0);
        assert_eq!(out.control.mission_status, 0);
        assert_eq!(out.control.direction, 0);
    }

    #[test]
    fn test_ignores_received_state() {
        let mut logic = RawManualControl::new(ManualLimits::default(), 1950, [0; 4]);
        let m = MissionState {
            as_state: 3,
            ami_state: 5,
            ..Default::default()
        };
        let inputs = GamepadInputs {
            y: -1.0,
            ..Default::default()
        };
        let out = logic.evaluate(&m, &inputs, 5000);
        assert_eq!(out.control.speed, 4000);
        assert_eq!(out.label.label, "RAW_MANUAL");
        assert!(!out.label.ready_to_drive);
        assert!(out.reset_timer);
        assert!(!logic.ticks_mission_timer(&m));
    }

    #[test]
    fn test_step_cycle() {
        let mut step = RawMissionStep::Idle;
        let seen: Vec<u8> = (0..5)
            .map(|_| {
                step = step.next();
                step as u8
            })
            .collect();
        assert_eq!(seen, vec![1, 2, 3, 0, 1]);
    }
}
