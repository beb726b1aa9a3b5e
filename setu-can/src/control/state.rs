//! State-driven mission control
//!
//! Switches on the AS/AMI pair received from the VCU:
//!
//! | AS            | Behavior                                                 |
//! |---------------|----------------------------------------------------------|
//! | INIT/OFF/READY | outputs zero, mission status = AMI selected, timer reset |
//! | DRIVING       | dispatch on AMI (manual or a timed phase sequence)        |
//! | other         | outputs zero, timer reset                                |
//!
//! Timed sequences are tables of `(until_ms, outputs)` phases evaluated
//! against the mission timer; the last phase has no upper bound.

use super::axis::{ManualLimits, manual_drive};
use super::sequence::AsValues;
use super::{ControlLogic, ControlOutput};
use crate::core::types::{ControlVector, GamepadInputs, MissionState};
use crate::telemetry::MissionLabel;

/// Mission status values sent in state mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MissionStatus {
    /// No mission selected
    NotSelected = 0,
    /// Mission selected / running
    Selected = 1,
    /// Mission finished
    Finished = 3,
}

/// AMI values with a timed sequence
pub const AMI_STATIC_A: u8 = 0x5;
pub const AMI_STATIC_B: u8 = 0x6;
pub const AMI_DYNAMIC: u8 = 0x7;

/// AMI values driven manually from the gamepad
const AMI_MANUAL: std::ops::RangeInclusive<u8> = 0x1..=0x4;

// ============================================================================
// Phase tables
// ============================================================================

/// One timed phase; active while `timer < until_ms`
#[derive(Debug, Clone, Copy)]
pub struct Phase {
    pub until_ms: Option<u32>,
    pub text: &'static str,
    pub mission_status: MissionStatus,
    pub steer: i32,
    pub speed: i32,
    pub torque: i32,
    pub direction: u8,
    pub estop: u8,
}

#[allow(clippy::too_many_arguments)]
const fn phase(
    until_ms: Option<u32>,
    text: &'static str,
    mission_status: MissionStatus,
    steer: i32,
    speed: i32,
    torque: i32,
    direction: u8,
    estop: u8,
) -> Phase {
    Phase {
        until_ms,
        text,
        mission_status,
        steer,
        speed,
        torque,
        direction,
        estop,
    }
}

use MissionStatus::{Finished, Selected};

/// Calibration torque used by every sequence
const SEQ_TORQUE: i32 = 1950;
const SEQ_STEER: i32 = 250;
const SEQ_SPEED: i32 = 700;

pub const STATIC_A: &[Phase] = &[
    phase(Some(1000), "Static A: settle", Selected, 0, 0, SEQ_TORQUE, 1, 0),
    phase(Some(2000), "Static A: steer right", Selected, SEQ_STEER, 0, SEQ_TORQUE, 1, 0),
    phase(Some(4000), "Static A: steer left", Selected, -SEQ_STEER, 0, SEQ_TORQUE, 1, 0),
    phase(Some(5000), "Static A: center", Selected, 0, 0, SEQ_TORQUE, 1, 0),
    phase(Some(7000), "Static A: drive", Selected, 0, SEQ_SPEED, SEQ_TORQUE, 1, 0),
    phase(Some(9000), "Static A: settle", Selected, 0, 0, SEQ_TORQUE, 1, 0),
    phase(None, "Static A: complete", Finished, 0, 0, 0, 0, 0),
];

pub const STATIC_B: &[Phase] = &[
    phase(Some(1000), "Static B: settle", Selected, 0, 0, SEQ_TORQUE, 1, 0),
    phase(Some(3000), "Static B: drive", Selected, 0, SEQ_SPEED, SEQ_TORQUE, 1, 0),
    phase(None, "Static B: estop", Selected, 0, 0, 0, 0, 1),
];

pub const DYNAMIC: &[Phase] = &[
    phase(Some(1000), "Dynamic: settle", Selected, 0, 0, SEQ_TORQUE, 1, 0),
    phase(Some(2000), "Dynamic: steer right", Selected, SEQ_STEER, 0, SEQ_TORQUE, 1, 0),
    phase(Some(4000), "Dynamic: steer left", Selected, -SEQ_STEER, 0, SEQ_TORQUE, 1, 0),
    phase(Some(5000), "Dynamic: center", Selected, 0, 0, SEQ_TORQUE, 1, 0),
    phase(Some(7000), "Dynamic: drive phase 1", Selected, 0, SEQ_SPEED, SEQ_TORQUE, 1, 0),
    phase(Some(9000), "Dynamic: settle", Selected, 0, 0, SEQ_TORQUE, 1, 0),
    phase(Some(11000), "Dynamic: drive phase 2", Selected, 0, SEQ_SPEED, SEQ_TORQUE, 1, 0),
    phase(None, "Dynamic: estop", Selected, 0, 0, 0, 0, 1),
];

/// Phase active at `timer_ms`
pub fn phase_at(phases: &'static [Phase], timer_ms: u32) -> Option<&'static Phase> {
    phases
        .iter()
        .find(|p| p.until_ms.map_or(true, |until| timer_ms < until))
}

impl Phase {
    fn control(&self) -> ControlVector {
        ControlVector {
            mission_status: self.mission_status as u8,
            steer: self.steer,
            speed: self.speed,
            torque: self.torque,
            brake: 0,
            direction: self.direction,
            estop: self.estop,
        }
    }
}

// ============================================================================
// Controller
// ============================================================================

/// AS/AMI switch controller
#[derive(Debug, Clone)]
pub struct StateDrivenControl {
    states: AsValues,
    limits: ManualLimits,
    drive_torque: i32,
    stop_button: usize,
}

impl StateDrivenControl {
    pub fn new(states: AsValues, limits: ManualLimits, drive_torque: i32, stop_button: usize) -> Self {
        Self {
            states,
            limits,
            drive_torque,
            stop_button,
        }
    }

    fn standby(&self, mission: &MissionState, case: &str) -> ControlOutput {
        let selected = mission.ami_state != 0;
        let status = if selected {
            MissionStatus::Selected
        } else {
            MissionStatus::NotSelected
        };
        ControlOutput {
            control: ControlVector {
                mission_status: status as u8,
                ..ControlVector::NEUTRAL
            },
            label: label(
                case,
                mission,
                if selected {
                    "AMI active, mission status set"
                } else {
                    "AMI idle"
                },
                mission.as_state == self.states.ready,
            ),
            reset_timer: true,
        }
    }

    fn manual(&self, mission: &MissionState, inputs: &GamepadInputs) -> ControlOutput {
        let drive = manual_drive(inputs, &self.limits);
        let stop = inputs.buttons.get(self.stop_button).copied().unwrap_or(false);
        let (status, text) = if stop {
            (MissionStatus::Finished, "Manual mission stop request")
        } else {
            (MissionStatus::Selected, "Manual driving request")
        };
        ControlOutput {
            control: ControlVector {
                mission_status: status as u8,
                steer: drive.steer,
                speed: drive.speed,
                torque: self.drive_torque,
                brake: drive.brake,
                direction: 1,
                estop: 0,
            },
            label: label("AS_DRIVING_DEFAULT", mission, text, true),
            reset_timer: false,
        }
    }

    fn sequence(
        &self,
        mission: &MissionState,
        case: &str,
        phases: &'static [Phase],
        timer_ms: u32,
    ) -> ControlOutput {
        match phase_at(phases, timer_ms) {
            Some(p) => ControlOutput {
                control: p.control(),
                label: label(case, mission, p.text, true),
                reset_timer: false,
            },
            None => neutral(case, mission, "Empty phase table", true),
        }
    }
}

impl ControlLogic for StateDrivenControl {
    fn name(&self) -> &'static str {
        "state"
    }

    fn ticks_mission_timer(&self, mission: &MissionState) -> bool {
        mission.as_state == self.states.driving
    }

    fn evaluate(
        &mut self,
        mission: &MissionState,
        inputs: &GamepadInputs,
        timer_ms: u32,
    ) -> ControlOutput {
        let s = self.states;
        let as_state = mission.as_state;

        if as_state == s.init {
            return self.standby(mission, "AS_INIT");
        }
        if as_state == s.off {
            return self.standby(mission, "AS_OFF");
        }
        if as_state == s.ready {
            return self.standby(mission, "AS_READY");
        }
        if as_state != s.driving {
            let mut out = neutral(
                &format!("AS_UNKNOWN_{}", as_state),
                mission,
                "Unknown AS_STATE",
                false,
            );
            out.reset_timer = true;
            return out;
        }

        match mission.ami_state {
            AMI_STATIC_A => self.sequence(mission, "AS_DRIVING_STATIC_A", STATIC_A, timer_ms),
            AMI_STATIC_B => self.sequence(mission, "AS_DRIVING_STATIC_B", STATIC_B, timer_ms),
            AMI_DYNAMIC => self.sequence(mission, "AS_DRIVING_DYNAMIC", DYNAMIC, timer_ms),
            ami if AMI_MANUAL.contains(&ami) => self.manual(mission, inputs),
            ami => neutral(
                &format!("AS_DRIVING_UNKNOWN_AMI_{}", ami),
                mission,
                "Unknown AMI_STATE",
                true,
            ),
        }
    }
}

fn label(case: &str, mission: &MissionState, text: &str, ready_to_drive: bool) -> MissionLabel {
    MissionLabel {
        label: format!("{} (AS {})", case, mission.as_state),
        status_text: text.to_string(),
        ready_to_drive,
    }
}

fn neutral(case: &str, mission: &MissionState, text: &str, ready_to_drive: bool) -> ControlOutput {
    ControlOutput {
        control: ControlVector::NEUTRAL,
        label: label(case, mission, text, ready_to_drive),
        reset_timer: false,
    }
}
