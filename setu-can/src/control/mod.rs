//! Mission control logic
//!
//! Two interchangeable controllers share the [`ControlLogic`] contract:
//! - [`StateDrivenControl`]: switches on the received AS/AMI pair
//! - [`RawManualControl`]: gamepad-latched, ignores received state
//!
//! One is chosen from the config at startup and never swapped mid-run.
//! [`control_tick`] runs one evaluation against the shared context.

pub mod axis;
mod raw;
pub mod sequence;
mod state;

pub use axis::{ManualLimits, dual_input_conflict, manual_drive, normalize_axis};
pub use raw::{RawManualControl, RawMissionStep};
pub use sequence::{AsValues, StateSequencer, StateTable};
pub use state::{MissionStatus, Phase, StateDrivenControl, phase_at};

use crate::core::SharedContext;
use crate::core::types::{ControlVector, GamepadInputs, MissionState};
use crate::error::{Error, Result};
use crate::telemetry::MissionLabel;
use std::fmt;
use std::str::FromStr;

/// Mission control tick period (ms)
pub const CONTROL_TICK_MS: u32 = 10;

/// Result of one evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlOutput {
    pub control: ControlVector,
    pub label: MissionLabel,
    /// Zero the mission timer after this tick
    pub reset_timer: bool,
}

/// Computes the control vector from received state and gamepad inputs
pub trait ControlLogic: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Whether the mission timer advances this tick
    fn ticks_mission_timer(&self, mission: &MissionState) -> bool;

    fn evaluate(
        &mut self,
        mission: &MissionState,
        inputs: &GamepadInputs,
        timer_ms: u32,
    ) -> ControlOutput;
}

/// Which controller runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ControlMode {
    #[default]
    State,
    Raw,
}

impl FromStr for ControlMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "state" => Ok(Self::State),
            "raw" => Ok(Self::Raw),
            other => Err(Error::ConfigValidation(format!(
                "Unknown control mode '{}' (expected state or raw)",
                other
            ))),
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State => write!(f, "state"),
            Self::Raw => write!(f, "raw"),
        }
    }
}

/// Everything needed to build a controller
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSettings {
    pub mode: ControlMode,
    pub limits: ManualLimits,
    pub drive_torque: i32,
    pub stop_button: usize,
    pub states: AsValues,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            mode: ControlMode::State,
            limits: ManualLimits::default(),
            drive_torque: 1950,
            stop_button: 0,
            states: AsValues::default(),
        }
    }
}

/// Build the configured controller; raw mode starts its watermarks at the
/// current press counts
pub fn create_logic(settings: &ControlSettings, ctx: &SharedContext) -> Box<dyn ControlLogic> {
    match settings.mode {
        ControlMode::State => Box::new(StateDrivenControl::new(
            settings.states,
            settings.limits,
            settings.drive_torque,
            settings.stop_button,
        )),
        ControlMode::Raw => Box::new(RawManualControl::new(
            settings.limits,
            settings.drive_torque,
            ctx.inputs().press_counts,
        )),
    }
}

/// One control tick: advance the timer, evaluate, publish
pub fn control_tick(logic: &mut dyn ControlLogic, ctx: &SharedContext, tick_ms: u32) -> ControlVector {
    let mission = ctx.mission();
    let inputs = ctx.inputs();

    let timer_ms = if logic.ticks_mission_timer(&mission) {
        ctx.advance_mission_timer(tick_ms)
    } else {
        ctx.mission_timer_ms()
    };

    let output = logic.evaluate(&mission, &inputs, timer_ms);
    if output.reset_timer {
        ctx.reset_mission_timer();
    }

    ctx.set_control(output.control);
    ctx.telemetry.set_mission_label(output.label);
    ctx.telemetry
        .set_dual_input_warning(dual_input_conflict(&inputs));
    output.control
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::state::AMI_STATIC_A;

    #[test]
    fn test_mode_parse() {
        assert_eq!("state".parse::<ControlMode>().unwrap(), ControlMode::State);
        assert_eq!(" RAW ".parse::<ControlMode>().unwrap(), ControlMode::Raw);
        assert!("auto".parse::<ControlMode>().is_err());
    }

    #[test]
    fn test_tick_advances_timer_while_driving() {
        let ctx = SharedContext::new();
        ctx.set_mission(MissionState {
            as_state: 3,
            ami_state: AMI_STATIC_A,
            ..Default::default()
        });
        let mut logic = create_logic(&ControlSettings::default(), &ctx);

        // 150 ticks of 10ms = 1500ms: steer right phase
        let mut control = ControlVector::NEUTRAL;
        for _ in 0..150 {
            control = control_tick(logic.as_mut(), &ctx, CONTROL_TICK_MS);
        }
        assert_eq!(ctx.mission_timer_ms(), 1500);
        assert_eq!(control.steer, 250);
        assert_eq!(ctx.control(), control);
        assert_eq!(
            ctx.telemetry.mission_label().status_text,
            "Static A: steer right"
        );

        // Leaving DRIVING resets the timer
        ctx.set_mission(MissionState {
            as_state: 2,
            ami_state: AMI_STATIC_A,
            ..Default::default()
        });
        control_tick(logic.as_mut(), &ctx, CONTROL_TICK_MS);
        assert_eq!(ctx.mission_timer_ms(), 0);
    }

    #[test]
    fn test_raw_mode_holds_timer_at_zero() {
        let ctx = SharedContext::new();
        ctx.set_mission(MissionState {
            as_state: 3,
            ami_state: AMI_STATIC_A,
            ..Default::default()
        });
        let settings = ControlSettings {
            mode: ControlMode::Raw,
            ..Default::default()
        };
        let mut logic = create_logic(&settings, &ctx);
        assert_eq!(logic.name(), "raw");
        for _ in 0..10 {
            control_tick(logic.as_mut(), &ctx, CONTROL_TICK_MS);
        }
        assert_eq!(ctx.mission_timer_ms(), 0);
        assert_eq!(ctx.telemetry.mission_label().label, "RAW_MANUAL");
    }

    #[test]
    fn test_tick_publishes_dual_input_warning() {
        let ctx = SharedContext::new();
        ctx.set_inputs(GamepadInputs {
            x: 0.9,
            x2: -0.9,
            ..Default::default()
        });
        let mut logic = create_logic(&ControlSettings::default(), &ctx);
        control_tick(logic.as_mut(), &ctx, CONTROL_TICK_MS);
        assert!(ctx.telemetry.dual_input_warning());
    }
}
