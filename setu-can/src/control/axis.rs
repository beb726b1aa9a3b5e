//! Dead-band axis mapping for manual driving
//!
//! `|axis| <= deadband` maps to 0; the remaining travel is rescaled to
//! [0, 1] with the sign preserved, so output is continuous at the band edge
//! and full deflection yields exactly the configured maximum.

use crate::core::types::GamepadInputs;

/// Deflection at which both steering sticks count as actively used
pub const DUAL_INPUT_THRESHOLD: f32 = 0.2;

/// Manual mapping limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManualLimits {
    pub deadband: f32,
    pub steer_max: f32,
    pub speed_max: f32,
    pub brake_max: f32,
}

impl Default for ManualLimits {
    fn default() -> Self {
        Self {
            deadband: 0.05,
            steer_max: 300.0,
            speed_max: 4000.0,
            brake_max: 100.0,
        }
    }
}

/// Steer/speed/brake derived from the sticks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManualDrive {
    pub steer: i32,
    pub speed: i32,
    pub brake: i32,
}

/// Clamp, apply dead-band, rescale; result in [-1, 1]
pub fn normalize_axis(value: f32, deadband: f32) -> f32 {
    if !value.is_finite() || !(0.0..1.0).contains(&deadband) {
        return 0.0;
    }
    let clamped = value.clamp(-1.0, 1.0);
    let magnitude = clamped.abs();
    if magnitude <= deadband {
        return 0.0;
    }
    let scaled = ((magnitude - deadband) / (1.0 - deadband)).min(1.0);
    scaled.copysign(clamped)
}

/// Map the primary pad to manual requests.
///
/// Steering uses whichever of X and X2 is deflected further and is inverted
/// (stick right gives a negative request). Y below zero is throttle, above
/// zero is brake.
pub fn manual_drive(inputs: &GamepadInputs, limits: &ManualLimits) -> ManualDrive {
    let x = normalize_axis(inputs.x, limits.deadband);
    let x2 = normalize_axis(inputs.x2, limits.deadband);
    let steer_axis = if x2.abs() > x.abs() { x2 } else { x };

    let forward = normalize_axis(-inputs.y, limits.deadband);
    let braking = normalize_axis(inputs.y, limits.deadband);

    ManualDrive {
        steer: scale(-steer_axis, limits.steer_max),
        speed: if forward > 0.0 { scale(forward, limits.speed_max) } else { 0 },
        brake: if braking > 0.0 { scale(braking, limits.brake_max) } else { 0 },
    }
}

/// Both steering sticks deflected in opposite directions
pub fn dual_input_conflict(inputs: &GamepadInputs) -> bool {
    inputs.x.abs() >= DUAL_INPUT_THRESHOLD
        && inputs.x2.abs() >= DUAL_INPUT_THRESHOLD
        && inputs.x.signum() != inputs.x2.signum()
}

#[inline]
fn scale(normalized: f32, max: f32) -> i32 {
    (normalized * max).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-6;

    #[test]
    fn test_deadband_zeroes_small_input() {
        for v in [-0.05, -0.03, 0.0, 0.02, 0.05] {
            assert_eq!(normalize_axis(v, 0.05), 0.0, "value {}", v);
        }
    }

    #[test]
    fn test_full_deflection_is_unit() {
        assert!((normalize_axis(1.0, 0.05) - 1.0).abs() < EPS);
        assert!((normalize_axis(-1.0, 0.05) + 1.0).abs() < EPS);
        // Out-of-range input is clamped
        assert!((normalize_axis(3.0, 0.05) - 1.0).abs() < EPS);
    }

    #[test]
    fn test_continuous_at_band_edge() {
        let just_outside = normalize_axis(0.050_01, 0.05);
        assert!(just_outside > 0.0 && just_outside < 1e-3);
        let just_outside = normalize_axis(-0.050_01, 0.05);
        assert!(just_outside < 0.0 && just_outside > -1e-3);
    }

    #[test]
    fn test_midpoint_rescaled() {
        // (0.525 - 0.05) / 0.95 = 0.5
        assert!((normalize_axis(0.525, 0.05) - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_non_finite_is_zero() {
        assert_eq!(normalize_axis(f32::NAN, 0.05), 0.0);
    }

    #[test]
    fn test_manual_drive_maxima_and_sign() {
        let limits = ManualLimits::default();
        let inputs = GamepadInputs {
            x: 1.0,
            y: -1.0,
            ..Default::default()
        };
        let drive = manual_drive(&inputs, &limits);
        assert_eq!(drive.steer, -300);
        assert_eq!(drive.speed, 4000);
        assert_eq!(drive.brake, 0);

        let inputs = GamepadInputs {
            x: -1.0,
            y: 1.0,
            ..Default::default()
        };
        let drive = manual_drive(&inputs, &limits);
        assert_eq!(drive.steer, 300);
        assert_eq!(drive.speed, 0);
        assert_eq!(drive.brake, 100);
    }

    #[test]
    fn test_larger_steering_axis_wins() {
        let limits = ManualLimits::default();
        let inputs = GamepadInputs {
            x: 0.3,
            x2: -1.0,
            ..Default::default()
        };
        assert_eq!(manual_drive(&inputs, &limits).steer, 300);
    }

    #[test]
    fn test_centered_sticks_are_neutral() {
        let drive = manual_drive(&GamepadInputs::default(), &ManualLimits::default());
        assert_eq!(drive, ManualDrive::default());
    }

    #[test]
    fn test_dual_input_conflict() {
        let mut inputs = GamepadInputs {
            x: 0.5,
            x2: -0.4,
            ..Default::default()
        };
        assert!(dual_input_conflict(&inputs));
        inputs.x2 = 0.4;
        assert!(!dual_input_conflict(&inputs));
        inputs.x2 = -0.1;
        assert!(!dual_input_conflict(&inputs));
    }
}
