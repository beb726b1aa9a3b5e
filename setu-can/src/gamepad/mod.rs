//! Gamepad change detection
//!
//! [`GamepadDiffEngine`] keeps the previous snapshot per pad index and turns
//! each poll into discrete events, each of which fits the first seven bytes
//! of the generic CAN payload:
//!
//! ```text
//! [event_type, pad_index, control_index, d0, d1, d2, d3]
//!
//! Connect    0x01  ctrl=0xFF  d0=buttons  d1=axes
//! Disconnect 0x02  ctrl=0xFF  d0=buttons  d1=axes  (last known counts)
//! Button     0x10  ctrl=n     d0=pressed  d1=round(value*255)
//! Axis       0x20  ctrl=n     d0..d1=i16 LE of round(value*32767)
//! ```
//!
//! A newly seen pad produces only its connect event; button and axis
//! changes are reported from the next poll on.

mod source;

pub use source::{GamepadSource, NoGamepad, PadList, ScriptedGamepad};

use crate::core::shared::EventBytes;
use crate::core::types::{GamepadInputs, GamepadSnapshot, TRACKED_BUTTONS};
use std::collections::BTreeMap;

/// Gamepad poll period (ms)
pub const GAMEPAD_POLL_MS: u64 = 10;

/// Minimum analog button change that produces an event
pub const BUTTON_EPSILON: f32 = 0.02;

/// Minimum axis change that produces an event
pub const AXIS_EPSILON: f32 = 0.04;

/// Control index used by connect/disconnect events
const WHOLE_PAD: u8 = 0xFF;

/// One discrete controller change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamepadEvent {
    Connect { pad: u8, buttons: u8, axes: u8 },
    Disconnect { pad: u8, buttons: u8, axes: u8 },
    Button { pad: u8, index: u8, pressed: bool, value: u8 },
    Axis { pad: u8, index: u8, value: i16 },
}

impl GamepadEvent {
    pub const CONNECT: u8 = 0x01;
    pub const DISCONNECT: u8 = 0x02;
    pub const BUTTON: u8 = 0x10;
    pub const AXIS: u8 = 0x20;

    /// Seven-byte wire form
    pub fn to_bytes(&self) -> EventBytes {
        match *self {
            Self::Connect { pad, buttons, axes } => {
                [Self::CONNECT, pad, WHOLE_PAD, buttons, axes, 0, 0]
            }
            Self::Disconnect { pad, buttons, axes } => {
                [Self::DISCONNECT, pad, WHOLE_PAD, buttons, axes, 0, 0]
            }
            Self::Button {
                pad,
                index,
                pressed,
                value,
            } => [Self::BUTTON, pad, index, pressed as u8, value, 0, 0],
            Self::Axis { pad, index, value } => {
                let [lo, hi] = value.to_le_bytes();
                [Self::AXIS, pad, index, lo, hi, 0, 0]
            }
        }
    }
}

/// Quantize an axis value to a signed 16-bit count
#[inline]
pub fn quantize_axis(value: f32) -> i16 {
    if !value.is_finite() {
        return 0;
    }
    (value.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// Quantize an analog button value to a byte
#[inline]
pub fn quantize_button(value: f32) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Saturate a count or index to one byte
#[inline]
fn byte(n: usize) -> u8 {
    n.min(u8::MAX as usize) as u8
}

/// Output of one poll
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffOutput {
    pub events: Vec<GamepadEvent>,
    /// Primary pad inputs with cumulative press counts
    pub inputs: GamepadInputs,
}

/// Snapshot differencing across every connected pad
#[derive(Debug, Default)]
pub struct GamepadDiffEngine {
    previous: BTreeMap<usize, GamepadSnapshot>,
    press_counts: [u32; TRACKED_BUTTONS],
}

impl GamepadDiffEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connected pad indices
    pub fn connected(&self) -> Vec<usize> {
        self.previous.keys().copied().collect()
    }

    pub fn press_counts(&self) -> [u32; TRACKED_BUTTONS] {
        self.press_counts
    }

    /// Diff `pads` against the previous poll
    pub fn process(&mut self, pads: &[(usize, GamepadSnapshot)]) -> DiffOutput {
        let mut events = Vec::new();

        for (index, current) in pads {
            let pad = byte(*index);
            match self.previous.get(index) {
                None => {
                    events.push(GamepadEvent::Connect {
                        pad,
                        buttons: byte(current.buttons.len()),
                        axes: byte(current.axes.len()),
                    });
                }
                Some(previous) => {
                    diff_buttons(pad, previous, current, &mut self.press_counts, &mut events);
                    diff_axes(pad, previous, current, &mut events);
                }
            }
            self.previous.insert(*index, current.clone());
        }

        let gone: Vec<usize> = self
            .previous
            .keys()
            .filter(|i| !pads.iter().any(|(p, _)| p == *i))
            .copied()
            .collect();
        for index in gone {
            if let Some(last) = self.previous.remove(&index) {
                events.push(GamepadEvent::Disconnect {
                    pad: byte(index),
                    buttons: byte(last.buttons.len()),
                    axes: byte(last.axes.len()),
                });
            }
        }

        DiffOutput {
            events,
            inputs: self.primary_inputs(pads),
        }
    }

    /// Inputs from the lowest-index pad; neutral when none is connected
    fn primary_inputs(&self, pads: &[(usize, GamepadSnapshot)]) -> GamepadInputs {
        let mut inputs = GamepadInputs {
            press_counts: self.press_counts,
            ..Default::default()
        };
        let Some((_, primary)) = pads.iter().min_by_key(|(i, _)| *i) else {
            return inputs;
        };

        let finite = |v: f32| if v.is_finite() { v } else { 0.0 };
        inputs.x = finite(primary.axis(0));
        inputs.y = finite(primary.axis(1));
        inputs.x2 = finite(primary.axis(2));
        for (i, pressed) in inputs.buttons.iter_mut().enumerate() {
            *pressed = primary.pressed(i);
        }
        inputs
    }
}

fn diff_buttons(
    pad: u8,
    previous: &GamepadSnapshot,
    current: &GamepadSnapshot,
    press_counts: &mut [u32; TRACKED_BUTTONS],
    events: &mut Vec<GamepadEvent>,
) {
    for (i, button) in current.buttons.iter().enumerate() {
        let before = previous.buttons.get(i).copied().unwrap_or_default();
        let pressed_changed = button.pressed != before.pressed;
        let analog_changed = (button.value - before.value).abs() >= BUTTON_EPSILON;
        if !pressed_changed && !analog_changed {
            continue;
        }

        if button.pressed && !before.pressed {
            if let Some(count) = press_counts.get_mut(i) {
                *count = count.saturating_add(1);
            }
        }
        events.push(GamepadEvent::Button {
            pad,
            index: byte(i),
            pressed: button.pressed,
            value: quantize_button(button.value),
        });
    }
}

fn diff_axes(
    pad: u8,
    previous: &GamepadSnapshot,
    current: &GamepadSnapshot,
    events: &mut Vec<GamepadEvent>,
) {
    for (i, &value) in current.axes.iter().enumerate() {
        let before = previous.axis(i);
        if (value - before).abs() < AXIS_EPSILON {
            continue;
        }
        events.push(GamepadEvent::Axis {
            pad,
            index: byte(i),
            value: quantize_axis(value),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ButtonState;

    fn pad(axes: &[f32], buttons: &[(bool, f32)]) -> GamepadSnapshot {
        GamepadSnapshot::new(
            axes.to_vec(),
            buttons.iter().map(|&(p, v)| ButtonState::new(p, v)).collect(),
        )
    }

    fn idle() -> GamepadSnapshot {
        pad(&[0.0; 4], &[(false, 0.0); 4])
    }

    #[test]
    fn test_connect_then_disconnect() {
        let mut engine = GamepadDiffEngine::new();
        let out = engine.process(&[(0, idle())]);
        assert_eq!(
            out.events,
            vec![GamepadEvent::Connect {
                pad: 0,
                buttons: 4,
                axes: 4
            }]
        );
        assert_eq!(out.events[0].to_bytes(), [0x01, 0, 0xFF, 4, 4, 0, 0]);

        let out = engine.process(&[]);
        assert_eq!(out.events[0].to_bytes(), [0x02, 0, 0xFF, 4, 4, 0, 0]);
        assert!(engine.connected().is_empty());
    }

    #[test]
    fn test_axis_threshold() {
        let mut engine = GamepadDiffEngine::new();
        engine.process(&[(0, idle())]);

        let mut moved = idle();
        moved.axes[1] = 0.03;
        assert!(engine.process(&[(0, moved.clone())]).events.is_empty());

        moved.axes[1] = -1.0;
        let out = engine.process(&[(0, moved)]);
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].to_bytes(), [0x20, 0, 1, 0x01, 0x80, 0, 0]);
    }

    #[test]
    fn test_axis_bytes() {
        assert_eq!(quantize_axis(1.0).to_le_bytes(), [0xFF, 0x7F]);
        assert_eq!(quantize_axis(-1.0).to_le_bytes(), [0x01, 0x80]);
        assert_eq!(quantize_axis(0.0), 0);
        assert_eq!(quantize_axis(2.0), 32767);
    }

    #[test]
    fn test_button_events_and_press_counts() {
        let mut engine = GamepadDiffEngine::new();
        engine.process(&[(0, idle())]);

        let mut pressed = idle();
        pressed.buttons[2] = ButtonState::new(true, 1.0);
        let out = engine.process(&[(0, pressed.clone())]);
        assert_eq!(out.events[0].to_bytes(), [0x10, 0, 2, 1, 255, 0, 0]);
        assert_eq!(out.inputs.press_counts, [0, 0, 1, 0]);
        assert!(out.inputs.buttons[2]);

        // Held: no new event, no new count
        let out = engine.process(&[(0, pressed)]);
        assert!(out.events.is_empty());
        assert_eq!(out.inputs.press_counts, [0, 0, 1, 0]);

        let out = engine.process(&[(0, idle())]);
        assert_eq!(out.events[0].to_bytes(), [0x10, 0, 2, 0, 0, 0, 0]);
        assert_eq!(out.inputs.press_counts, [0, 0, 1, 0]);
    }

    #[test]
    fn test_analog_button_change() {
        let mut engine = GamepadDiffEngine::new();
        engine.process(&[(0, idle())]);
        let mut trigger = idle();
        trigger.buttons[3] = ButtonState::new(false, 0.5);
        let out = engine.process(&[(0, trigger)]);
        assert_eq!(out.events[0].to_bytes(), [0x10, 0, 3, 0, 128, 0, 0]);
    }

    #[test]
    fn test_presses_counted_on_any_pad() {
        let mut engine = GamepadDiffEngine::new();
        engine.process(&[(0, idle()), (1, idle())]);
        let mut pressed = idle();
        pressed.buttons[0] = ButtonState::new(true, 1.0);
        let out = engine.process(&[(0, idle()), (1, pressed)]);
        assert_eq!(out.inputs.press_counts[0], 1);
        // Primary pad (index 0) is not pressed
        assert!(!out.inputs.buttons[0]);
    }

    #[test]
    fn test_primary_is_lowest_index() {
        let mut engine = GamepadDiffEngine::new();
        let low = pad(&[0.5, -0.25, 0.1], &[(true, 1.0)]);
        let high = pad(&[-1.0, 1.0], &[]);
        let out = engine.process(&[(3, high), (1, low)]);
        assert_eq!(out.inputs.x, 0.5);
        assert_eq!(out.inputs.y, -0.25);
        assert_eq!(out.inputs.x2, 0.1);
        assert!(out.inputs.buttons[0]);
        assert!(!out.inputs.buttons[1]);
    }

    #[test]
    fn test_no_pads_is_neutral() {
        let mut engine = GamepadDiffEngine::new();
        let out = engine.process(&[]);
        assert!(out.events.is_empty());
        assert_eq!(out.inputs, GamepadInputs::default());
    }
}
