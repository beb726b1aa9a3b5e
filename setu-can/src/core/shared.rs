//! Process-wide state shared between the link, scheduler, gamepad poller and
//! control ticker.
//!
//! Single-writer discipline:
//! - `mission`: written only by the link read thread (status frame decode)
//! - `control`, `mission_timer_ms`: written only by the control ticker
//! - `tx_state`: written only by the state sequencer
//! - `inputs`, `last_event`: written only by the gamepad poller
//!
//! Readers take copies; no cross-field atomicity is assumed.

use super::types::{ControlVector, GamepadInputs, MissionState};
use crate::telemetry::{Telemetry, TelemetrySnapshot};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

/// Generic payload bytes 0..=6 (last gamepad event)
pub type EventBytes = [u8; 7];

/// Shared context handed to every component by `Arc`
#[derive(Debug, Default)]
pub struct SharedContext {
    mission: Mutex<MissionState>,
    control: Mutex<ControlVector>,
    mission_timer_ms: AtomicU32,
    tx_state: AtomicU8,
    inputs: Mutex<GamepadInputs>,
    last_event: Mutex<EventBytes>,
    pub telemetry: Telemetry,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Decoded receive state (writer: link)
    // ========================================================================

    #[inline]
    pub fn mission(&self) -> MissionState {
        *self.mission.lock()
    }

    pub fn set_mission(&self, state: MissionState) {
        *self.mission.lock() = state;
    }

    // ========================================================================
    // Control outputs (writer: control ticker)
    // ========================================================================

    #[inline]
    pub fn control(&self) -> ControlVector {
        *self.control.lock()
    }

    pub fn set_control(&self, control: ControlVector) {
        *self.control.lock() = control;
    }

    #[inline]
    pub fn mission_timer_ms(&self) -> u32 {
        self.mission_timer_ms.load(Ordering::Relaxed)
    }

    pub fn advance_mission_timer(&self, tick_ms: u32) -> u32 {
        self.mission_timer_ms
            .fetch_add(tick_ms, Ordering::Relaxed)
            .saturating_add(tick_ms)
    }

    pub fn reset_mission_timer(&self) {
        self.mission_timer_ms.store(0, Ordering::Relaxed);
    }

    /// State byte carried in byte 7 of the generic payload
    #[inline]
    pub fn tx_state(&self) -> u8 {
        self.tx_state.load(Ordering::Relaxed)
    }

    pub fn set_tx_state(&self, state: u8) {
        self.tx_state.store(state, Ordering::Relaxed);
    }

    // ========================================================================
    // Gamepad (writer: gamepad poller)
    // ========================================================================

    #[inline]
    pub fn inputs(&self) -> GamepadInputs {
        *self.inputs.lock()
    }

    pub fn set_inputs(&self, inputs: GamepadInputs) {
        *self.inputs.lock() = inputs;
    }

    #[inline]
    pub fn last_event(&self) -> EventBytes {
        *self.last_event.lock()
    }

    pub fn set_last_event(&self, bytes: EventBytes) {
        *self.last_event.lock() = bytes;
    }

    /// Copy of everything observable
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot::capture(
            &self.telemetry,
            self.mission(),
            self.control(),
            self.mission_timer_ms(),
        )
    }
}
