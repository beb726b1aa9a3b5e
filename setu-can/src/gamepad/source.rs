//! Controller backends

use crate::core::types::GamepadSnapshot;
use parking_lot::Mutex;
use std::sync::Arc;

/// Connected pads as `(index, snapshot)` pairs
pub type PadList = Vec<(usize, GamepadSnapshot)>;

/// Something that can be polled for connected controllers
pub trait GamepadSource: Send {
    /// Current state of every connected pad; absent pads are disconnected
    fn poll(&mut self) -> PadList;

    /// Backend name for logs
    fn name(&self) -> &str;
}

/// No controller hardware; always reports zero pads
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGamepad;

impl GamepadSource for NoGamepad {
    fn poll(&mut self) -> PadList {
        Vec::new()
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Pads set from outside (tests, replay tools)
#[derive(Debug, Default, Clone)]
pub struct ScriptedGamepad {
    pads: Arc<Mutex<PadList>>,
}

impl ScriptedGamepad {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the reported pads
    pub fn set(&self, pads: PadList) {
        *self.pads.lock() = pads;
    }

    /// Replace one pad's state, connecting it if needed
    pub fn update(&self, index: usize, snapshot: GamepadSnapshot) {
        let mut pads = self.pads.lock();
        match pads.iter_mut().find(|(i, _)| *i == index) {
            Some((_, current)) => *current = snapshot,
            None => pads.push((index, snapshot)),
        }
    }

    pub fn disconnect(&self, index: usize) {
        self.pads.lock().retain(|(i, _)| *i != index);
    }
}

impl GamepadSource for ScriptedGamepad {
    fn poll(&mut self) -> PadList {
        self.pads.lock().clone()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
