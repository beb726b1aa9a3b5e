//! Named mission states and the operator-stepped local sequencer

use crate::core::types::GamepadInputs;
use std::collections::BTreeMap;

/// Built-in state enumeration, in default sequence order
pub const DEFAULT_STATES: &[(&str, u8)] = &[
    ("AS_INIT", 0),
    ("AS_OFF", 1),
    ("AS_READY", 2),
    ("AS_DRIVING", 3),
    ("AS_FINISHED", 4),
    ("AS_EMERGENCY", 5),
];

/// Named state values plus the activation order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTable {
    values: BTreeMap<String, u8>,
    sequence: Vec<String>,
}

impl StateTable {
    /// Sequence entries without a value are dropped; an empty result falls
    /// back to ascending value order.
    pub fn new(values: BTreeMap<String, u8>, sequence: Vec<String>) -> Self {
        let mut sequence: Vec<String> = sequence
            .into_iter()
            .filter(|name| values.contains_key(name))
            .collect();
        if sequence.is_empty() {
            let mut by_value: Vec<(&String, &u8)> = values.iter().collect();
            by_value.sort_by_key(|(name, value)| (**value, (*name).clone()));
            sequence = by_value.into_iter().map(|(name, _)| name.clone()).collect();
        }
        Self { values, sequence }
    }

    pub fn value(&self, name: &str) -> Option<u8> {
        self.values.get(name).copied()
    }

    pub fn values(&self) -> &BTreeMap<String, u8> {
        &self.values
    }

    pub fn sequence(&self) -> &[String] {
        &self.sequence
    }

    /// `AS_INIT=0, AS_OFF=1, ...` in sequence order
    pub fn describe(&self) -> String {
        self.sequence
            .iter()
            .filter_map(|name| self.value(name).map(|v| format!("{}={}", name, v)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Resolve the AS values the controller switches on
    pub fn as_values(&self) -> AsValues {
        let defaults = AsValues::default();
        AsValues {
            init: self.value("AS_INIT").unwrap_or(defaults.init),
            off: self.value("AS_OFF").unwrap_or(defaults.off),
            ready: self.value("AS_READY").unwrap_or(defaults.ready),
            driving: self.value("AS_DRIVING").unwrap_or(defaults.driving),
        }
    }
}

impl Default for StateTable {
    fn default() -> Self {
        let values = DEFAULT_STATES
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect();
        let sequence = DEFAULT_STATES.iter().map(|(name, _)| name.to_string()).collect();
        Self::new(values, sequence)
    }
}

/// AS_STATE values the state-driven controller dispatches on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsValues {
    pub init: u8,
    pub off: u8,
    pub ready: u8,
    pub driving: u8,
}

impl Default for AsValues {
    fn default() -> Self {
        Self {
            init: 0,
            off: 1,
            ready: 2,
            driving: 3,
        }
    }
}

/// Steps through the state sequence on rising edges of one button
#[derive(Debug)]
pub struct StateSequencer {
    table: StateTable,
    button: usize,
    index: usize,
    was_pressed: bool,
}

impl StateSequencer {
    pub fn new(table: StateTable, button: usize) -> Self {
        Self {
            table,
            button,
            index: 0,
            was_pressed: false,
        }
    }

    pub fn current_name(&self) -> &str {
        self.table
            .sequence()
            .get(self.index)
            .map(String::as_str)
            .unwrap_or("AS_INIT")
    }

    pub fn current_value(&self) -> u8 {
        self.table.value(self.current_name()).unwrap_or(0)
    }

    /// `AS_READY (2)`
    pub fn label(&self) -> String {
        format!("{} ({})", self.current_name(), self.current_value())
    }

    /// Move to the next state, wrapping at the end
    pub fn advance(&mut self) {
        let len = self.table.sequence().len().max(1);
        self.index = (self.index + 1) % len;
    }

    /// Poll once; true when the state changed
    pub fn poll(&mut self, inputs: &GamepadInputs) -> bool {
        let pressed = inputs.buttons.get(self.button).copied().unwrap_or(false);
        let rising = pressed && !self.was_pressed;
        self.was_pressed = pressed;
        if rising {
            self.advance();
        }
        rising
    }
}
