//! SetuCAN - gamepad and mission-logic bridge to a CAN bus over SLCAN
//!
//! Turns controller input and timer-driven mission phases into periodically
//! transmitted CAN frames, and decodes the VCU status frame back into the
//! state that drives those decisions.
//!
//! ## Layout
//!
//! - [`protocol`]: SLCAN line codec, FS-AI payload layouts, adapter commands
//! - [`transport`]: byte-stream devices (serial port, mock)
//! - [`link`]: connection lifecycle, write queue, ack correlation
//! - [`scheduler`]: drift-corrected periodic transmission
//! - [`control`]: state-driven and raw manual mission control
//! - [`gamepad`]: controller change detection
//! - [`bridge`]: process-level orchestration

pub mod bridge;
pub mod config;
pub mod control;
pub mod core;
pub mod error;
pub mod gamepad;
pub mod link;
pub mod protocol;
pub mod scheduler;
pub mod telemetry;
pub mod transport;

// Re-export commonly used types
pub use bridge::Bridge;
pub use config::{BridgeConfig, ValidatedConfig};
pub use core::SharedContext;
pub use error::{Error, Result};
pub use link::{LinkIo, LinkSettings, SlcanLink};
pub use transport::{MockTransport, Transport};
