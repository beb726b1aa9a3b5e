//! Core data model.
//!
//! - [`types`]: frames, decoded state, control vector, gamepad snapshots
//! - [`shared`]: the shared context every component reads and writes

pub mod shared;
pub mod types;

pub use shared::SharedContext;
