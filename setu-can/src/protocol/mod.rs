//! SLCAN wire protocol: frame codec, payload layouts and adapter commands

pub mod codec;
pub mod commands;
pub mod payload;

pub use codec::{decode_frame, encode_frame, find_frame, parse_can_id};
pub use commands::{AckPolicy, BitrateCode, SlcanCommand};
pub use payload::{PayloadInputs, build_outgoing_payload, decode_status};
