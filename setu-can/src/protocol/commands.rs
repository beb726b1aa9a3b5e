//! SLCAN adapter command set
//!
//! Each command knows its wire text and how its acknowledgement is awaited.
//! Data frames are written through [`super::codec::encode_frame`] and are
//! never acknowledged.

use crate::error::{Error, Result};
use std::fmt;
use std::time::Duration;

/// Default acknowledgement timeout
pub const ACK_TIMEOUT: Duration = Duration::from_millis(750);

/// Version query and first-contact timeout
pub const QUERY_ACK_TIMEOUT: Duration = Duration::from_millis(2000);

/// Close-channel timeout; the adapter may already be gone
pub const CLOSE_ACK_TIMEOUT: Duration = Duration::from_millis(150);

/// SLCAN bitrate code (`S0`..`S8`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitrateCode(u8);

impl BitrateCode {
    /// 500 kbit/s
    pub const DEFAULT: BitrateCode = BitrateCode(6);

    pub fn new(code: u8) -> Result<Self> {
        if code <= 8 {
            Ok(Self(code))
        } else {
            Err(Error::ConfigValidation(format!(
                "bitrate code {} outside 0-8",
                code
            )))
        }
    }

    /// Parse a single digit `"0"`..`"8"`
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let mut chars = trimmed.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_digit() => Self::new(c as u8 - b'0'),
            _ => Err(Error::ConfigValidation(format!(
                "bitrate code '{}' is not a digit 0-8",
                text
            ))),
        }
    }

    pub fn code(&self) -> u8 {
        self.0
    }

    /// Nominal bus rate in kbit/s
    pub fn kbps(&self) -> u32 {
        match self.0 {
            0 => 10,
            1 => 20,
            2 => 50,
            3 => 100,
            4 => 125,
            5 => 250,
            6 => 500,
            7 => 800,
            _ => 1000,
        }
    }
}

impl Default for BitrateCode {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// How a command's acknowledgement is awaited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPolicy {
    pub wait_for_ack: bool,
    /// Treat an error token as success (value `None`)
    pub allow_ack_error: bool,
    pub timeout: Duration,
}

impl AckPolicy {
    /// Fire and forget
    pub const NONE: AckPolicy = AckPolicy {
        wait_for_ack: false,
        allow_ack_error: false,
        timeout: ACK_TIMEOUT,
    };

    pub const fn wait(timeout: Duration) -> Self {
        Self {
            wait_for_ack: true,
            allow_ack_error: false,
            timeout,
        }
    }

    pub const fn tolerant(timeout: Duration) -> Self {
        Self {
            wait_for_ack: true,
            allow_ack_error: true,
            timeout,
        }
    }
}

/// Adapter control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlcanCommand {
    /// `V` - query adapter version
    Version,
    /// `O` - open the CAN channel
    Open,
    /// `C` - close the CAN channel
    Close,
    /// `S<n>` - set bus bitrate
    SetBitrate(BitrateCode),
    /// `M<8 hex>` - acceptance code
    AcceptanceCode(u32),
    /// `m<8 hex>` - acceptance mask
    AcceptanceMask(u32),
    /// `X1`/`X0` - automatic forwarding of received frames
    AutoForward(bool),
    /// `A` - poll all pending frames
    PollAll,
}

impl SlcanCommand {
    /// Wire text without terminator
    pub fn line(&self) -> String {
        match self {
            SlcanCommand::Version => "V".to_string(),
            SlcanCommand::Open => "O".to_string(),
            SlcanCommand::Close => "C".to_string(),
            SlcanCommand::SetBitrate(code) => format!("S{}", code.code()),
            SlcanCommand::AcceptanceCode(code) => format!("M{:08X}", code),
            SlcanCommand::AcceptanceMask(mask) => format!("m{:08X}", mask),
            SlcanCommand::AutoForward(on) => format!("X{}", *on as u8),
            SlcanCommand::PollAll => "A".to_string(),
        }
    }

    /// Acknowledgement policy used during the connect handshake
    pub fn default_policy(&self) -> AckPolicy {
        match self {
            SlcanCommand::Version => AckPolicy::wait(QUERY_ACK_TIMEOUT),
            SlcanCommand::Close => AckPolicy::tolerant(CLOSE_ACK_TIMEOUT),
            SlcanCommand::AutoForward(_) => AckPolicy::tolerant(ACK_TIMEOUT),
            SlcanCommand::PollAll => AckPolicy::NONE,
            _ => AckPolicy::wait(ACK_TIMEOUT),
        }
    }
}

impl fmt::Display for SlcanCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_lines() {
        assert_eq!(SlcanCommand::Version.line(), "V");
        assert_eq!(SlcanCommand::SetBitrate(BitrateCode::DEFAULT).line(), "S6");
        assert_eq!(SlcanCommand::AcceptanceCode(0).line(), "M00000000");
        assert_eq!(SlcanCommand::AcceptanceMask(0xFFFF_FFFF).line(), "mFFFFFFFF");
        assert_eq!(SlcanCommand::AutoForward(true).line(), "X1");
        assert_eq!(SlcanCommand::PollAll.line(), "A");
    }

    #[test]
    fn test_bitrate_code_parse() {
        assert_eq!(BitrateCode::parse("6").unwrap().kbps(), 500);
        assert_eq!(BitrateCode::parse(" 8 ").unwrap().kbps(), 1000);
        assert!(BitrateCode::parse("9").is_err());
        assert!(BitrateCode::parse("12").is_err());
        assert!(BitrateCode::parse("").is_err());
        assert!(BitrateCode::parse("x").is_err());
    }

    #[test]
    fn test_close_tolerates_errors() {
        let policy = SlcanCommand::Close.default_policy();
        assert!(policy.allow_ack_error);
        assert_eq!(policy.timeout, CLOSE_ACK_TIMEOUT);
        assert!(!SlcanCommand::PollAll.default_policy().wait_for_ack);
    }
}
