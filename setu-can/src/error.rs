//! Error types for SetuCAN

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// SetuCAN error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Device open/read/write failure; always collapses the link
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation requires an open link
    #[error("Not connected")]
    NotConnected,

    /// Command sent, no matching acknowledgement arrived in time
    #[error("Ack timeout for '{command}' after {timeout_ms}ms")]
    AckTimeout {
        /// Command text as written to the adapter
        command: String,
        /// Timeout that expired
        timeout_ms: u64,
    },

    /// Adapter answered with an error token
    #[error("Ack rejected for '{command}': {response}")]
    AckRejected {
        /// Command text as written to the adapter
        command: String,
        /// Raw response token
        response: String,
    },

    /// Waiter dropped without a response (link teardown)
    #[error("Ack for '{command}' cleared: {reason}")]
    AckCleared {
        /// Command text as written to the adapter
        command: String,
        /// Reason passed to the clear
        reason: String,
    },

    /// CAN identifier outside the 11-bit range
    #[error("Invalid CAN id: {0:#x}")]
    InvalidCanId(u32),

    /// Malformed SLCAN line (dropped on the receive path)
    #[error("Frame parse error: {0}")]
    FrameParse(String),

    /// Configuration value rejected; caller substitutes a default
    #[error("Invalid configuration: {0}")]
    ConfigValidation(String),

    /// TOML parse error
    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for errors raised by the ack correlator
    pub fn is_ack_error(&self) -> bool {
        matches!(
            self,
            Error::AckTimeout { .. } | Error::AckRejected { .. } | Error::AckCleared { .. }
        )
    }
}
