//! Serial transport implementation

use super::Transport;
use crate::error::{Error, Result};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

/// Baud rates accepted by the adapter firmware
pub const SUPPORTED_BAUD_RATES: [u32; 5] = [115_200, 250_000, 500_000, 1_000_000, 2_000_000];

/// Read timeout; keeps the read thread responsive to shutdown
const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Serial transport for the SLCAN adapter (USB CDC or UART)
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open a serial port at 8N1, no flow control
    ///
    /// # Arguments
    /// * `path` - Serial port path (e.g., "/dev/ttyACM0")
    /// * `baud_rate` - One of [`SUPPORTED_BAUD_RATES`]
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        if !SUPPORTED_BAUD_RATES.contains(&baud_rate) {
            return Err(Error::Connection(format!(
                "unsupported baud rate {}",
                baud_rate
            )));
        }

        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| Error::Connection(format!("failed to open {}: {}", path, e)))?;

        log::info!("Opened serial port: {} at {} baud", path, baud_rate);

        Ok(SerialTransport { port })
    }

    /// Independent handle to the same port (for a dedicated reader)
    pub fn try_clone(&self) -> Result<Self> {
        Ok(SerialTransport {
            port: self.port.try_clone()?,
        })
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.port.write(data)?)
    }

    fn flush(&mut self) -> Result<()> {
        self.port.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unsupported_baud() {
        let result = SerialTransport::open("/dev/null", 9600);
        assert!(matches!(result, Err(Error::Connection(_))));
    }

    #[test]
    fn test_missing_device_is_connection_error() {
        let result = SerialTransport::open("/dev/setu-can-does-not-exist", 2_000_000);
        assert!(matches!(result, Err(Error::Connection(_))));
    }
}
