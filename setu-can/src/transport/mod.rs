//! Byte-stream transport abstraction
//!
//! The link never touches a serial port directly; it reads and writes through
//! [`Transport`], which lets tests drive it with [`MockTransport`].

use crate::error::Result;

mod mock;
mod serial;

pub use mock::MockTransport;
pub use serial::{SUPPORTED_BAUD_RATES, SerialTransport};

/// Transport trait for adapter communication
pub trait Transport: Send {
    /// Read available bytes into buffer; `Ok(0)` when nothing arrived in time
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write data from buffer, returns number of bytes written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush any pending writes (blocking until complete)
    fn flush(&mut self) -> Result<()>;

    /// Write the whole buffer, retrying short writes
    fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = self.write(data)?;
            if n == 0 {
                return Err(crate::error::Error::Connection(
                    "transport accepted zero bytes".to_string(),
                ));
            }
            data = &data[n..];
        }
        Ok(())
    }
}
