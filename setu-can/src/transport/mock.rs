//! Mock transport for testing
//!
//! Clones share one buffer pair, so a test keeps a handle while the link
//! owns others. An optional responder sees every complete CR-terminated
//! line written and may queue bytes for the reader, emulating an adapter.

use super::Transport;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

type Responder = Box<dyn FnMut(&str) -> Option<Vec<u8>> + Send>;

/// Mock transport for unit and integration testing
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

struct MockTransportInner {
    read_buffer: VecDeque<u8>,
    write_buffer: Vec<u8>,
    pending_line: Vec<u8>,
    responder: Option<Responder>,
    read_fault: Option<String>,
    write_fault: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                read_buffer: VecDeque::new(),
                write_buffer: Vec::new(),
                pending_line: Vec::new(),
                responder: None,
                read_fault: None,
                write_fault: None,
            })),
        }
    }

    /// Mock that acknowledges every command with a bare CR and answers `V`
    /// with a version string, like a typical SLCAN adapter
    pub fn slcan_adapter() -> Self {
        let mock = Self::new();
        mock.set_responder(|line| match line {
            "V" => Some(b"V1013\r".to_vec()),
            l if l.starts_with('t') => Some(b"z\r".to_vec()),
            "A" => None,
            _ => Some(b"\r".to_vec()),
        });
        mock
    }

    /// Install the adapter emulation hook
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&str) -> Option<Vec<u8>> + Send + 'static,
    {
        self.inner.lock().responder = Some(Box::new(responder));
    }

    /// Inject data to be read
    pub fn inject_read(&self, data: &[u8]) {
        self.inner.lock().read_buffer.extend(data);
    }

    /// Get all written data
    pub fn get_written(&self) -> Vec<u8> {
        self.inner.lock().write_buffer.clone()
    }

    /// Written data split into CR-terminated lines
    pub fn written_lines(&self) -> Vec<String> {
        let written = self.get_written();
        String::from_utf8_lossy(&written)
            .split('\r')
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Clear written data
    pub fn clear_written(&self) {
        self.inner.lock().write_buffer.clear();
    }

    /// Make every following read fail
    pub fn fail_reads(&self, message: &str) {
        self.inner.lock().read_fault = Some(message.to_string());
    }

    /// Make every following write fail
    pub fn fail_writes(&self, message: &str) {
        self.inner.lock().write_fault = Some(message.to_string());
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        if let Some(fault) = &inner.read_fault {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                fault.clone(),
            )));
        }

        let available = inner.read_buffer.len().min(buffer.len());
        for (slot, byte) in buffer.iter_mut().zip(inner.read_buffer.drain(..available)) {
            *slot = byte;
        }
        Ok(available)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        if let Some(fault) = &inner.write_fault {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                fault.clone(),
            )));
        }
        inner.write_buffer.extend_from_slice(data);

        for &byte in data {
            if byte != b'\r' {
                inner.pending_line.push(byte);
                continue;
            }
            let line = String::from_utf8_lossy(&inner.pending_line).into_owned();
            inner.pending_line.clear();
            let reply = inner.responder.as_mut().and_then(|respond| respond(&line));
            if let Some(reply) = reply {
                inner.read_buffer.extend(reply);
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_and_read() {
        let mock = MockTransport::new();
        mock.inject_read(b"OK\r");
        let mut reader = mock.clone();
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"OK\r");
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_responder_sees_complete_lines() {
        let mock = MockTransport::slcan_adapter();
        let mut writer = mock.clone();
        writer.write_all(b"V").unwrap();
        writer.write_all(b"\rO\r").unwrap();

        let mut buf = [0u8; 16];
        let n = mock.clone().read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"V1013\r\r");
        assert_eq!(mock.written_lines(), vec!["V", "O"]);
    }

    #[test]
    fn test_fault_injection() {
        let mock = MockTransport::new();
        mock.fail_writes("unplugged");
        assert!(mock.clone().write(b"x").is_err());
        mock.fail_reads("unplugged");
        assert!(mock.clone().read(&mut [0u8; 4]).is_err());
    }
}
