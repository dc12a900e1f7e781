//! Byte transport under the native driver.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort};

use super::frame::TERMINATOR;

/// Whole-reply deadline.
const READ_TIMEOUT: Duration = Duration::from_secs(2);
/// Gap between bytes that ends a reply early.
const INTER_BYTE_TIMEOUT: Duration = Duration::from_millis(200);

/// The handful of port operations the driver needs.
pub trait SerialLink: Send {
    /// Bytes waiting in the input buffer.
    fn bytes_pending(&mut self) -> io::Result<usize>;
    /// Read exactly what is already buffered (up to `max`).
    fn read_pending(&mut self, max: usize) -> io::Result<Vec<u8>>;
    fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()>;
    /// Read until the terminator (inclusive) or a timeout; a timeout yields
    /// whatever arrived, possibly nothing.
    fn read_reply(&mut self) -> io::Result<Vec<u8>>;
    /// Drop anything buffered on input.
    fn clear_input(&mut self) -> io::Result<()>;
}

/// A real serial port.
pub struct PortLink {
    port: Box<dyn SerialPort>,
}

impl PortLink {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(path, baud_rate)
            .timeout(INTER_BYTE_TIMEOUT)
            .open()?;
        tracing::debug!("Opened radio port {} at {} baud", path, baud_rate);
        Ok(Self { port })
    }
}

impl SerialLink for PortLink {
    fn bytes_pending(&mut self) -> io::Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read_pending(&mut self, max: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; max];
        let n = self.port.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn read_reply(&mut self) -> io::Result<Vec<u8>> {
        let deadline = Instant::now() + READ_TIMEOUT;
        let mut reply = Vec::new();
        let mut byte = [0u8; 1];

        while Instant::now() < deadline {
            match self.port.read(&mut byte) {
                Ok(0) => continue,
                Ok(_) => {
                    reply.push(byte[0]);
                    if byte[0] == TERMINATOR {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    if !reply.is_empty() {
                        break;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Ok(reply)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}
