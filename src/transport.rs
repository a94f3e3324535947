//! Serial transport abstractions.
//!
//! The client never talks to `serialport` directly. It goes through two traits:
//!
//! - [`SerialBackend`]: port enumeration, opening and probing. One instance per
//!   client, shared between the connection manager and the auto-reconnect loop.
//! - [`SerialLink`]: an open port handle. The connection manager keeps one handle
//!   for writes and hands a cloned handle to the line reader.
//!
//! [`SystemSerial`] is the production backend; `crate::mock::MockSerial` provides
//! an in-memory device for tests.

use crate::core::{BaudRate, PortDescriptor};
use crate::error::{MonitorError, MonitorResult};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::{trace, warn};

/// An open serial port handle.
pub trait SerialLink: Send {
    /// Number of bytes that can be read without blocking.
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Read into `buf`, returning the number of bytes read.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole payload and flush it to the device.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// A second handle to the same port, used by the background reader.
    fn try_clone(&self) -> io::Result<Box<dyn SerialLink>>;
}

/// Source of serial ports.
pub trait SerialBackend: Send + Sync {
    /// Currently visible ports, in platform order. Never fails: an enumeration
    /// error degrades to an empty list.
    fn list_ports(&self) -> Vec<PortDescriptor>;

    /// Open `port` with the given line speed and read timeout.
    fn open(
        &self,
        port: &PortDescriptor,
        baud_rate: BaudRate,
        timeout: Duration,
    ) -> MonitorResult<Box<dyn SerialLink>>;

    /// Check that `port` can be opened right now, closing it again immediately.
    fn probe(&self, port: &PortDescriptor, baud_rate: BaudRate, timeout: Duration) -> MonitorResult<()> {
        self.open(port, baud_rate, timeout).map(drop)
    }
}

// =============================================================================
// SystemSerial - platform serial ports via the `serialport` crate
// =============================================================================

/// Backend for the platform's real serial devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSerial;

impl SerialBackend for SystemSerial {
    fn list_ports(&self) -> Vec<PortDescriptor> {
        match serialport::available_ports() {
            Ok(ports) => ports
                .into_iter()
                .map(|p| PortDescriptor::new(p.port_name))
                .collect(),
            Err(e) => {
                warn!(error = %e, "Serial port enumeration failed");
                Vec::new()
            }
        }
    }

    fn open(
        &self,
        port: &PortDescriptor,
        baud_rate: BaudRate,
        timeout: Duration,
    ) -> MonitorResult<Box<dyn SerialLink>> {
        trace!(port = %port, baud = baud_rate.as_u32(), "Opening serial port");
        let handle = serialport::new(port.as_str(), baud_rate.as_u32())
            .timeout(timeout)
            .open()
            .map_err(|e| MonitorError::PortUnavailable {
                port: port.to_string(),
                source: e.into(),
            })?;
        Ok(Box::new(handle))
    }
}

impl SerialLink for Box<dyn serialport::SerialPort> {
    fn bytes_available(&mut self) -> io::Result<usize> {
        let n = serialport::SerialPort::bytes_to_read(self.as_ref())?;
        Ok(n as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        Write::write_all(self, bytes)?;
        Write::flush(self)
    }

    fn try_clone(&self) -> io::Result<Box<dyn SerialLink>> {
        let clone = serialport::SerialPort::try_clone(self.as_ref())?;
        Ok(Box::new(clone))
    }
}

/// Whether an I/O error is just the driver's read timeout expiring.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
