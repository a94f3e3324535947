//! Mock Serial Backend
//!
//! In-memory serial devices for exercising the client without hardware.
//!
//! # Available Mocks
//!
//! - `MockSerial` - a [`SerialBackend`] holding any number of named devices
//! - `MockDevice` - test-side handle to one device: feed bytes, inspect writes,
//!   inject failures and delays, plug and unplug
//!
//! # Example
//!
//! ```rust,ignore
//! let backend = MockSerial::new();
//! let device = backend.add_device("/dev/ttyMOCK0");
//! device.feed(b"230.1,0.42,96.6\n");
//! ```

use crate::core::{BaudRate, PortDescriptor};
use crate::error::{MonitorError, MonitorResult};
use crate::transport::{SerialBackend, SerialLink};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// MockDevice
// =============================================================================

#[derive(Debug, Default)]
struct DeviceState {
    present: bool,
    busy: bool,
    inbound: VecDeque<u8>,
    written: Vec<u8>,
    fail_reads: bool,
    fail_writes: bool,
    reject_sessions: bool,
    write_delay: Duration,
    probe_delay: Duration,
    opens: usize,
    probes: usize,
    last_baud: Option<BaudRate>,
}

/// Test-side handle to a simulated device.
#[derive(Debug, Clone)]
pub struct MockDevice {
    name: PortDescriptor,
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    /// Port name of the device.
    pub fn port(&self) -> &PortDescriptor {
        &self.name
    }

    /// Queue bytes for the client to read.
    pub fn feed(&self, bytes: &[u8]) {
        lock(&self.state).inbound.extend(bytes);
    }

    /// Everything the client has written so far, lossily decoded.
    pub fn written(&self) -> String {
        String::from_utf8_lossy(&lock(&self.state).written).into_owned()
    }

    /// Make every subsequent read fail with a broken-pipe error.
    pub fn fail_reads(&self, fail: bool) {
        lock(&self.state).fail_reads = fail;
    }

    /// Make every subsequent write fail with a broken-pipe error.
    pub fn fail_writes(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }

    /// Simulate another program holding the port.
    pub fn set_busy(&self, busy: bool) {
        lock(&self.state).busy = busy;
    }

    /// Let probes succeed but make real opens fail, like a port grabbed by
    /// another program between the probe and the connect.
    pub fn reject_sessions(&self, reject: bool) {
        lock(&self.state).reject_sessions = reject;
    }

    /// Make every write take `delay` before it completes.
    pub fn set_write_delay(&self, delay: Duration) {
        lock(&self.state).write_delay = delay;
    }

    /// Make every probe take `delay` before it answers.
    pub fn set_probe_delay(&self, delay: Duration) {
        lock(&self.state).probe_delay = delay;
    }

    /// Remove the device from enumeration; opens fail with `NotFound`.
    pub fn unplug(&self) {
        lock(&self.state).present = false;
    }

    /// Make the device visible again.
    pub fn plug(&self) {
        lock(&self.state).present = true;
    }

    /// Number of successful opens, probes included.
    pub fn open_count(&self) -> usize {
        lock(&self.state).opens
    }

    /// Number of probe attempts, successful or not.
    pub fn probe_count(&self) -> usize {
        lock(&self.state).probes
    }

    /// Baud rate of the most recent successful open.
    pub fn last_baud(&self) -> Option<BaudRate> {
        lock(&self.state).last_baud
    }
}

// =============================================================================
// MockSerial
// =============================================================================

/// Backend over a set of simulated devices, enumerated in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MockSerial {
    devices: Arc<Mutex<Vec<MockDevice>>>,
}

impl MockSerial {
    /// Backend with no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a present, idle device.
    pub fn add_device(&self, name: impl Into<PortDescriptor>) -> MockDevice {
        let device = MockDevice {
            name: name.into(),
            state: Arc::new(Mutex::new(DeviceState {
                present: true,
                ..Default::default()
            })),
        };
        lock(&self.devices).push(device.clone());
        device
    }

    /// Check that `port` can be opened and count the open.
    fn claim(&self, port: &PortDescriptor, baud_rate: BaudRate, probing: bool) -> MonitorResult<MockDevice> {
        let unavailable = |kind: io::ErrorKind, msg: &str| MonitorError::PortUnavailable {
            port: port.to_string(),
            source: io::Error::new(kind, msg.to_string()),
        };

        let device = self
            .find(port)
            .ok_or_else(|| unavailable(io::ErrorKind::NotFound, "no such device"))?;

        let mut state = lock(&device.state);
        if !state.present {
            return Err(unavailable(io::ErrorKind::NotFound, "device unplugged"));
        }
        if state.busy || (state.reject_sessions && !probing) {
            return Err(unavailable(io::ErrorKind::PermissionDenied, "port is busy"));
        }
        state.opens += 1;
        state.last_baud = Some(baud_rate);
        drop(state);
        Ok(device)
    }

    fn find(&self, port: &PortDescriptor) -> Option<MockDevice> {
        lock(&self.devices)
            .iter()
            .find(|d| &d.name == port)
            .cloned()
    }
}

impl SerialBackend for MockSerial {
    fn list_ports(&self) -> Vec<PortDescriptor> {
        lock(&self.devices)
            .iter()
            .filter(|d| lock(&d.state).present)
            .map(|d| d.name.clone())
            .collect()
    }

    fn open(
        &self,
        port: &PortDescriptor,
        baud_rate: BaudRate,
        _timeout: Duration,
    ) -> MonitorResult<Box<dyn SerialLink>> {
        let device = self.claim(port, baud_rate, false)?;
        Ok(Box::new(MockLink {
            state: device.state.clone(),
        }))
    }

    fn probe(&self, port: &PortDescriptor, baud_rate: BaudRate, _timeout: Duration) -> MonitorResult<()> {
        if let Some(device) = self.find(port) {
            let delay = {
                let mut state = lock(&device.state);
                state.probes += 1;
                state.probe_delay
            };
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
        self.claim(port, baud_rate, true).map(drop)
    }
}

/// Open handle to a mock device.
struct MockLink {
    state: Arc<Mutex<DeviceState>>,
}

impl MockLink {
    fn check_present(state: &DeviceState) -> io::Result<()> {
        if state.present {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::NotConnected, "device unplugged"))
        }
    }
}

impl SerialLink for MockLink {
    fn bytes_available(&mut self) -> io::Result<usize> {
        let state = lock(&self.state);
        Self::check_present(&state)?;
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "read failed"));
        }
        Ok(state.inbound.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        Self::check_present(&state)?;
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "read failed"));
        }
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let delay = lock(&self.state).write_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut state = lock(&self.state);
        Self::check_present(&state)?;
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
        }
        state.written.extend_from_slice(bytes);
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn SerialLink>> {
        Ok(Box::new(MockLink {
            state: self.state.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerates_present_devices_in_order() {
        let backend = MockSerial::new();
        let a = backend.add_device("/dev/ttyA");
        backend.add_device("/dev/ttyB");
        assert_eq!(
            backend.list_ports(),
            [PortDescriptor::new("/dev/ttyA"), PortDescriptor::new("/dev/ttyB")]
        );

        a.unplug();
        assert_eq!(backend.list_ports(), [PortDescriptor::new("/dev/ttyB")]);
    }

    #[test]
    fn busy_device_refuses_open() {
        let backend = MockSerial::new();
        let dev = backend.add_device("COM4");
        dev.set_busy(true);
        let err = backend
            .open(dev.port(), BaudRate::B9600, Duration::ZERO)
            .err()
            .unwrap();
        assert!(matches!(err, MonitorError::PortUnavailable { .. }));
        assert_eq!(dev.open_count(), 0);
    }

    #[test]
    fn link_reads_fed_bytes_and_records_writes() {
        let backend = MockSerial::new();
        let dev = backend.add_device("COM4");
        let mut link = backend
            .open(dev.port(), BaudRate::B57600, Duration::ZERO)
            .unwrap();
        assert_eq!(dev.last_baud(), Some(BaudRate::B57600));

        dev.feed(b"abc");
        assert_eq!(link.bytes_available().unwrap(), 3);
        let mut buf = [0u8; 8];
        assert_eq!(link.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");

        link.write_all(b"rs\n").unwrap();
        assert_eq!(dev.written(), "rs\n");
    }

    #[test]
    fn probe_is_counted_and_opens_once() {
        let backend = MockSerial::new();
        let dev = backend.add_device("COM5");
        backend
            .probe(dev.port(), BaudRate::B115200, Duration::ZERO)
            .unwrap();
        assert_eq!(dev.probe_count(), 1);
        assert_eq!(dev.open_count(), 1);
    }

    #[test]
    fn rejecting_sessions_still_answers_probes() {
        let backend = MockSerial::new();
        let dev = backend.add_device("COM6");
        dev.reject_sessions(true);

        assert!(backend.probe(dev.port(), BaudRate::B9600, Duration::ZERO).is_ok());
        assert!(backend.open(dev.port(), BaudRate::B9600, Duration::ZERO).is_err());
        assert_eq!(dev.probe_count(), 1);
        assert_eq!(dev.open_count(), 1);
    }
}
