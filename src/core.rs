//! Core data types for the monitor.
//!
//! Everything that crosses a component boundary lives here: port identifiers,
//! the supported baud rates, the immutable connection configuration, the
//! lifecycle state and the telemetry `Reading` produced by the parser.

use crate::error::MonitorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default read timeout applied to every opened port.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Opaque serial device identifier (e.g. `/dev/ttyUSB0`, `COM3`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortDescriptor(String);

impl PortDescriptor {
    /// Wrap a platform port name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The platform port name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PortDescriptor {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for PortDescriptor {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Baud rates supported by the metering device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BaudRate {
    /// 9600 baud
    B9600,
    /// 19200 baud
    B19200,
    /// 38400 baud
    B38400,
    /// 57600 baud
    B57600,
    /// 115200 baud
    #[default]
    B115200,
}

impl BaudRate {
    /// Every supported rate, slowest first.
    pub const ALL: [BaudRate; 5] = [
        BaudRate::B9600,
        BaudRate::B19200,
        BaudRate::B38400,
        BaudRate::B57600,
        BaudRate::B115200,
    ];

    /// Numeric rate in bits per second.
    pub fn as_u32(self) -> u32 {
        match self {
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115200,
        }
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = MonitorError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        BaudRate::ALL
            .into_iter()
            .find(|rate| rate.as_u32() == value)
            .ok_or(MonitorError::InvalidBaudRate(value))
    }
}

impl From<BaudRate> for u32 {
    fn from(rate: BaudRate) -> Self {
        rate.as_u32()
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Parameters of a single connection attempt.
///
/// A config is never mutated once an attempt starts; a new attempt builds a
/// new value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Port to open.
    pub port: PortDescriptor,
    /// Line speed.
    pub baud_rate: BaudRate,
    /// Read timeout handed to the platform driver.
    pub read_timeout: Duration,
}

impl ConnectionConfig {
    /// Config with the default read timeout.
    pub fn new(port: impl Into<PortDescriptor>, baud_rate: BaudRate) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Override the read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

/// Lifecycle state of the single device session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No port is open and no reader is running.
    #[default]
    Disconnected,
    /// A port is open and its line reader is running.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("Disconnected"),
            ConnectionState::Connected => f.write_str("Connected"),
        }
    }
}

/// A telemetry sample. Any subset of fields may be present.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Volts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
    /// Device-reported current.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    /// Watts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
}

impl Reading {
    /// A reading with all three fields present.
    pub fn full(voltage: f64, current: f64, power: f64) -> Self {
        Self {
            voltage: Some(voltage),
            current: Some(current),
            power: Some(power),
        }
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.voltage.is_none() && self.current.is_none() && self.power.is_none()
    }
}
