//! Monitor client facade.
//!
//! [`MonitorClient`] is what a presentation layer talks to. It wires a serial
//! backend, the connection manager and the auto-reconnect controller to one
//! pair of event streams, and exposes the operator's intents: list ports,
//! connect, disconnect, send a command, arm and disarm auto-connect.

use crate::config::MonitorConfig;
use crate::connection::ConnectionManager;
use crate::core::{
    BaudRate, ConnectionConfig, ConnectionState, PortDescriptor, DEFAULT_READ_TIMEOUT,
};
use crate::error::MonitorResult;
use crate::events::{self, ClientEvents, EventSink};
use crate::reader::ReaderSettings;
use crate::reconnect::{AutoReconnect, ReconnectSettings};
use crate::transport::{SerialBackend, SystemSerial};
use std::sync::Arc;
use std::time::Duration;

/// Everything the client needs besides the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSettings {
    /// Read timeout for user-initiated connections.
    pub read_timeout: Duration,
    /// Background reader tuning.
    pub reader: ReaderSettings,
    /// Auto-connect tuning.
    pub reconnect: ReconnectSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            reader: ReaderSettings::default(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl From<&MonitorConfig> for ClientSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            read_timeout: config.serial.read_timeout(),
            reader: config.reader_settings(),
            reconnect: config.reconnect_settings(),
        }
    }
}

/// The serial telemetry client.
pub struct MonitorClient {
    backend: Arc<dyn SerialBackend>,
    sink: EventSink,
    manager: ConnectionManager,
    auto: AutoReconnect,
    read_timeout: Duration,
}

impl MonitorClient {
    /// Client over an arbitrary backend.
    pub fn new(backend: Arc<dyn SerialBackend>, settings: ClientSettings) -> (Self, ClientEvents) {
        let (sink, events) = events::channel();
        let manager = ConnectionManager::new(backend.clone(), sink.clone(), settings.reader);
        let auto = AutoReconnect::new(
            manager.clone(),
            backend.clone(),
            sink.clone(),
            settings.reconnect,
        );
        let client = Self {
            backend,
            sink,
            manager,
            auto,
            read_timeout: settings.read_timeout,
        };
        (client, events)
    }

    /// Client over the platform's serial ports, configured from `config`.
    pub fn from_config(config: &MonitorConfig) -> (Self, ClientEvents) {
        Self::new(Arc::new(SystemSerial), ClientSettings::from(config))
    }

    /// Enumerate ports and log how many were found.
    pub fn list_ports(&self) -> Vec<PortDescriptor> {
        let ports = self.backend.list_ports();
        self.sink.log(format!("Scanned {} ports", ports.len()));
        ports
    }

    /// Connect to `port` at `baud_rate`.
    pub async fn connect(&self, port: impl Into<PortDescriptor>, baud_rate: BaudRate) -> MonitorResult<()> {
        let config = ConnectionConfig::new(port, baud_rate).with_read_timeout(self.read_timeout);
        self.manager.connect(config).await
    }

    /// Close the session, if any.
    pub async fn disconnect(&self) {
        self.manager.disconnect().await;
    }

    /// Send a newline-terminated command. No-op while disconnected.
    pub async fn send_command(&self, text: &str) -> MonitorResult<()> {
        self.manager.send_command(text).await
    }

    /// Start auto-connect at `baud_rate`.
    pub fn arm_auto_reconnect(&self, baud_rate: BaudRate) {
        self.auto.arm(baud_rate);
    }

    /// Stop auto-connect. Leaves any open session alone.
    pub fn disarm_auto_reconnect(&self) {
        self.auto.disarm();
    }

    /// Whether auto-connect is running.
    pub fn is_auto_reconnect_armed(&self) -> bool {
        self.auto.is_armed()
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ConnectionState {
        self.manager.state().await
    }

    /// Port of the open session, if any.
    pub async fn port(&self) -> Option<PortDescriptor> {
        self.manager.port().await
    }

    /// Stop auto-connect, then close the session.
    pub async fn shutdown(&self) {
        self.auto.disarm();
        self.manager.disconnect().await;
    }
}
