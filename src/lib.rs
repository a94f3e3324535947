//! # RS-485 Power Monitor
//!
//! Serial telemetry client for RS-485 power-metering devices. The library opens a
//! serial port, exchanges newline-terminated ASCII commands and telemetry with the
//! meter, extracts voltage/current/power readings, and reports them together with
//! a timestamped activity log. Rendering is left to the caller; the bundled
//! `rs485-monitor` binary is a terminal front-end.
//!
//! ## Crate Structure
//!
//! - **`client`**: `MonitorClient`, the facade a presentation layer talks to.
//! - **`connection`**: the connection manager and its Disconnected/Connected
//!   lifecycle.
//! - **`reconnect`**: the auto-reconnect controller (probe ports on a timer,
//!   connect to the first available one, disarm).
//! - **`reader`**: the background line reader and its `LineBuffer`.
//! - **`parser`**: CSV and tagged (`V=12.3`) reading extraction.
//! - **`transport`**: the `SerialBackend`/`SerialLink` seam and the
//!   `serialport`-based implementation.
//! - **`events`**: the outbound Reading and LogEvent streams.
//! - **`core`**: shared data types (`PortDescriptor`, `BaudRate`, `Reading`, ...).
//! - **`config`**: layered configuration via `figment`.
//! - **`logging`**: `tracing-subscriber` initialisation.
//! - **`display`**: latest-value board for front-ends.
//! - **`mock`**: in-memory serial devices for tests and demos.
//! - **`error`**: the `MonitorError` enum.

pub mod client;
pub mod config;
pub mod connection;
pub mod core;
pub mod display;
pub mod error;
pub mod events;
pub mod logging;
pub mod mock;
pub mod parser;
pub mod reader;
pub mod reconnect;
pub mod transport;

pub use client::{ClientSettings, MonitorClient};
pub use crate::core::{BaudRate, ConnectionConfig, ConnectionState, PortDescriptor, Reading};
pub use error::{MonitorError, MonitorResult};
pub use events::{ClientEvents, LogEvent};
pub use parser::parse_reading;
