//! Outbound event streams.
//!
//! The client reports to its presentation layer through two ordered streams:
//! parsed [`Reading`]s and timestamped [`LogEvent`]s. Producers hold an
//! [`EventSink`]; the presentation layer owns the matching [`ClientEvents`].
//!
//! Both streams are unbounded. The log is the operator's causal record, so
//! events are never dropped, batched or reordered: every producer sends through
//! the same channel, in the order things happen.

use crate::core::Reading;
use chrono::{DateTime, Local};
use std::fmt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::info;

/// One line of the activity log.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEvent {
    /// Local wall-clock time the event was produced.
    pub timestamp: DateTime<Local>,
    /// Human-readable message, e.g. `RX: 12.1,0.5,3.0`.
    pub text: String,
}

impl LogEvent {
    /// Stamp `text` with the current local time.
    pub fn now(text: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            text: text.into(),
        }
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.text)
    }
}

/// Producer side of the event streams. Cheap to clone.
#[derive(Clone, Debug)]
pub struct EventSink {
    readings: UnboundedSender<Reading>,
    logs: UnboundedSender<LogEvent>,
}

/// Consumer side of the event streams.
#[derive(Debug)]
pub struct ClientEvents {
    /// Parsed telemetry, one item per matching line.
    pub readings: UnboundedReceiver<Reading>,
    /// Activity log.
    pub logs: UnboundedReceiver<LogEvent>,
}

/// Create a connected sink/receiver pair.
pub fn channel() -> (EventSink, ClientEvents) {
    let (readings_tx, readings_rx) = mpsc::unbounded_channel();
    let (logs_tx, logs_rx) = mpsc::unbounded_channel();
    (
        EventSink {
            readings: readings_tx,
            logs: logs_tx,
        },
        ClientEvents {
            readings: readings_rx,
            logs: logs_rx,
        },
    )
}

impl EventSink {
    /// Append a line to the activity log. The line is mirrored into tracing.
    pub fn log(&self, text: impl Into<String>) {
        let event = LogEvent::now(text);
        info!(target: "rs485_monitor::activity", "{}", event.text);
        // A dropped receiver means nobody is displaying the log any more.
        let _ = self.logs.send(event);
    }

    /// Forward a parsed reading.
    pub fn reading(&self, reading: Reading) {
        let _ = self.readings.send(reading);
    }
}

impl ClientEvents {
    /// Drain every log event currently queued.
    pub fn drain_logs(&mut self) -> Vec<LogEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.logs.try_recv() {
            out.push(event);
        }
        out
    }

    /// Drain every reading currently queued.
    pub fn drain_readings(&mut self) -> Vec<Reading> {
        let mut out = Vec::new();
        while let Ok(reading) = self.readings.try_recv() {
            out.push(reading);
        }
        out
    }
}
