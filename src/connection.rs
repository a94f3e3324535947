//! Connection manager.
//!
//! Owns the single device session and its lifecycle:
//!
//! ```text
//!   Disconnected --connect()--> Connected
//!   Connected --disconnect() / write failure / read failure--> Disconnected
//! ```
//!
//! While `Connected`, a [`LineReader`] runs over a cloned port handle; every line
//! it produces is logged as `RX: <line>` and handed to the reading parser. The
//! manager keeps the original handle for writes and uses it from the blocking
//! pool. Teardown always stops the reader and waits for it before the write
//! handle is dropped.
//!
//! The manager never retries on its own. Reconnection is the job of
//! [`crate::reconnect::AutoReconnect`].

use crate::core::{ConnectionConfig, ConnectionState, PortDescriptor};
use crate::error::{MonitorError, MonitorResult};
use crate::events::EventSink;
use crate::parser::parse_reading;
use crate::reader::{LineReader, ReaderSettings};
use crate::transport::{SerialBackend, SerialLink};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Write half of an open port. Locked from the blocking pool only.
type SharedLink = Arc<Mutex<Box<dyn SerialLink>>>;

/// An open port plus the reader attached to it.
struct Session {
    id: u64,
    port: PortDescriptor,
    link: SharedLink,
    reader: LineReader,
}

type SharedSession = Arc<Mutex<Option<Session>>>;

/// Handle to the connection manager. Clones share the same session.
#[derive(Clone)]
pub struct ConnectionManager {
    backend: Arc<dyn SerialBackend>,
    sink: EventSink,
    reader_settings: ReaderSettings,
    session: SharedSession,
    next_id: Arc<AtomicU64>,
}

impl ConnectionManager {
    /// Manager over `backend`, reporting to `sink`.
    pub fn new(backend: Arc<dyn SerialBackend>, sink: EventSink, reader_settings: ReaderSettings) -> Self {
        Self {
            backend,
            sink,
            reader_settings,
            session: Arc::new(Mutex::new(None)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ConnectionState {
        if self.session.lock().await.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Whether a session is open.
    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Port of the open session, if any.
    pub async fn port(&self) -> Option<PortDescriptor> {
        self.session.lock().await.as_ref().map(|s| s.port.clone())
    }

    /// Open `config.port` and start reading from it.
    ///
    /// Succeeds without doing anything if a session is already open. On failure
    /// the state stays `Disconnected`, the failure is logged and returned; no
    /// retry is attempted.
    #[instrument(skip(self, config), fields(port = %config.port, baud = %config.baud_rate))]
    pub async fn connect(&self, config: ConnectionConfig) -> MonitorResult<()> {
        let mut guard = self.session.lock().await;
        if guard.is_some() {
            debug!("Already connected, ignoring connect request");
            return Ok(());
        }

        let backend = self.backend.clone();
        let target = config.clone();
        let opened = tokio::task::spawn_blocking(move || {
            let link = backend.open(&target.port, target.baud_rate, target.read_timeout)?;
            let reader_link = link.try_clone().map_err(|e| MonitorError::PortUnavailable {
                port: target.port.to_string(),
                source: e,
            })?;
            Ok::<_, MonitorError>((link, reader_link))
        })
        .await
        .map_err(MonitorError::from)
        .and_then(|result| result);

        let (link, reader_link) = match opened {
            Ok(handles) => handles,
            Err(e) => {
                warn!(error = %e, "Connection failed");
                self.sink.log(format!("Connection failed: {e}"));
                return Err(e);
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // Logged before the reader starts so it precedes any RX line.
        self.sink.log(format!("Connected to {}", config.port));
        info!("Serial session opened");

        let reader = LineReader::start(
            reader_link,
            self.reader_settings,
            line_handler(self.sink.clone()),
            failure_handler(Arc::downgrade(&self.session), self.sink.clone(), id),
        );

        *guard = Some(Session {
            id,
            port: config.port,
            link: Arc::new(Mutex::new(link)),
            reader,
        });
        Ok(())
    }

    /// Stop the reader, close the port and return to `Disconnected`.
    ///
    /// Does nothing when already disconnected.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        let session = self.session.lock().await.take();
        match session {
            Some(session) => self.teardown(session).await,
            None => debug!("Not connected, ignoring disconnect request"),
        }
    }

    /// Send `text` followed by a newline.
    ///
    /// While disconnected this is a no-op: nothing is written and nothing is
    /// logged. The write runs on the blocking pool, so the session lock is not
    /// held while the port flushes. A write failure is logged, forces a
    /// disconnect before returning, and is handed back to the caller.
    pub async fn send_command(&self, text: &str) -> MonitorResult<()> {
        let (id, link) = match self.session.lock().await.as_ref() {
            Some(session) => (session.id, session.link.clone()),
            None => {
                debug!(command = text, "Not connected, command dropped");
                return Ok(());
            }
        };

        let payload = format!("{text}\n");
        let written =
            tokio::task::spawn_blocking(move || link.blocking_lock().write_all(payload.as_bytes()))
                .await?;

        match written {
            Ok(()) => {
                self.sink.log(format!("TX: {text}"));
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, command = text, "Serial write failed");
                self.sink.log(format!("Send failed: {e}"));
                let session = {
                    let mut guard = self.session.lock().await;
                    // Someone else may have closed or replaced it meanwhile.
                    if guard.as_ref().is_some_and(|s| s.id == id) {
                        guard.take()
                    } else {
                        None
                    }
                };
                if let Some(session) = session {
                    self.teardown(session).await;
                }
                Err(MonitorError::Io(e))
            }
        }
    }

    async fn teardown(&self, session: Session) {
        let Session {
            id,
            port,
            link,
            reader,
        } = session;

        // Reader first: the port must not close under an in-flight read.
        if let Err(e) = reader.stop().await {
            warn!(session = id, error = %e, "Line reader did not shut down cleanly");
        }
        drop(link);

        info!(session = id, port = %port, "Serial session closed");
        self.sink.log("Disconnected");
    }
}

/// Log every received line and forward whatever the parser recognises.
fn line_handler(sink: EventSink) -> impl FnMut(String) + Send + 'static {
    move |line: String| {
        sink.log(format!("RX: {line}"));
        if let Some(reading) = parse_reading(&line) {
            sink.reading(reading);
        }
    }
}

/// Runs on the reader thread when a read fails: log it once and drop the
/// session, unless it was already replaced or torn down.
///
/// Holds the session weakly: the session owns the reader, and a strong
/// reference here would keep a dropped manager's reader alive.
fn failure_handler(
    session: Weak<Mutex<Option<Session>>>,
    sink: EventSink,
    id: u64,
) -> impl FnOnce(io::Error) + Send + 'static {
    move |err: io::Error| {
        warn!(session = id, error = %err, "Serial read failed");
        sink.log(format!("Read error: {err}"));

        let Some(session) = session.upgrade() else {
            return;
        };
        let mut guard = session.blocking_lock();
        if guard.as_ref().is_some_and(|s| s.id == id) {
            // The reader is this thread and is about to return, so there is
            // nothing to join; dropping the handle detaches it.
            let dead = guard.take();
            drop(guard);
            drop(dead);
            sink.log("Disconnected");
        }
    }
}
