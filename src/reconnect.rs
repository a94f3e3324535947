//! Auto-reconnect controller.
//!
//! When armed, a tokio task ticks immediately and then once per period. Each
//! tick does nothing while a session is open; otherwise it enumerates ports,
//! probes each candidate in order (a brief open and close with a short
//! timeout), and connects to the first one that answers. That connect is the
//! tick's only one: if it fails the tick ends and the next tick starts over.
//! A successful connect disarms the controller.
//!
//! Disarming only stops future ticks. It never closes an established session
//! and does not interrupt an attempt that is already running. `Auto-connect
//! stopped` is logged exactly once per armed loop, by `disarm` itself or by the
//! loop when it ends on a successful connect.

use crate::connection::ConnectionManager;
use crate::core::{BaudRate, ConnectionConfig, PortDescriptor, DEFAULT_READ_TIMEOUT};
use crate::events::EventSink;
use crate::transport::SerialBackend;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Default time between attempts.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(2);
/// Default timeout for the availability probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// Controller tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectSettings {
    /// Time between attempts.
    pub period: Duration,
    /// Timeout for the availability probe.
    pub probe_timeout: Duration,
    /// Read timeout of the connection that is finally opened.
    pub read_timeout: Duration,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Outcome of a single tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// A session was already open.
    AlreadyConnected,
    /// Enumeration returned nothing.
    NoPorts,
    /// Every candidate failed its probe.
    NoCandidate,
    /// A candidate answered its probe but the connect that followed failed.
    ConnectFailed(PortDescriptor),
    /// The controller was disarmed before a candidate was committed to.
    Cancelled,
    /// Connected to this port.
    Connected(PortDescriptor),
}

#[derive(Clone)]
struct Worker {
    manager: ConnectionManager,
    backend: Arc<dyn SerialBackend>,
    sink: EventSink,
    settings: ReconnectSettings,
}

impl Worker {
    async fn attempt(&self, baud_rate: BaudRate, cancel: &watch::Receiver<bool>) -> Attempt {
        if self.manager.is_connected().await {
            return Attempt::AlreadyConnected;
        }

        let ports = self.backend.list_ports();
        if ports.is_empty() {
            self.sink.log("Auto-connect: No ports available");
            return Attempt::NoPorts;
        }

        for port in ports {
            if *cancel.borrow() {
                return Attempt::Cancelled;
            }
            self.sink.log(format!("Auto-connect: Trying {port}"));

            let backend = self.backend.clone();
            let probe_port = port.clone();
            let timeout = self.settings.probe_timeout;
            let probed = tokio::task::spawn_blocking(move || {
                backend.probe(&probe_port, baud_rate, timeout)
            })
            .await;
            match probed {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(port = %port, error = %e, "Probe failed");
                    continue;
                }
                Err(e) => {
                    debug!(port = %port, error = %e, "Probe task failed");
                    continue;
                }
            }

            let config = ConnectionConfig::new(port.clone(), baud_rate)
                .with_read_timeout(self.settings.read_timeout);
            // The manager logs a failed connect itself.
            return match self.manager.connect(config).await {
                Ok(()) => {
                    self.sink.log(format!("Auto-connect: Connected to {port}"));
                    Attempt::Connected(port)
                }
                Err(_) => Attempt::ConnectFailed(port),
            };
        }

        self.sink.log("Auto-connect: No available port found");
        Attempt::NoCandidate
    }

    async fn run(self, baud_rate: BaudRate, mut cancel: watch::Receiver<bool>, stopped: Arc<AtomicBool>) {
        let mut ticker = interval(self.settings.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                // Also fires when the controller is dropped.
                _ = cancel.changed() => break,
                _ = ticker.tick() => {}
            }
            if *cancel.borrow() {
                break;
            }
            let outcome = self.attempt(baud_rate, &cancel).await;
            debug!(?outcome, "Auto-connect tick");
            if matches!(outcome, Attempt::Connected(_)) {
                break;
            }
        }

        info!("Auto-connect loop finished");
        announce_stop(&stopped, &self.sink);
    }
}

/// Log `Auto-connect stopped` unless it was already logged for this loop.
fn announce_stop(stopped: &AtomicBool, sink: &EventSink) {
    if !stopped.swap(true, Ordering::SeqCst) {
        sink.log("Auto-connect stopped");
    }
}

struct ArmedLoop {
    cancel: watch::Sender<bool>,
    stopped: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// The auto-reconnect controller.
pub struct AutoReconnect {
    worker: Worker,
    armed: Mutex<Option<ArmedLoop>>,
}

impl AutoReconnect {
    /// Controller that connects through `manager`.
    pub fn new(
        manager: ConnectionManager,
        backend: Arc<dyn SerialBackend>,
        sink: EventSink,
        settings: ReconnectSettings,
    ) -> Self {
        Self {
            worker: Worker {
                manager,
                backend,
                sink,
                settings,
            },
            armed: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<ArmedLoop>> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the loop at `baud_rate`. No-op if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(&self, baud_rate: BaudRate) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|l| !l.handle.is_finished()) {
            debug!("Auto-connect already armed");
            return;
        }

        info!(baud = %baud_rate, "Arming auto-connect");
        self.worker.sink.log("Auto-connect started");
        let (cancel, cancel_rx) = watch::channel(false);
        let stopped = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(self.worker.clone().run(baud_rate, cancel_rx, stopped.clone()));
        *slot = Some(ArmedLoop {
            cancel,
            stopped,
            handle,
        });
    }

    /// Stop future attempts. Idempotent.
    ///
    /// `Auto-connect stopped` is logged before this returns, so it precedes
    /// anything the caller logs next.
    pub fn disarm(&self) {
        if let Some(armed) = self.slot().take() {
            // Err means the loop already finished on its own.
            let _ = armed.cancel.send(true);
            announce_stop(&armed.stopped, &self.worker.sink);
        }
    }

    /// Whether the loop is running.
    pub fn is_armed(&self) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|l| !l.handle.is_finished())
    }

    /// Run a single attempt now, independent of the timer.
    pub async fn attempt(&self, baud_rate: BaudRate) -> Attempt {
        let (_keep, never_cancelled) = watch::channel(false);
        self.worker.attempt(baud_rate, &never_cancelled).await
    }
}

impl Drop for AutoReconnect {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{self, ClientEvents};
    use crate::mock::MockSerial;
    use crate::reader::ReaderSettings;

    fn controller(backend: &MockSerial) -> (AutoReconnect, ConnectionManager, ClientEvents) {
        let backend: Arc<dyn SerialBackend> = Arc::new(backend.clone());
        let (sink, events) = events::channel();
        let manager = ConnectionManager::new(backend.clone(), sink.clone(), ReaderSettings::default());
        let settings = ReconnectSettings {
            period: Duration::from_millis(50),
            probe_timeout: Duration::from_millis(10),
            read_timeout: Duration::from_millis(20),
        };
        let auto = AutoReconnect::new(manager.clone(), backend, sink, settings);
        (auto, manager, events)
    }

    fn texts(events: &mut ClientEvents) -> Vec<String> {
        events.drain_logs().into_iter().map(|e| e.text).collect()
    }

    #[tokio::test]
    async fn attempt_without_ports() {
        let (auto, _manager, mut events) = controller(&MockSerial::new());
        assert_eq!(auto.attempt(BaudRate::B115200).await, Attempt::NoPorts);
        assert_eq!(texts(&mut events), ["Auto-connect: No ports available"]);
    }

    #[tokio::test]
    async fn attempt_connects_to_first_answering_port() {
        let backend = MockSerial::new();
        let busy = backend.add_device("COM1");
        busy.set_busy(true);
        let free = backend.add_device("COM2");
        let (auto, manager, mut events) = controller(&backend);

        let outcome = auto.attempt(BaudRate::B9600).await;
        assert_eq!(outcome, Attempt::Connected(PortDescriptor::new("COM2")));
        assert!(manager.is_connected().await);
        assert_eq!(busy.probe_count(), 1);
        assert_eq!(busy.open_count(), 0);
        // One probe open, one session open.
        assert_eq!(free.open_count(), 2);
        assert_eq!(free.last_baud(), Some(BaudRate::B9600));
        assert_eq!(
            texts(&mut events),
            [
                "Auto-connect: Trying COM1",
                "Auto-connect: Trying COM2",
                "Connected to COM2",
                "Auto-connect: Connected to COM2",
            ]
        );

        manager.disconnect().await;
    }

    #[tokio::test]
    async fn attempt_reports_no_candidate() {
        let backend = MockSerial::new();
        backend.add_device("COM1").set_busy(true);
        let (auto, manager, mut events) = controller(&backend);

        assert_eq!(auto.attempt(BaudRate::B115200).await, Attempt::NoCandidate);
        assert!(!manager.is_connected().await);
        assert_eq!(
            texts(&mut events).last().map(String::as_str),
            Some("Auto-connect: No available port found")
        );
    }

    #[tokio::test]
    async fn failed_connect_after_probe_ends_the_tick() {
        let backend = MockSerial::new();
        let grabbed = backend.add_device("COM1");
        grabbed.reject_sessions(true);
        let spare = backend.add_device("COM2");
        let (auto, manager, mut events) = controller(&backend);

        let outcome = auto.attempt(BaudRate::B115200).await;
        assert_eq!(outcome, Attempt::ConnectFailed(PortDescriptor::new("COM1")));
        assert!(!manager.is_connected().await);
        assert_eq!(spare.probe_count(), 0);
        assert_eq!(spare.open_count(), 0);

        let logs = texts(&mut events);
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0], "Auto-connect: Trying COM1");
        assert!(logs[1].starts_with("Connection failed: "));
    }

    #[tokio::test]
    async fn disarm_logs_stop_before_returning() {
        let (auto, _manager, mut events) = controller(&MockSerial::new());
        auto.arm(BaudRate::B115200);
        auto.disarm();

        // Nothing has been awaited, so the loop task has not run yet.
        assert_eq!(texts(&mut events), ["Auto-connect started", "Auto-connect stopped"]);
    }

    #[tokio::test]
    async fn attempt_while_connected_touches_nothing() {
        let backend = MockSerial::new();
        let dev = backend.add_device("COM3");
        let (auto, manager, mut events) = controller(&backend);
        manager
            .connect(ConnectionConfig::new("COM3", BaudRate::B115200))
            .await
            .unwrap();
        events.drain_logs();

        assert_eq!(auto.attempt(BaudRate::B115200).await, Attempt::AlreadyConnected);
        assert_eq!(dev.probe_count(), 0);
        assert!(texts(&mut events).is_empty());

        manager.disconnect().await;
    }

    #[tokio::test]
    async fn arm_twice_starts_one_loop() {
        let (auto, _manager, mut events) = controller(&MockSerial::new());
        auto.arm(BaudRate::B115200);
        auto.arm(BaudRate::B115200);
        assert!(auto.is_armed());

        auto.disarm();
        auto.disarm();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!auto.is_armed());

        let logs = texts(&mut events);
        assert_eq!(logs.iter().filter(|t| *t == "Auto-connect started").count(), 1);
        assert_eq!(logs.iter().filter(|t| *t == "Auto-connect stopped").count(), 1);
    }
}
