//! Background line reader.
//!
//! [`LineReader`] owns the read half of an open port and runs on the blocking
//! thread pool. It polls the port for available bytes, sleeps for a short poll
//! interval when there are none, and reassembles whatever arrives into
//! newline-delimited lines via [`LineBuffer`].
//!
//! Stopping is cooperative: [`LineReader::stop`] raises a flag that the worker
//! checks at least once per poll interval, then waits for the worker to return.
//! Once `stop` has returned the worker has released its port handle and will not
//! emit anything else.

use crate::error::MonitorResult;
use crate::transport::{is_timeout, SerialLink};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Default sleep between polls when no bytes are waiting.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

const READ_CHUNK: usize = 1024;

/// Reader tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderSettings {
    /// Sleep between polls when the port has nothing to read.
    pub poll_interval: Duration,
    /// Longest incomplete line kept before it is discarded. `None` keeps
    /// everything.
    pub max_line_len: Option<usize>,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_line_len: None,
        }
    }
}

// =============================================================================
// LineBuffer
// =============================================================================

/// Byte accumulator that splits a stream into trimmed text lines.
///
/// Between calls it holds at most one incomplete fragment. Bytes are kept raw
/// until a full line is available, so multi-byte characters split across reads
/// decode correctly; invalid UTF-8 is replaced rather than rejected.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    max_len: Option<usize>,
    /// Dropping bytes until the next newline after an overflow.
    resyncing: bool,
    discarded: usize,
}

impl LineBuffer {
    /// Unbounded buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer that discards an incomplete line longer than `max_len` bytes and
    /// resynchronises on the next newline.
    pub fn with_max_len(max_len: Option<usize>) -> Self {
        Self {
            max_len,
            ..Self::default()
        }
    }

    /// Append `bytes`, returning every line they complete, oldest first.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = bytes;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.resyncing {
                self.discarded += head.len() + 1;
                self.resyncing = false;
                continue;
            }

            self.pending.extend_from_slice(head);
            if self.over_limit() {
                self.discarded += self.pending.len() + 1;
                self.pending.clear();
                continue;
            }
            lines.push(String::from_utf8_lossy(&self.pending).trim().to_string());
            self.pending.clear();
        }

        if self.resyncing {
            self.discarded += rest.len();
        } else {
            self.pending.extend_from_slice(rest);
            if self.over_limit() {
                self.discarded += self.pending.len();
                self.pending.clear();
                self.resyncing = true;
            }
        }

        lines
    }

    /// Bytes held for an incomplete line.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Total bytes thrown away by the overflow policy.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    fn over_limit(&self) -> bool {
        self.max_len.is_some_and(|max| self.pending.len() > max)
    }
}

// =============================================================================
// LineReader
// =============================================================================

/// Why a reader worker returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    /// `stop` was requested.
    Stopped,
    /// A read failed; the failure handler has been called.
    Failed,
}

/// Handle to a running background reader.
///
/// Dropping the handle raises the stop flag without waiting, so a worker never
/// outlives its owner by more than one poll interval.
#[derive(Debug)]
pub struct LineReader {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<ReaderExit>>,
}

impl LineReader {
    /// Spawn a reader over `port`.
    ///
    /// `on_line` receives every completed line in arrival order. `on_failure` is
    /// called at most once, from the worker thread, if a read fails while the
    /// reader has not been asked to stop; the worker exits right after.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<L, F>(
        port: Box<dyn SerialLink>,
        settings: ReaderSettings,
        on_line: L,
        on_failure: F,
    ) -> Self
    where
        L: FnMut(String) + Send + 'static,
        F: FnOnce(io::Error) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = stop.clone();
        let handle = tokio::task::spawn_blocking(move || {
            run(port, settings, &worker_stop, on_line, on_failure)
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Ask the worker to stop and wait until it has returned.
    pub async fn stop(mut self) -> MonitorResult<ReaderExit> {
        self.stop.store(true, Ordering::SeqCst);
        let Some(handle) = self.handle.take() else {
            return Ok(ReaderExit::Stopped);
        };
        let exit = handle.await?;
        debug!(?exit, "Line reader finished");
        Ok(exit)
    }
}

impl Drop for LineReader {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn run<L, F>(
    mut port: Box<dyn SerialLink>,
    settings: ReaderSettings,
    stop: &AtomicBool,
    mut on_line: L,
    on_failure: F,
) -> ReaderExit
where
    L: FnMut(String),
    F: FnOnce(io::Error),
{
    let mut buffer = LineBuffer::with_max_len(settings.max_line_len);
    let mut chunk = vec![0u8; READ_CHUNK];

    while !stop.load(Ordering::SeqCst) {
        let read = port.bytes_available().and_then(|available| {
            if available == 0 {
                return Ok(0);
            }
            if available > chunk.len() {
                chunk.resize(available, 0);
            }
            port.read(&mut chunk[..available])
        });

        match read {
            Ok(0) => std::thread::sleep(settings.poll_interval),
            Ok(n) => {
                trace!(bytes = n, "Serial bytes received");
                let discarded_before = buffer.discarded();
                for line in buffer.push(&chunk[..n]) {
                    if stop.load(Ordering::SeqCst) {
                        return ReaderExit::Stopped;
                    }
                    on_line(line);
                }
                if buffer.discarded() > discarded_before {
                    warn!(
                        discarded = buffer.discarded() - discarded_before,
                        "Dropped over-long line fragment"
                    );
                }
            }
            Err(e) if is_timeout(&e) => continue,
            Err(e) => {
                // A failure racing with stop is just the port going away.
                if !stop.load(Ordering::SeqCst) {
                    on_failure(e);
                    return ReaderExit::Failed;
                }
                break;
            }
        }
    }

    ReaderExit::Stopped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BaudRate;
    use crate::mock::{MockDevice, MockSerial};
    use crate::transport::SerialBackend;
    use tokio::sync::{mpsc, oneshot};
    use tokio::time::timeout;

    fn open_mock(backend: &MockSerial, port: &str) -> (MockDevice, Box<dyn SerialLink>) {
        let device = backend.add_device(port);
        let link = backend
            .open(device.port(), BaudRate::B115200, Duration::from_millis(10))
            .unwrap();
        (device, link)
    }

    fn fast(max_line_len: Option<usize>) -> ReaderSettings {
        ReaderSettings {
            poll_interval: Duration::from_millis(2),
            max_line_len,
        }
    }

    #[test]
    fn splits_complete_lines_and_keeps_the_fragment() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push(b"V=1\nI=2\nP="), ["V=1", "I=2"]);
        assert_eq!(buf.pending_len(), 2);
        assert_eq!(buf.push(b"3\n"), ["P=3"]);
        assert_eq!(buf.pending_len(), 0);
    }

    #[test]
    fn reassembles_lines_across_chunks() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"12.1,0.5").is_empty());
        assert_eq!(buf.push(b",3.0\n"), ["12.1,0.5,3.0"]);
    }

    #[test]
    fn trims_whitespace_and_carriage_returns() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push(b"  rs ok \r\n\n"), ["rs ok", ""]);
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"V=\xff5\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("V="));
        assert!(lines[0].ends_with('5'));
    }

    #[test]
    fn multibyte_characters_survive_chunk_splits() {
        let mut buf = LineBuffer::new();
        let text = "T=25°C\n".as_bytes();
        // Split inside the two-byte degree sign.
        let split = text.iter().position(|&b| b == 0xC2).unwrap() + 1;
        assert!(buf.push(&text[..split]).is_empty());
        assert_eq!(buf.push(&text[split..]), ["T=25°C"]);
    }

    #[test]
    fn overflow_drops_fragment_and_resyncs() {
        let mut buf = LineBuffer::with_max_len(Some(8));
        assert!(buf.push(b"0123456789").is_empty());
        assert_eq!(buf.pending_len(), 0);
        // Tail of the oversized line is discarded up to its newline.
        assert_eq!(buf.push(b"abc\nV=5\n"), ["V=5"]);
        assert_eq!(buf.discarded(), 14);
    }

    #[test]
    fn overflow_inside_one_chunk() {
        let mut buf = LineBuffer::with_max_len(Some(4));
        assert_eq!(buf.push(b"toolong\nok\n"), ["ok"]);
        assert_eq!(buf.discarded(), 8);
    }

    #[test]
    fn unbounded_by_default() {
        let mut buf = LineBuffer::new();
        let long = vec![b'x'; 64 * 1024];
        assert!(buf.push(&long).is_empty());
        assert_eq!(buf.pending_len(), long.len());
    }

    #[tokio::test]
    async fn live_reader_drops_over_long_lines() {
        let backend = MockSerial::new();
        let (device, link) = open_mock(&backend, "COM1");
        let (tx, mut rx) = mpsc::unbounded_channel();

        device.feed(b"0123456789abcdef\nV=5\n");
        let reader = LineReader::start(
            link,
            fast(Some(8)),
            move |line| {
                let _ = tx.send(line);
            },
            |_| {},
        );

        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(first.as_deref(), Some("V=5"));
        assert_eq!(reader.stop().await.unwrap(), ReaderExit::Stopped);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_worker() {
        let backend = MockSerial::new();
        let (_device, link) = open_mock(&backend, "COM1");
        // Closed when the worker returns and drops its callbacks.
        let (alive, worker_gone) = oneshot::channel::<()>();

        let reader = LineReader::start(
            link,
            fast(None),
            move |_line| {
                let _ = &alive;
            },
            |_| {},
        );
        drop(reader);

        let closed = timeout(Duration::from_secs(1), worker_gone).await;
        assert!(matches!(closed, Ok(Err(_))));
    }
}
