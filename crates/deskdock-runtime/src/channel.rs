//! Shared serial channel
//!
//! One open link shared by every task of a session. Each write (a message line, a raw
//! token or a payload chunk) is performed together with its flush under the writer lock,
//! so lines from concurrent producers never interleave. Reads go through a single line
//! reader behind its own lock.
//!
//! The transfer gate layers message-cycle granularity on top: telemetry producers and the
//! command reader take a [`shared`](SharedChannel::shared) guard for one cycle, while an
//! icon transfer takes the [`exclusive`](SharedChannel::exclusive) guard for the whole
//! announce/ready/payload/done exchange.

use deskdock_core::{DeskdockError, DeskdockResult, OutboundMessage, TransportError};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{trace, warn};

use crate::link::{is_idle_read, LinkPair, LinkReader, LinkWriter};

/// Sleep between empty reads while waiting for a line
const IDLE_POLL: Duration = Duration::from_millis(2);

const READ_BUFFER_LEN: usize = 512;

// ----------------------------------------------------------------------------
// Channel Statistics
// ----------------------------------------------------------------------------

/// Counters for one channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub writes: u64,
    pub bytes_written: u64,
    pub lines_read: u64,
    /// Lines dropped for exceeding the maximum length
    pub lines_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    writes: AtomicU64,
    bytes_written: AtomicU64,
    lines_read: AtomicU64,
    lines_dropped: AtomicU64,
}

// ----------------------------------------------------------------------------
// Line Reader
// ----------------------------------------------------------------------------

struct LineReader {
    link: Box<dyn LinkReader>,
    pending: Vec<u8>,
    /// Set after an unterminated overflow; bytes are dropped through the next newline
    discarding: bool,
    max_line_len: usize,
    counters: Arc<Counters>,
}

impl LineReader {
    /// Pop the next complete, non-empty line out of `pending`
    fn take_line(&mut self) -> Option<String> {
        if self.discarding {
            match self.pending.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.pending.drain(..=pos);
                    self.discarding = false;
                }
                None => {
                    self.pending.clear();
                    return None;
                }
            }
        }

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let len = content_len(&raw);
            if len > self.max_line_len {
                warn!("Dropping {} byte inbound line over the length limit", len);
                self.counters.lines_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let line = String::from_utf8_lossy(&raw)
                .trim_end_matches(['\r', '\n'])
                .to_string();
            if line.trim().is_empty() {
                continue;
            }
            self.counters.lines_read.fetch_add(1, Ordering::Relaxed);
            return Some(line);
        }

        if content_len(&self.pending) > self.max_line_len {
            warn!(
                "Discarding {} buffered bytes without a line terminator",
                self.pending.len()
            );
            self.counters.lines_dropped.fetch_add(1, Ordering::Relaxed);
            self.pending.clear();
            self.discarding = true;
        }
        None
    }

    /// Read once from the link into `pending`; returns the byte count
    fn fill(&mut self) -> io::Result<usize> {
        let mut buf = [0u8; READ_BUFFER_LEN];
        match self.link.read_bytes(&mut buf) {
            Ok(n) => {
                self.pending.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            Err(e) if is_idle_read(&e) => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            if self.fill()? > 0 {
                continue;
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(IDLE_POLL.min(deadline - now));
        }
    }

    /// Everything buffered plus whatever one read returns
    fn read_raw(&mut self) -> io::Result<Vec<u8>> {
        self.fill()?;
        Ok(std::mem::take(&mut self.pending))
    }

    /// Queue bytes that were read off the link before this reader took over
    fn seed(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.pending.len() + self.link.bytes_available()?)
    }

    fn discard(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.discarding = false;
        self.link.discard_input()
    }
}

/// Line length without the `\r\n` / `\n` terminator
fn content_len(raw: &[u8]) -> usize {
    let mut len = raw.len();
    while len > 0 && matches!(raw[len - 1], b'\r' | b'\n') {
        len -= 1;
    }
    len
}

// ----------------------------------------------------------------------------
// Shared Channel
// ----------------------------------------------------------------------------

/// Serialized access to one open link
pub struct SharedChannel {
    port: String,
    reader: Arc<Mutex<LineReader>>,
    writer: Arc<Mutex<Box<dyn LinkWriter>>>,
    gate: RwLock<()>,
    closed: AtomicBool,
    counters: Arc<Counters>,
}

impl SharedChannel {
    /// Wrap an opened link; lines longer than `max_line_len` are dropped
    pub fn new(link: LinkPair, max_line_len: usize) -> Self {
        let counters = Arc::new(Counters::default());
        Self {
            port: link.port,
            reader: Arc::new(Mutex::new(LineReader {
                link: link.reader,
                pending: Vec::new(),
                discarding: false,
                max_line_len: max_line_len.max(1),
                counters: Arc::clone(&counters),
            })),
            writer: Arc::new(Mutex::new(link.writer)),
            gate: RwLock::new(()),
            closed: AtomicBool::new(false),
            counters,
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Whether an I/O error has already been observed on the link
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            writes: self.counters.writes.load(Ordering::Relaxed),
            bytes_written: self.counters.bytes_written.load(Ordering::Relaxed),
            lines_read: self.counters.lines_read.load(Ordering::Relaxed),
            lines_dropped: self.counters.lines_dropped.load(Ordering::Relaxed),
        }
    }

    // ------------------------------------------------------------------------
    // Transfer Gate
    // ------------------------------------------------------------------------

    /// Guard for one telemetry or command cycle
    pub async fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().await
    }

    /// Guard for a complete icon transfer; waits for in-flight cycles to finish
    pub async fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().await
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Write one message as a newline-terminated JSON line
    pub async fn send(&self, message: &OutboundMessage) -> DeskdockResult<()> {
        let line = message.to_line()?;
        trace!("-> {}", line.trim_end());
        self.write_raw(line.into_bytes()).await
    }

    /// Write bytes verbatim and flush
    pub async fn write_raw(&self, bytes: Vec<u8>) -> DeskdockResult<()> {
        let len = bytes.len() as u64;
        self.with_writer(move |writer| {
            writer.write_bytes(&bytes)?;
            writer.flush_output()
        })
        .await?;
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_written.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Next inbound line without its terminator, or `None` if none arrived in `timeout`
    pub async fn read_line(&self, timeout: Duration) -> DeskdockResult<Option<String>> {
        let line = self
            .with_reader(move |reader| reader.read_line(timeout))
            .await?;
        if let Some(line) = &line {
            trace!("<- {}", line);
        }
        Ok(line)
    }

    /// Raw inbound bytes currently available, possibly empty
    pub async fn read_raw(&self) -> DeskdockResult<Vec<u8>> {
        self.with_reader(LineReader::read_raw).await
    }

    /// Put bytes already taken off the link back in front of the next read
    pub async fn seed_input(&self, bytes: Vec<u8>) -> DeskdockResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.with_reader(move |reader| {
            reader.seed(&bytes);
            Ok(())
        })
        .await
    }

    pub async fn bytes_available(&self) -> DeskdockResult<usize> {
        self.with_reader(LineReader::bytes_available).await
    }

    /// Drop every pending inbound byte
    pub async fn discard_input(&self) -> DeskdockResult<()> {
        self.with_reader(LineReader::discard).await
    }

    // ------------------------------------------------------------------------
    // Blocking Pool Plumbing
    // ------------------------------------------------------------------------

    async fn with_reader<T, F>(&self, op: F) -> DeskdockResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut LineReader) -> io::Result<T> + Send + 'static,
    {
        self.ensure_open()?;
        let reader = Arc::clone(&self.reader);
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = reader
                .lock()
                .map_err(|_| io::Error::other("reader lock poisoned"))?;
            op(&mut *guard)
        })
        .await
        .map_err(|_| DeskdockError::Transport(TransportError::Closed))?;
        self.check(result)
    }

    async fn with_writer<T, F>(&self, op: F) -> DeskdockResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Box<dyn LinkWriter>) -> io::Result<T> + Send + 'static,
    {
        self.ensure_open()?;
        let writer = Arc::clone(&self.writer);
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = writer
                .lock()
                .map_err(|_| io::Error::other("writer lock poisoned"))?;
            op(&mut *guard)
        })
        .await
        .map_err(|_| DeskdockError::Transport(TransportError::Closed))?;
        self.check(result)
    }

    fn ensure_open(&self) -> DeskdockResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed.into());
        }
        Ok(())
    }

    fn check<T>(&self, result: io::Result<T>) -> DeskdockResult<T> {
        result.map_err(|e| {
            self.closed.store(true, Ordering::Release);
            DeskdockError::io(e)
        })
    }
}

impl std::fmt::Debug for SharedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedChannel")
            .field("port", &self.port)
            .field("closed", &self.is_closed())
            .finish()
    }
}
