//! Global, process-wide ring buffer of log entries with non-blocking
//! subscriber fan-out and a legacy line-oriented `Write` sink.
//!
//! Structured call sites use [`LogBuffer::add`] directly; code that can
//! only produce free-text lines (older loggers) goes through the
//! [`std::io::Write`] implementation, which extracts a `[source]`
//! prefix and guesses the level from keywords before delegating to
//! `add`.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use bridge_protocol::{LogEntry, LogLevel};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

/// Default ring capacity when none is configured.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Depth of each subscriber's delivery channel. A slow subscriber drops
/// entries rather than backing up the buffer.
const SUBSCRIBER_CHANNEL_DEPTH: usize = 256;

struct Subscriber {
    filter: LogLevel,
    tx: mpsc::Sender<LogEntry>,
}

struct Ring {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Ring {
    fn push(&mut self, entry: LogEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }
}

/// The log buffer. One instance lives for the lifetime of the engine
/// and is shared (via `Arc`) by every component that logs through it.
pub struct LogBuffer {
    ring: Mutex<Ring>,
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        LogBuffer {
            ring: Mutex::new(Ring { entries: VecDeque::with_capacity(capacity), capacity }),
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Append a structured entry, emit it to `tracing`, and fan it out
    /// to subscribers whose filter admits this level.
    pub fn add(&self, level: LogLevel, source: impl Into<String>, message: impl Into<String>) {
        let source = source.into();
        let message = message.into();
        let entry = LogEntry {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            timestamp: now_ms(),
            level,
            source: source.clone(),
            message: message.clone(),
        };
        match level {
            LogLevel::Debug => tracing::debug!(source = %source, "{message}"),
            LogLevel::Info => tracing::info!(source = %source, "{message}"),
            LogLevel::Warn => tracing::warn!(source = %source, "{message}"),
            LogLevel::Error => tracing::error!(source = %source, "{message}"),
        }
        self.ring.lock().push(entry.clone());
        self.deliver(entry);
    }

    fn deliver(&self, entry: LogEntry) {
        // Snapshot under a brief read lock, then release it before sending
        // so a blocked subscriber pump can never hold up a writer.
        let subs: Vec<(LogLevel, mpsc::Sender<LogEntry>)> = {
            let guard = self.subscribers.read();
            guard.values().map(|s| (s.filter, s.tx.clone())).collect()
        };
        for (filter, tx) in subs {
            if entry.level >= filter {
                let _ = tx.try_send(entry.clone());
            }
        }
    }

    /// Open a subscription. Entries at or above `filter` are delivered
    /// non-blockingly; a full channel silently drops the entry for this
    /// subscriber only (slow-consumer isolation).
    pub fn subscribe(&self, id: u64, filter: LogLevel) -> mpsc::Receiver<LogEntry> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_DEPTH);
        self.subscribers.write().insert(id, Subscriber { filter, tx });
        rx
    }

    /// Idempotent: unsubscribing an unknown id is a no-op.
    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.write().remove(&id);
    }

    /// Current number of open subscriptions (used by tests and the
    /// engine's introspection surface).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Last `n` entries in chronological order, clipped to the buffer's
    /// current size.
    pub fn get_last(&self, n: usize) -> Vec<LogEntry> {
        let ring = self.ring.lock();
        let len = ring.entries.len();
        let skip = len.saturating_sub(n);
        ring.entries.iter().skip(skip).cloned().collect()
    }

    /// All entries with `id` strictly greater than `since`.
    pub fn get_since(&self, since: u64) -> Vec<LogEntry> {
        self.ring.lock().entries.iter().filter(|e| e.id > since).cloned().collect()
    }

    /// Entries at or above `level`, optionally restricted to an exact
    /// `source` match, up to `limit` most-recent matches in
    /// chronological order.
    pub fn get_filtered(&self, level: LogLevel, source: Option<&str>, limit: usize) -> Vec<LogEntry> {
        let ring = self.ring.lock();
        let matches: Vec<LogEntry> = ring
            .entries
            .iter()
            .filter(|e| e.level >= level)
            .filter(|e| source.map_or(true, |s| e.source == s))
            .cloned()
            .collect();
        let skip = matches.len().saturating_sub(limit);
        matches.into_iter().skip(skip).collect()
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Adapts a [`LogBuffer`] to `std::io::Write` for legacy line-oriented
/// loggers. Each `write` call is expected to carry one or more
/// newline-terminated lines; each line is parsed for a leading
/// `[source]` tag and a level keyword before being handed to `add`.
pub struct LineSink<'a> {
    buffer: &'a LogBuffer,
}

impl<'a> LineSink<'a> {
    pub fn new(buffer: &'a LogBuffer) -> Self {
        LineSink { buffer }
    }
}

impl io::Write for LineSink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let (source, message) = split_source_prefix(line);
            let level = LogLevel::from_keyword(line);
            self.buffer.add(level, source, message);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Splits a `"[source] message"` line into its tag and remainder. Lines
/// without a recognised `[...]` prefix are attributed to `"legacy"`.
fn split_source_prefix(line: &str) -> (&str, &str) {
    if let Some(rest) = line.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            let source = &rest[..end];
            let message = rest[end + 1..].trim_start();
            return (source, message);
        }
    }
    ("legacy", line)
}
