//! Fan-out of formatted log lines to live subscribers.

use std::io;
use std::pin::Pin;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::task::{Context, Poll};

use dashmap::DashMap;
use flume::{Sender, TrySendError};
use futures::{stream::BoxStream, Stream, StreamExt};
use tracing_subscriber::{
    filter::LevelFilter, fmt, fmt::MakeWriter, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Lines buffered per subscriber; a subscriber that falls further behind
/// misses lines rather than slowing down logging.
pub const SUBSCRIBER_BUFFER: usize = 1024;

#[derive(Debug, Default)]
struct Registry {
    next_id: AtomicU64,
    sinks: DashMap<u64, Sender<String>>,
}

#[derive(Debug, Clone, Default)]
/// Registry of log line subscribers.
///
/// Usable as a [MakeWriter], so a `tracing_subscriber` fmt layer can write
/// into it. Must not log itself.
pub struct EventLog {
    registry: Arc<Registry>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every line published from now on, until the returned
    /// [Subscription] is dropped.
    pub fn subscribe(&self) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = flume::bounded(SUBSCRIBER_BUFFER);

        self.registry.sinks.insert(id, sender);

        Subscription {
            id,
            log: self.clone(),
            lines: receiver.into_stream().boxed(),
        }
    }

    pub fn publish(&self, line: &str) {
        if self.registry.sinks.is_empty() {
            return;
        }

        self.registry
            .sinks
            .retain(|_, sink| match sink.try_send(line.to_string()) {
                Ok(()) | Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            });
    }

    pub fn subscribers(&self) -> usize {
        self.registry.sinks.len()
    }
}

/// Stream of log lines, unsubscribes on drop.
pub struct Subscription {
    id: u64,
    log: EventLog,
    lines: BoxStream<'static, String>,
}

impl Stream for Subscription {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.lines.poll_next_unpin(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.log.registry.sinks.remove(&self.id);
    }
}

/// Collects one formatted event and publishes its lines when dropped.
pub struct EventLogWriter {
    log: EventLog,
    buffer: Vec<u8>,
}

impl io::Write for EventLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for EventLogWriter {
    fn drop(&mut self) {
        let text = String::from_utf8_lossy(&self.buffer);

        for line in text.lines().filter(|line| !line.is_empty()) {
            self.log.publish(line);
        }
    }
}

impl<'a> MakeWriter<'a> for EventLog {
    type Writer = EventLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        EventLogWriter {
            log: self.clone(),
            buffer: Vec::new(),
        }
    }
}

/// Install the global subscriber: human readable logs on stderr, and the
/// same lines without colors into `log`.
///
/// `debug` lowers the level from INFO to DEBUG.
pub fn init_logging(
    debug: bool,
    log: &EventLog,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(log.clone()))
        .with(level)
        .try_init()
}
