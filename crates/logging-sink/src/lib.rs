//! A small, process-global pluggable log sink.
//!
//! The session driver never prints directly; every diagnostic goes through
//! an installed [`LogSink`]. This mirrors the reference client's log-ID
//! enum (Debug/Trace/Info/Warning/Error/Fatal/Assert) while giving the host
//! application (CLI, test harness, GUI) a single seam to redirect output.

use std::sync::OnceLock;

/// Severity of a log record, ordered from least to most severe.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum Level {
    /// Fine-grained tracing, normally compiled out in release builds.
    Trace,
    /// Debug-oriented detail useful when diagnosing a specific session.
    Debug,
    /// Routine progress information (e.g. "Download starting...").
    Info,
    /// Something unexpected happened but the session can continue.
    Warning,
    /// A per-entry operation failed; the session continues with other entries.
    Error,
    /// The session cannot continue and is about to unwind.
    Fatal,
}

/// One log record passed to a [`LogSink`].
#[derive(Clone, Debug)]
pub struct LogRecord<'a> {
    /// Severity of this record.
    pub level: Level,
    /// Stable identifier for the call site, useful for filtering (e.g. `"RSYNC_CHECKSUM"`).
    pub id: &'static str,
    /// Human-readable message.
    pub message: &'a str,
}

/// Destination for log records produced by the session driver.
pub trait LogSink: Send + Sync {
    /// Handles one log record.
    fn log(&self, record: &LogRecord<'_>);
}

/// Default sink that forwards every record to `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, record: &LogRecord<'_>) {
        match record.level {
            Level::Trace => tracing::trace!(id = record.id, "{}", record.message),
            Level::Debug => tracing::debug!(id = record.id, "{}", record.message),
            Level::Info => tracing::info!(id = record.id, "{}", record.message),
            Level::Warning => tracing::warn!(id = record.id, "{}", record.message),
            Level::Error | Level::Fatal => tracing::error!(id = record.id, "{}", record.message),
        }
    }
}

static SINK: OnceLock<Box<dyn LogSink>> = OnceLock::new();

/// Installs the process-wide log sink. Only the first call takes effect;
/// subsequent calls are ignored, mirroring `tracing`'s own subscriber
/// installation semantics.
pub fn install(sink: Box<dyn LogSink>) {
    let _ = SINK.set(sink);
}

/// Emits a record through the installed sink, falling back to [`TracingSink`]
/// if nothing has been installed yet.
pub fn log(level: Level, id: &'static str, message: &str) {
    let record = LogRecord { level, id, message };
    match SINK.get() {
        Some(sink) => sink.log(&record),
        None => TracingSink.log(&record),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingSink {
        records: Mutex<Vec<(Level, String)>>,
    }

    impl LogSink for CapturingSink {
        fn log(&self, record: &LogRecord<'_>) {
            self.records
                .lock()
                .unwrap()
                .push((record.level, record.message.to_string()));
        }
    }

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warning);
        assert!(Level::Warning < Level::Error);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn default_sink_does_not_panic_without_install() {
        log(Level::Info, "TEST", "no sink installed yet");
    }
}
