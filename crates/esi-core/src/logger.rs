//! Diagnostic output sink
//!
//! The processor writes user-facing diagnostics (such as the insecure
//! allow-all warning) to a [`LogSink`]. By default nothing is written.

use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use tracing::warn;

/// Destination for diagnostic messages
pub trait LogSink: Send + Sync {
    fn write(&self, message: &str);
}

/// Forwards messages to `tracing` at `warn` level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, message: &str) {
        warn!(target: "esi", "{}", message);
    }
}

/// Writes messages verbatim to an `io::Write` (a file, stderr, a buffer)
pub struct WriterSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Consume the sink and return the writer
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> LogSink for WriterSink<W> {
    fn write(&self, message: &str) {
        let mut writer = self.writer.lock();
        if let Err(e) = writer.write_all(message.as_bytes()).and_then(|_| writer.flush()) {
            warn!("Failed to write log output: {}", e);
        }
    }
}

/// Pass-through handle to the configured sink
#[derive(Clone, Default)]
pub struct Logger {
    output: Option<Arc<dyn LogSink>>,
}

impl Logger {
    pub fn new(output: Option<Arc<dyn LogSink>>) -> Self {
        Self { output }
    }

    pub fn write(&self, message: &str) {
        if let Some(output) = &self.output {
            output.write(message);
        }
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("enabled", &self.output.is_some())
            .finish()
    }
}
