//! Per-volume diagnostic sinks.
//!
//! Engines never log through a shared global: every volume handle carries its
//! own sink so that messages from several open volumes stay attributed to the
//! right image.

use log::Level;
use std::sync::Mutex;

/// Destination for the diagnostics emitted while decoding one volume.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, level: Level, message: &str);

    fn warn(&self, message: &str) {
        self.record(Level::Warn, message);
    }

    fn info(&self, message: &str) {
        self.record(Level::Info, message);
    }

    fn debug(&self, message: &str) {
        self.record(Level::Debug, message);
    }
}

/// Forwards diagnostics to the `log` facade, tagged with the volume label.
pub struct LogSink {
    label: String,
}

impl LogSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl DiagnosticSink for LogSink {
    fn record(&self, level: Level, message: &str) {
        log::log!(target: "fs_forensics::volume", level, "[{}] {}", self.label, message);
    }
}

/// Keeps diagnostics in memory, in emission order.
#[derive(Default)]
pub struct MemorySink {
    messages: Mutex<Vec<(Level, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every recorded message.
    pub fn messages(&self) -> Vec<(Level, String)> {
        match self.messages.lock() {
            Ok(messages) => messages.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Returns the recorded messages at `level`.
    pub fn at_level(&self, level: Level) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, level: Level, message: &str) {
        let mut messages = match self.messages.lock() {
            Ok(messages) => messages,
            Err(poisoned) => poisoned.into_inner(),
        };
        messages.push((level, message.to_string()));
    }
}
