//! Job trace sink — human-readable build-log lines produced for the caller.
//!
//! Operator-facing diagnostics go through `tracing`; everything a CI user is
//! meant to see in the job log goes through this sink.

use std::sync::Mutex;

pub trait TraceSink: Send + Sync {
    /// Informational line in the job log.
    fn println(&self, line: &str);
    /// Warning line in the job log.
    fn warning(&self, line: &str);
    /// Error line in the job log.
    fn error(&self, line: &str);
}

/// Sink that drops everything. Useful as a default.
pub struct NullTrace;

impl TraceSink for NullTrace {
    fn println(&self, _line: &str) {}
    fn warning(&self, _line: &str) {}
    fn error(&self, _line: &str) {}
}

/// Sink that buffers lines in memory. Used by tests and by callers that
/// forward the trace elsewhere in batches.
#[derive(Default)]
pub struct BufferedTrace {
    lines: Mutex<Vec<String>>,
}

impl BufferedTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }

    fn push(&self, prefix: &str, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(format!("{}{}", prefix, line));
    }
}

impl TraceSink for BufferedTrace {
    fn println(&self, line: &str) {
        self.push("", line);
    }

    fn warning(&self, line: &str) {
        self.push("WARNING: ", line);
    }

    fn error(&self, line: &str) {
        self.push("ERROR: ", line);
    }
}
