//! Per-connection call tracing.
//!
//! A connection can ask for a trace of the engine calls it makes by
//! naming a sink in its open profile: a file path (opened for append),
//! or the literal `stderr` or `stdout`. The trace is cloned into the
//! driver so session setup and operations write to the same sink, and a
//! disabled trace costs a single pointer check per event.
//!
//! Tracing is best-effort. A sink that cannot be opened falls back to
//! stderr and write failures are swallowed; a trace never takes an
//! operation down with it.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

enum Sink {
    Stdout,
    Stderr,
    File(File),
}

struct Inner {
    sink: Mutex<Sink>,
}

/// Handle to a trace sink, cheap to clone and to carry around.
#[derive(Clone)]
pub struct Trace {
    inner: Option<Arc<Inner>>,
}

impl Trace {
    pub fn disabled() -> Trace {
        Trace { inner: None }
    }

    /// Build a trace from an open profile's debug field. Empty disables
    /// tracing entirely.
    pub fn from_spec(spec: &str) -> Trace {
        if spec.is_empty() {
            return Trace::disabled();
        }
        let sink = if spec.eq_ignore_ascii_case("stderr") {
            Sink::Stderr
        } else if spec.eq_ignore_ascii_case("stdout") {
            Sink::Stdout
        } else {
            match OpenOptions::new().create(true).append(true).open(spec) {
                Ok(file) => Sink::File(file),
                Err(_) => Sink::Stderr,
            }
        };
        let trace = Trace {
            inner: Some(Arc::new(Inner {
                sink: Mutex::new(sink),
            })),
        };
        trace.write_line(&format!(
            "mlink {} trace ({})",
            env!("CARGO_PKG_VERSION"),
            epoch_seconds()
        ));
        trace
    }

    pub fn enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Record one event line.
    pub fn log(&self, event: &str) {
        if self.inner.is_some() {
            self.write_line(&format!("       >>> {}", event));
        }
    }

    /// Record a buffer-shaped event with its byte count and a short
    /// printable preview.
    pub fn log_buffer(&self, label: &str, data: &[u8]) {
        if self.inner.is_none() {
            return;
        }
        let preview: String = data
            .iter()
            .take(60)
            .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
            .collect();
        self.write_line(&format!(
            "       >>> {} ({} bytes) {}",
            label,
            data.len(),
            preview
        ));
    }

    fn write_line(&self, line: &str) {
        if let Some(inner) = &self.inner {
            let mut sink = inner.sink.lock();
            let _ = match &mut *sink {
                Sink::Stdout => writeln!(std::io::stdout(), "{}", line),
                Sink::Stderr => writeln!(std::io::stderr(), "{}", line),
                Sink::File(file) => writeln!(file, "{}", line),
            };
        }
    }
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
