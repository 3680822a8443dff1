//! Output plumbing for the runtime.
//!
//! Everything a running program prints (the `debug` intrinsic, runtime
//! diagnostics) flows through a [`PrintWriter`] owned by the context. Hosts
//! swap the writer to capture or discard output; the interpreter itself never
//! writes to stdout directly.

use std::io::{self, Write as _};

/// Sink for program output.
pub trait PrintWriter {
    /// Writes one chunk of program output, exactly as produced.
    fn output(&mut self, text: &str);

    /// Writes one chunk of diagnostic output (uncaught exceptions and the
    /// like). Defaults to the same sink as [`Self::output`].
    fn error(&mut self, text: &str) {
        self.output(text);
    }
}

/// Default writer: program output to stdout, diagnostics to stderr.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn output(&mut self, text: &str) {
        let _ = io::stdout().write_all(text.as_bytes());
    }

    fn error(&mut self, text: &str) {
        let _ = io::stderr().write_all(text.as_bytes());
    }
}

/// Collects all output into a string; the writer tests reach for.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The collected output so far.
    #[must_use]
    pub fn output_str(&self) -> &str {
        &self.0
    }

    /// Consumes the writer, returning everything written to it.
    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn output(&mut self, text: &str) {
        self.0.push_str(text);
    }
}

/// Swallows all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn output(&mut self, _text: &str) {}
}
