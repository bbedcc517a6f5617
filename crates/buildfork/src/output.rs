//! Output silencing for the forked child
//!
//! Once the child has told the parent it is done, nothing it writes can be
//! shown any more. The gate turns the child's own log output off in one step.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

/// One-shot switch between stderr and a sink
#[derive(Debug, Clone, Default)]
pub struct OutputGate {
    silenced: Arc<AtomicBool>,
}

impl OutputGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop all further output. Returns false if it was already silenced.
    pub fn silence_output(&self) -> bool {
        !self.silenced.swap(true, Ordering::SeqCst)
    }

    pub fn is_silenced(&self) -> bool {
        self.silenced.load(Ordering::SeqCst)
    }
}

pub enum GateWriter {
    Stderr(io::Stderr),
    Sink(io::Sink),
}

impl Write for GateWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            GateWriter::Stderr(w) => w.write(buf),
            GateWriter::Sink(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            GateWriter::Stderr(w) => w.flush(),
            GateWriter::Sink(w) => w.flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for OutputGate {
    type Writer = GateWriter;

    fn make_writer(&'a self) -> Self::Writer {
        if self.is_silenced() {
            GateWriter::Sink(io::sink())
        } else {
            GateWriter::Stderr(io::stderr())
        }
    }
}
