//! Output sinks
//!
//! The profiler writes three independent streams: the ranked stats table,
//! the per-context call-tree summary and the raw call/return trace. Each
//! goes to its own [`OutputSink`]. A sink without a writer discards
//! everything written to it.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

#[derive(Default)]
pub struct OutputSink {
    writer: Option<Box<dyn Write + Send>>,
}

impl OutputSink {
    /// A sink that drops all output
    pub fn discard() -> Self {
        Self { writer: None }
    }

    pub fn stdout() -> Self {
        Self::from_writer(io::stdout())
    }

    /// Create (or truncate) `path` and write to it
    pub fn file(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::from_writer(BufWriter::new(file)))
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Some(Box::new(writer)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    pub fn write_str(&mut self, text: &str) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.write_all(text.as_bytes()),
            None => Ok(()),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSink")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
