//! Output sinks and per-child buffering
//!
//! Every runnable writes through the [`Output`] carried by its context. Children
//! of a parallel group get a [`BufferedOutput`] instead of the shared sink, and
//! the group flushes each child's buffer as one block once the child is done.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

/// Destination for task output
pub trait OutputSink: Send + Sync {
    /// Write the whole buffer as one uninterrupted block
    fn write_all(&self, buf: &[u8]) -> io::Result<()>;
}

/// Process standard output
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut out = io::stdout().lock();
        out.write_all(buf)?;
        out.flush()
    }
}

/// Process standard error
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl OutputSink for StderrSink {
    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut err = io::stderr().lock();
        err.write_all(buf)?;
        err.flush()
    }
}

/// In-memory sink, used for child buffers and for capturing output in tests
#[derive(Debug, Default)]
pub struct MemorySink {
    buf: Mutex<Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far
    pub fn contents(&self) -> Vec<u8> {
        self.lock().clone()
    }

    /// Everything written so far, lossily decoded
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    /// Take the contents, leaving the sink empty
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl OutputSink for MemorySink {
    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        self.lock().extend_from_slice(buf);
        Ok(())
    }
}

/// A pair of stdout/stderr sinks.
///
/// Clones share the sinks and the flush lock, so block flushes from different
/// children into the same `Output` never interleave.
#[derive(Clone)]
pub struct Output {
    stdout: Arc<dyn OutputSink>,
    stderr: Arc<dyn OutputSink>,
    flush_lock: Arc<Mutex<()>>,
}

impl Output {
    pub fn new(stdout: Arc<dyn OutputSink>, stderr: Arc<dyn OutputSink>) -> Self {
        Self {
            stdout,
            stderr,
            flush_lock: Arc::new(Mutex::new(())),
        }
    }

    /// The process's own stdout and stderr
    pub fn std() -> Self {
        Self::new(Arc::new(StdoutSink), Arc::new(StderrSink))
    }

    /// Memory-backed output, returning the sinks for inspection
    pub fn memory() -> (Self, Arc<MemorySink>, Arc<MemorySink>) {
        let stdout = Arc::new(MemorySink::new());
        let stderr = Arc::new(MemorySink::new());
        (Self::new(stdout.clone(), stderr.clone()), stdout, stderr)
    }

    pub fn stdout(&self) -> &Arc<dyn OutputSink> {
        &self.stdout
    }

    pub fn stderr(&self) -> &Arc<dyn OutputSink> {
        &self.stderr
    }

    /// Write a line to stdout
    pub fn println(&self, line: impl AsRef<str>) -> io::Result<()> {
        self.stdout.write_all(with_newline(line.as_ref()).as_bytes())
    }

    /// Write a line to stderr
    pub fn eprintln(&self, line: impl AsRef<str>) -> io::Result<()> {
        self.stderr.write_all(with_newline(line.as_ref()).as_bytes())
    }

    /// Write a stdout block and a stderr block with no other flush in between
    fn write_blocks(&self, stdout: &[u8], stderr: &[u8]) -> io::Result<()> {
        let _guard = self
            .flush_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !stdout.is_empty() {
            self.stdout.write_all(stdout)?;
        }
        if !stderr.is_empty() {
            self.stderr.write_all(stderr)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output").finish_non_exhaustive()
    }
}

fn with_newline(line: &str) -> String {
    let mut s = String::with_capacity(line.len() + 1);
    s.push_str(line);
    if !line.ends_with('\n') {
        s.push('\n');
    }
    s
}

/// Isolated buffer for one child of a parallel group
#[derive(Debug, Default)]
pub struct BufferedOutput {
    stdout: Arc<MemorySink>,
    stderr: Arc<MemorySink>,
}

impl BufferedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output handle writing into this buffer
    pub fn output(&self) -> Output {
        Output::new(self.stdout.clone(), self.stderr.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }

    /// Move the buffered output into `parent` as one atomic block
    pub fn flush_to(&self, parent: &Output) -> io::Result<()> {
        let stdout = self.stdout.take();
        let stderr = self.stderr.take();
        parent.write_blocks(&stdout, &stderr)
    }

    /// Drop the buffered output
    pub fn discard(&self) {
        self.stdout.take();
        self.stderr.take();
    }
}
