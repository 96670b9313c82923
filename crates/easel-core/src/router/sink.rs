//! Destinations a channel can deliver output to.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// A destination for bytes published on a channel.
///
/// Sinks are only ever driven by the router while it holds the owning
/// channel's lock, so implementations see writes strictly in delivery order
/// and never concurrently.
pub trait OutputSink: Send {
    /// Deliver one chunk of output.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Push any buffered bytes to the underlying destination.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Called once when the channel is removed. No writes follow.
    fn close(&mut self) -> io::Result<()> {
        self.flush()
    }
}

/// An in-memory sink whose contents can be read back through any clone.
///
/// UI surfaces use this to accumulate a channel's output for display; tests
/// use it to assert on what a process produced.
#[derive(Debug, Clone, Default)]
pub struct CaptureSink {
    buf: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far.
    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Everything delivered so far, decoded lossily as UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    /// Whether the router has closed this sink.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl OutputSink for CaptureSink {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Adapts any [`Write`] implementation (stdout, a file, a socket) as a sink.
#[derive(Debug)]
pub struct WriterSink<W> {
    inner: W,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Send> OutputSink for WriterSink<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(data)?;
        // Process output is read in arbitrary chunks; flushing keeps
        // interactive programs responsive on line-buffered destinations.
        self.inner.flush()
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl OutputSink for Box<dyn OutputSink> {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_sink_is_shared_between_clones() {
        let sink = CaptureSink::new();
        let mut writer = sink.clone();
        writer.write(b"hello ").unwrap();
        writer.write(b"world").unwrap();
        assert_eq!(sink.text(), "hello world");
        assert!(!sink.is_closed());

        writer.close().unwrap();
        assert!(sink.is_closed());
    }

    #[test]
    fn writer_sink_writes_through() {
        let mut sink = WriterSink::new(Vec::new());
        sink.write(b"abc").unwrap();
        sink.close().unwrap();
        assert_eq!(sink.into_inner(), b"abc");
    }
}
