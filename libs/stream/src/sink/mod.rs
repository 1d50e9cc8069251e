//! Sink traits and the shared handles output streams hand out
//!
//! Four kinds of sink exist: bytes, characters, XML events and JSON events.
//! A [`SinkHandle`] is a cloneable, closeable reference to one boxed sink;
//! closing it through any clone closes it for all of them.

mod adapters;
pub mod json;
mod tee;
pub mod xml;

pub use adapters::{DecodingSink, EncodingSink};
pub use json::{parse_json_events, JsonEventHandler, JsonWriter};
pub(crate) use tee::{ByteTee, JsonTee, LimitedBytes, LimitedText, TextTee, XmlTee};
pub use xml::{parse_xml_events, XmlEventHandler, XmlWriter};

use crate::error::{Result, StreamError};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;

/// Byte-oriented sink
pub trait OutputSink: Write + Send {
    /// Flush and release. Called once.
    fn close(&mut self) -> Result<()> {
        self.flush()?;
        Ok(())
    }
}

/// Character-oriented sink
pub trait TextSink: Send {
    fn write_str(&mut self, text: &str) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush()
    }
}

/// Adapts any `Write` into an [`OutputSink`]
pub struct WriteSink<W> {
    inner: W,
}

impl<W: Write + Send> WriteSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Send> Write for WriteSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write + Send> OutputSink for WriteSink<W> {}

/// Shared reference to a boxed sink
pub struct SinkHandle<T: ?Sized> {
    inner: Arc<Mutex<Option<Box<T>>>>,
}

pub type ByteSink = SinkHandle<dyn OutputSink>;
pub type CharSink = SinkHandle<dyn TextSink>;
pub type XmlSink = SinkHandle<dyn XmlEventHandler>;
pub type JsonSink = SinkHandle<dyn JsonEventHandler>;

impl<T: ?Sized> Clone for SinkHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ?Sized> SinkHandle<T> {
    pub fn from_box(sink: Box<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(sink))),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_none()
    }

    /// Whether both handles refer to the same sink
    pub fn same_sink(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn with<R>(&self, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        let mut guard = self.inner.lock();
        match guard.as_mut() {
            Some(sink) => f(&mut **sink),
            None => Err(StreamError::illegal_state("sink already closed")),
        }
    }

    fn take(&self) -> Option<Box<T>> {
        self.inner.lock().take()
    }
}

impl<T: ?Sized> std::fmt::Debug for SinkHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ByteSink {
    pub fn new(sink: impl OutputSink + 'static) -> Self {
        Self::from_box(Box::new(sink))
    }

    /// Close the sink; later calls are no-ops
    pub fn close(&self) -> Result<()> {
        match self.take() {
            Some(mut sink) => sink.close(),
            None => Ok(()),
        }
    }
}

impl Write for ByteSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with(|sink| Ok(sink.write(buf)?))
            .map_err(StreamError::into_io)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.with(|sink| Ok(sink.write_all(buf)?))
            .map_err(StreamError::into_io)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with(|sink| Ok(sink.flush()?))
            .map_err(StreamError::into_io)
    }
}

impl OutputSink for ByteSink {
    fn close(&mut self) -> Result<()> {
        ByteSink::close(self)
    }
}

impl CharSink {
    pub fn new(sink: impl TextSink + 'static) -> Self {
        Self::from_box(Box::new(sink))
    }

    pub fn close(&self) -> Result<()> {
        match self.take() {
            Some(mut sink) => sink.close(),
            None => Ok(()),
        }
    }
}

impl TextSink for CharSink {
    fn write_str(&mut self, text: &str) -> Result<()> {
        self.with(|sink| sink.write_str(text))
    }

    fn flush(&mut self) -> Result<()> {
        self.with(|sink| sink.flush())
    }

    fn close(&mut self) -> Result<()> {
        CharSink::close(self)
    }
}

impl XmlSink {
    pub fn new(handler: impl XmlEventHandler + 'static) -> Self {
        Self::from_box(Box::new(handler))
    }

    pub fn close(&self) -> Result<()> {
        match self.take() {
            Some(mut handler) => handler.close(),
            None => Ok(()),
        }
    }
}

impl XmlEventHandler for XmlSink {
    fn start_document(&mut self) -> Result<()> {
        self.with(|h| h.start_document())
    }

    fn end_document(&mut self) -> Result<()> {
        self.with(|h| h.end_document())
    }

    fn start_element(&mut self, name: &str, attributes: &[(String, String)]) -> Result<()> {
        self.with(|h| h.start_element(name, attributes))
    }

    fn end_element(&mut self, name: &str) -> Result<()> {
        self.with(|h| h.end_element(name))
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        self.with(|h| h.characters(text))
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.with(|h| h.comment(text))
    }

    fn close(&mut self) -> Result<()> {
        XmlSink::close(self)
    }
}

impl JsonSink {
    pub fn new(handler: impl JsonEventHandler + 'static) -> Self {
        Self::from_box(Box::new(handler))
    }

    pub fn close(&self) -> Result<()> {
        match self.take() {
            Some(mut handler) => handler.close(),
            None => Ok(()),
        }
    }
}

impl JsonEventHandler for JsonSink {
    fn start_document(&mut self) -> Result<()> {
        self.with(|h| h.start_document())
    }

    fn end_document(&mut self) -> Result<()> {
        self.with(|h| h.end_document())
    }

    fn start_object(&mut self) -> Result<()> {
        self.with(|h| h.start_object())
    }

    fn end_object(&mut self) -> Result<()> {
        self.with(|h| h.end_object())
    }

    fn start_array(&mut self) -> Result<()> {
        self.with(|h| h.start_array())
    }

    fn end_array(&mut self) -> Result<()> {
        self.with(|h| h.end_array())
    }

    fn key(&mut self, key: &str) -> Result<()> {
        self.with(|h| h.key(key))
    }

    fn string(&mut self, value: &str) -> Result<()> {
        self.with(|h| h.string(value))
    }

    fn number(&mut self, value: &serde_json::Number) -> Result<()> {
        self.with(|h| h.number(value))
    }

    fn boolean(&mut self, value: bool) -> Result<()> {
        self.with(|h| h.boolean(value))
    }

    fn null(&mut self) -> Result<()> {
        self.with(|h| h.null())
    }

    fn close(&mut self) -> Result<()> {
        JsonSink::close(self)
    }
}

/// In-memory byte capture target
#[derive(Debug, Clone, Default)]
pub struct SharedBytes {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl SharedBytes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buffer.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }
}

impl Write for SharedBytes {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl OutputSink for SharedBytes {}

/// In-memory character capture target
#[derive(Debug, Clone, Default)]
pub struct SharedText {
    buffer: Arc<Mutex<String>>,
}

impl SharedText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.buffer.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }
}

impl TextSink for SharedText {
    fn write_str(&mut self, text: &str) -> Result<()> {
        self.buffer.lock().push_str(text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_close_is_shared_and_idempotent() {
        let target = SharedBytes::new();
        let mut sink = ByteSink::new(target.clone());
        let other = sink.clone();

        sink.write_all(b"abc").unwrap();
        other.close().unwrap();
        other.close().unwrap();

        assert!(sink.is_closed());
        assert!(sink.write_all(b"d").is_err());
        assert_eq!(target.contents(), b"abc");
    }

    #[test]
    fn test_closed_char_sink_reports_illegal_state() {
        let mut sink = CharSink::new(SharedText::new());
        CharSink::close(&sink).unwrap();

        assert!(sink.write_str("x").unwrap_err().is_illegal_state());
    }
}
