//! Capture tees: mirror output into a diagnostic target up to a limit

use super::{ByteSink, CharSink, JsonEventHandler, JsonSink, OutputSink, TextSink, XmlEventHandler, XmlSink};
use crate::error::{Result, StreamError};
use serde_json::Number;
use std::io::{self, Write};
use tracing::warn;

/// Passes through at most `remaining` characters
pub(crate) struct LimitedText {
    target: Box<dyn TextSink>,
    remaining: usize,
}

impl LimitedText {
    pub(crate) fn new(target: Box<dyn TextSink>, limit: usize) -> Self {
        Self {
            target,
            remaining: limit,
        }
    }
}

impl TextSink for LimitedText {
    fn write_str(&mut self, text: &str) -> Result<()> {
        if self.remaining == 0 {
            return Ok(());
        }
        let end = text
            .char_indices()
            .nth(self.remaining)
            .map(|(i, _)| i)
            .unwrap_or(text.len());
        let taken = &text[..end];
        self.remaining -= taken.chars().count();
        self.target.write_str(taken)
    }

    fn flush(&mut self) -> Result<()> {
        self.target.flush()
    }

    fn close(&mut self) -> Result<()> {
        self.target.close()
    }
}

/// Passes through at most `remaining` bytes
pub(crate) struct LimitedBytes {
    target: Box<dyn Write + Send>,
    remaining: usize,
}

impl LimitedBytes {
    pub(crate) fn new(target: Box<dyn Write + Send>, limit: usize) -> Self {
        Self {
            target,
            remaining: limit,
        }
    }
}

impl Write for LimitedBytes {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining);
        if n > 0 {
            self.target.write_all(&buf[..n])?;
            self.remaining -= n;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.target.flush()
    }
}

impl OutputSink for LimitedBytes {}

fn mirrored<T: ?Sized>(mirror: &mut Option<Box<T>>, f: impl FnOnce(&mut T) -> Result<()>) {
    if let Some(target) = mirror.as_mut() {
        if let Err(e) = f(&mut **target) {
            warn!("capture stopped after failure: {}", e);
            *mirror = None;
        }
    }
}

fn close_both(mirror: Result<()>, primary: Result<()>) -> Result<()> {
    let errors: Vec<StreamError> = [mirror, primary].into_iter().filter_map(|r| r.err()).collect();
    StreamError::from_release_failures(errors)
}

pub(crate) struct ByteTee {
    primary: ByteSink,
    mirror: Option<Box<dyn OutputSink>>,
}

impl ByteTee {
    pub(crate) fn new(primary: ByteSink, mirror: Box<dyn OutputSink>) -> Self {
        Self {
            primary,
            mirror: Some(mirror),
        }
    }
}

impl Write for ByteTee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.primary.write_all(buf)?;
        mirrored(&mut self.mirror, |m| Ok(m.write_all(buf)?));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        mirrored(&mut self.mirror, |m| Ok(m.flush()?));
        self.primary.flush()
    }
}

impl OutputSink for ByteTee {
    fn close(&mut self) -> Result<()> {
        let mirror = self.mirror.take().map_or(Ok(()), |mut m| m.close());
        close_both(mirror, self.primary.close())
    }
}

pub(crate) struct TextTee {
    primary: CharSink,
    mirror: Option<Box<dyn TextSink>>,
}

impl TextTee {
    pub(crate) fn new(primary: CharSink, mirror: Box<dyn TextSink>) -> Self {
        Self {
            primary,
            mirror: Some(mirror),
        }
    }
}

impl TextSink for TextTee {
    fn write_str(&mut self, text: &str) -> Result<()> {
        self.primary.write_str(text)?;
        mirrored(&mut self.mirror, |m| m.write_str(text));
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        mirrored(&mut self.mirror, |m| m.flush());
        self.primary.flush()
    }

    fn close(&mut self) -> Result<()> {
        let mirror = self.mirror.take().map_or(Ok(()), |mut m| m.close());
        close_both(mirror, CharSink::close(&self.primary))
    }
}

pub(crate) struct XmlTee {
    primary: XmlSink,
    mirror: Option<Box<dyn XmlEventHandler>>,
}

impl XmlTee {
    pub(crate) fn new(primary: XmlSink, mirror: Box<dyn XmlEventHandler>) -> Self {
        Self {
            primary,
            mirror: Some(mirror),
        }
    }
}

impl XmlEventHandler for XmlTee {
    fn start_document(&mut self) -> Result<()> {
        self.primary.start_document()?;
        mirrored(&mut self.mirror, |m| m.start_document());
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        self.primary.end_document()?;
        mirrored(&mut self.mirror, |m| m.end_document());
        Ok(())
    }

    fn start_element(&mut self, name: &str, attributes: &[(String, String)]) -> Result<()> {
        self.primary.start_element(name, attributes)?;
        mirrored(&mut self.mirror, |m| m.start_element(name, attributes));
        Ok(())
    }

    fn end_element(&mut self, name: &str) -> Result<()> {
        self.primary.end_element(name)?;
        mirrored(&mut self.mirror, |m| m.end_element(name));
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        self.primary.characters(text)?;
        mirrored(&mut self.mirror, |m| m.characters(text));
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.primary.comment(text)?;
        mirrored(&mut self.mirror, |m| m.comment(text));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mirror = self.mirror.take().map_or(Ok(()), |mut m| m.close());
        close_both(mirror, XmlSink::close(&self.primary))
    }
}

pub(crate) struct JsonTee {
    primary: JsonSink,
    mirror: Option<Box<dyn JsonEventHandler>>,
}

impl JsonTee {
    pub(crate) fn new(primary: JsonSink, mirror: Box<dyn JsonEventHandler>) -> Self {
        Self {
            primary,
            mirror: Some(mirror),
        }
    }
}

impl JsonEventHandler for JsonTee {
    fn start_document(&mut self) -> Result<()> {
        self.primary.start_document()?;
        mirrored(&mut self.mirror, |m| m.start_document());
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        self.primary.end_document()?;
        mirrored(&mut self.mirror, |m| m.end_document());
        Ok(())
    }

    fn start_object(&mut self) -> Result<()> {
        self.primary.start_object()?;
        mirrored(&mut self.mirror, |m| m.start_object());
        Ok(())
    }

    fn end_object(&mut self) -> Result<()> {
        self.primary.end_object()?;
        mirrored(&mut self.mirror, |m| m.end_object());
        Ok(())
    }

    fn start_array(&mut self) -> Result<()> {
        self.primary.start_array()?;
        mirrored(&mut self.mirror, |m| m.start_array());
        Ok(())
    }

    fn end_array(&mut self) -> Result<()> {
        self.primary.end_array()?;
        mirrored(&mut self.mirror, |m| m.end_array());
        Ok(())
    }

    fn key(&mut self, key: &str) -> Result<()> {
        self.primary.key(key)?;
        mirrored(&mut self.mirror, |m| m.key(key));
        Ok(())
    }

    fn string(&mut self, value: &str) -> Result<()> {
        self.primary.string(value)?;
        mirrored(&mut self.mirror, |m| m.string(value));
        Ok(())
    }

    fn number(&mut self, value: &Number) -> Result<()> {
        self.primary.number(value)?;
        mirrored(&mut self.mirror, |m| m.number(value));
        Ok(())
    }

    fn boolean(&mut self, value: bool) -> Result<()> {
        self.primary.boolean(value)?;
        mirrored(&mut self.mirror, |m| m.boolean(value));
        Ok(())
    }

    fn null(&mut self) -> Result<()> {
        self.primary.null()?;
        mirrored(&mut self.mirror, |m| m.null());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mirror = self.mirror.take().map_or(Ok(()), |mut m| m.close());
        close_both(mirror, JsonSink::close(&self.primary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{SharedBytes, SharedText};

    #[test]
    fn test_limited_text_cuts_on_characters() {
        let capture = SharedText::new();
        let mut limited = LimitedText::new(Box::new(capture.clone()), 3);
        limited.write_str("ĳs").unwrap();
        limited.write_str("berg").unwrap();

        assert_eq!(capture.contents(), "ĳsb");
    }

    #[test]
    fn test_byte_tee_mirrors_up_to_limit() {
        let target = SharedBytes::new();
        let capture = SharedBytes::new();
        let mut tee = ByteTee::new(
            ByteSink::new(target.clone()),
            Box::new(LimitedBytes::new(Box::new(capture.clone()), 4)),
        );
        tee.write_all(b"abcdef").unwrap();
        OutputSink::close(&mut tee).unwrap();

        assert_eq!(target.contents(), b"abcdef");
        assert_eq!(capture.contents(), b"abcd");
    }
}
