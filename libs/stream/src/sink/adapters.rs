use super::{OutputSink, TextSink};
use crate::charset::{StreamDecoder, StreamEncoder};
use crate::error::{Result, StreamError};
use encoding_rs::Encoding;
use std::io::{self, Write};

/// Character view of a byte sink. Closing finishes the encoder and flushes,
/// the underlying sink stays open.
pub struct EncodingSink<W> {
    inner: W,
    encoder: StreamEncoder,
    buffer: Vec<u8>,
    finished: bool,
}

impl<W: Write + Send> EncodingSink<W> {
    pub fn new(inner: W, encoding: &'static Encoding) -> Result<Self> {
        Ok(Self {
            inner,
            encoder: StreamEncoder::new(encoding)?,
            buffer: Vec::new(),
            finished: false,
        })
    }

    fn encode(&mut self, text: &str, last: bool) -> Result<()> {
        self.buffer.clear();
        self.encoder.encode(text, last, &mut self.buffer);
        if !self.buffer.is_empty() {
            self.inner.write_all(&self.buffer)?;
        }
        Ok(())
    }
}

impl<W: Write + Send> TextSink for EncodingSink<W> {
    fn write_str(&mut self, text: &str) -> Result<()> {
        if self.finished {
            return Err(StreamError::illegal_state("write after close"));
        }
        self.encode(text, false)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.encode("", true)?;
        self.flush()
    }
}

/// Byte view of a character sink, decoding with a fixed charset
pub struct DecodingSink<T> {
    inner: T,
    decoder: StreamDecoder,
    buffer: String,
    finished: bool,
}

impl<T: TextSink> DecodingSink<T> {
    pub fn new(inner: T, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            decoder: StreamDecoder::new(encoding),
            buffer: String::new(),
            finished: false,
        }
    }

    fn decode(&mut self, bytes: &[u8], last: bool) -> Result<()> {
        self.buffer.clear();
        self.decoder.decode(bytes, last, &mut self.buffer);
        if !self.buffer.is_empty() {
            self.inner.write_str(&self.buffer)?;
        }
        Ok(())
    }
}

impl<T: TextSink> Write for DecodingSink<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(StreamError::illegal_state("write after close").into_io());
        }
        self.decode(buf, false).map_err(StreamError::into_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().map_err(StreamError::into_io)
    }
}

impl<T: TextSink> OutputSink for DecodingSink<T> {
    fn close(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.decode(&[], true)?;
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{SharedBytes, SharedText};
    use encoding_rs::{UTF_8, WINDOWS_1252};

    #[test]
    fn test_encoding_sink_writes_charset_bytes() {
        let target = SharedBytes::new();
        let mut sink = EncodingSink::new(target.clone(), WINDOWS_1252).unwrap();
        sink.write_str("caf").unwrap();
        sink.write_str("é").unwrap();
        sink.close().unwrap();

        assert_eq!(target.contents(), vec![b'c', b'a', b'f', 0xE9]);
        assert!(sink.write_str("more").is_err());
    }

    #[test]
    fn test_decoding_sink_joins_split_sequences() {
        let target = SharedText::new();
        let mut sink = DecodingSink::new(target.clone(), UTF_8);
        let bytes = "naïve".as_bytes();
        sink.write_all(&bytes[..3]).unwrap();
        sink.write_all(&bytes[3..]).unwrap();
        OutputSink::close(&mut sink).unwrap();

        assert_eq!(target.contents(), "naïve");
    }
}
