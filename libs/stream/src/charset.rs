//! Charset resolution, sniffing and streaming transcoding
//!
//! Labels resolve through the WHATWG encoding registry. Character data inside
//! the core is always UTF-8; these adapters convert at the edges.

use crate::error::{Result, StreamError};
use encoding_rs::{CoderResult, Decoder, Encoder, Encoding, UTF_8};
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use std::io::{self, Read};

static XML_DECLARED_ENCODING: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r#"^\s*<\?xml[^>]*?encoding\s*=\s*["']([A-Za-z0-9._:\-]+)["']"#).ok()
});

/// Resolve a charset label
pub fn resolve(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| StreamError::conversion(format!("unsupported charset '{}'", label)))
}

/// Resolve a charset label that must also be usable for encoding output
pub fn resolve_output(label: &str) -> Result<&'static Encoding> {
    let encoding = resolve(label)?;
    ensure_output(encoding)?;
    Ok(encoding)
}

pub(crate) fn ensure_output(encoding: &'static Encoding) -> Result<()> {
    if encoding.output_encoding() != encoding {
        return Err(StreamError::conversion(format!(
            "charset '{}' cannot be used to encode output",
            encoding.name()
        )));
    }
    Ok(())
}

/// Configured fallback charset
pub fn default_charset() -> &'static Encoding {
    Encoding::for_label(crate::settings().message.default_charset.as_bytes()).unwrap_or(UTF_8)
}

/// Detect the charset of a content prefix: byte-order mark, XML declaration,
/// then UTF-8 validity. `None` when nothing conclusive was found.
pub fn sniff(prefix: &[u8]) -> Option<&'static Encoding> {
    if let Some((encoding, _)) = Encoding::for_bom(prefix) {
        return Some(encoding);
    }
    if let Some(encoding) = declared_xml_encoding(prefix) {
        return Some(encoding);
    }
    match std::str::from_utf8(prefix) {
        Ok(_) => Some(UTF_8),
        // a sequence cut off at the end of the sniff window
        Err(e) if e.error_len().is_none() => Some(UTF_8),
        Err(_) => None,
    }
}

fn declared_xml_encoding(prefix: &[u8]) -> Option<&'static Encoding> {
    let regex = XML_DECLARED_ENCODING.as_ref()?;
    let captures = regex.captures(prefix)?;
    Encoding::for_label(captures.get(1)?.as_bytes())
}

/// Decode a complete buffer, honouring a byte-order mark
pub fn decode(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

/// Encode a complete string
pub fn encode(text: &str, encoding: &'static Encoding) -> Result<Vec<u8>> {
    ensure_output(encoding)?;
    if encoding == UTF_8 {
        return Ok(text.as_bytes().to_vec());
    }
    let (bytes, _, _) = encoding.encode(text);
    Ok(bytes.into_owned())
}

/// Incremental bytes-to-UTF-8 decoder
pub(crate) struct StreamDecoder {
    decoder: Decoder,
}

impl StreamDecoder {
    pub(crate) fn new(encoding: &'static Encoding) -> Self {
        Self {
            decoder: encoding.new_decoder(),
        }
    }

    pub(crate) fn decode(&mut self, mut src: &[u8], last: bool, out: &mut String) {
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(src.len())
                .unwrap_or(src.len() * 3 + 16);
            out.reserve(needed.max(16));
            let (result, read, _) = self.decoder.decode_to_string(src, out, last);
            src = &src[read..];
            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => continue,
            }
        }
    }
}

/// Incremental UTF-8-to-bytes encoder
pub(crate) struct StreamEncoder {
    encoder: Encoder,
}

impl StreamEncoder {
    pub(crate) fn new(encoding: &'static Encoding) -> Result<Self> {
        ensure_output(encoding)?;
        Ok(Self {
            encoder: encoding.new_encoder(),
        })
    }

    pub(crate) fn encode(&mut self, mut src: &str, last: bool, out: &mut Vec<u8>) {
        loop {
            let needed = self
                .encoder
                .max_buffer_length_from_utf8_if_no_unmappables(src.len())
                .unwrap_or(src.len() * 4 + 16);
            out.reserve(needed.max(16));
            let (result, read, _) = self.encoder.encode_from_utf8_to_vec(src, out, last);
            src = &src[read..];
            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => continue,
            }
        }
    }
}

/// Length of the longest valid UTF-8 prefix; errors on invalid (not merely truncated) input
pub(crate) fn utf8_boundary(bytes: &[u8]) -> io::Result<usize> {
    match std::str::from_utf8(bytes) {
        Ok(_) => Ok(bytes.len()),
        Err(e) if e.error_len().is_none() => Ok(e.valid_up_to()),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "character data is not valid UTF-8",
        )),
    }
}

const READ_CHUNK: usize = 8 * 1024;

/// Reader producing UTF-8 from bytes in some charset
pub struct DecodingReader<R> {
    inner: R,
    decoder: StreamDecoder,
    decoded: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl<R: Read> DecodingReader<R> {
    pub fn new(inner: R, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            decoder: StreamDecoder::new(encoding),
            decoded: Vec::new(),
            pos: 0,
            finished: false,
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        let mut raw = [0u8; READ_CHUNK];
        let mut text = String::new();
        while text.is_empty() && !self.finished {
            let n = self.inner.read(&mut raw)?;
            self.finished = n == 0;
            self.decoder.decode(&raw[..n], self.finished, &mut text);
        }
        self.decoded = text.into_bytes();
        self.pos = 0;
        Ok(())
    }
}

impl<R: Read> Read for DecodingReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.decoded.len() {
            if self.finished {
                return Ok(0);
            }
            self.refill()?;
        }
        let n = (self.decoded.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.decoded[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Reader producing bytes in some charset from UTF-8
pub struct EncodingReader<R> {
    inner: R,
    encoder: StreamEncoder,
    carry: Vec<u8>,
    encoded: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl<R: Read> EncodingReader<R> {
    pub fn new(inner: R, encoding: &'static Encoding) -> Result<Self> {
        Ok(Self {
            inner,
            encoder: StreamEncoder::new(encoding)?,
            carry: Vec::new(),
            encoded: Vec::new(),
            pos: 0,
            finished: false,
        })
    }

    fn refill(&mut self) -> io::Result<()> {
        let mut raw = [0u8; READ_CHUNK];
        let mut out = Vec::new();
        while out.is_empty() && !self.finished {
            let n = self.inner.read(&mut raw)?;
            self.finished = n == 0;
            self.carry.extend_from_slice(&raw[..n]);
            let valid = utf8_boundary(&self.carry)?;
            if self.finished && valid != self.carry.len() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "character data ends inside a UTF-8 sequence",
                ));
            }
            let text = std::str::from_utf8(&self.carry[..valid])
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            self.encoder.encode(text, self.finished, &mut out);
            self.carry.drain(..valid);
        }
        self.encoded = out;
        self.pos = 0;
        Ok(())
    }
}

impl<R: Read> Read for EncodingReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.encoded.len() {
            if self.finished {
                return Ok(0);
            }
            self.refill()?;
        }
        let n = (self.encoded.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.encoded[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{UTF_16LE, WINDOWS_1252};
    use std::io::Cursor;

    #[test]
    fn test_resolve_known_and_unknown() {
        assert_eq!(resolve("utf-8").unwrap(), UTF_8);
        assert_eq!(resolve("ISO-8859-1").unwrap(), WINDOWS_1252);
        assert!(resolve("klingon").unwrap_err().is_conversion());
    }

    #[test]
    fn test_utf16_is_not_an_output_charset() {
        assert!(resolve("UTF-16LE").is_ok());
        assert!(resolve_output("UTF-16LE").unwrap_err().is_conversion());
        assert!(encode("x", UTF_16LE).is_err());
    }

    #[test]
    fn test_sniff_order() {
        assert_eq!(sniff(&[0xFF, 0xFE, b'a', 0]), Some(UTF_16LE));
        assert_eq!(
            sniff(b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><a/>"),
            Some(WINDOWS_1252)
        );
        assert_eq!(sniff("plain ĳ".as_bytes()), Some(UTF_8));
        assert_eq!(sniff(&[b'a', 0xE9, b'b']), None);
    }

    #[test]
    fn test_decoding_reader() {
        let latin = vec![b'c', b'a', b'f', 0xE9];
        let mut reader = DecodingReader::new(Cursor::new(latin), WINDOWS_1252);
        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();

        assert_eq!(text, "café");
    }

    #[test]
    fn test_encoding_reader() {
        let mut reader =
            EncodingReader::new(Cursor::new("café".as_bytes().to_vec()), WINDOWS_1252).unwrap();
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).unwrap();

        assert_eq!(bytes, vec![b'c', b'a', b'f', 0xE9]);
    }

    #[test]
    fn test_stream_decoder_splits_multibyte() {
        let bytes = "ĳ".as_bytes();
        let mut decoder = StreamDecoder::new(UTF_8);
        let mut out = String::new();
        decoder.decode(&bytes[..1], false, &mut out);
        decoder.decode(&bytes[1..], true, &mut out);

        assert_eq!(out, "ĳ");
    }
}
