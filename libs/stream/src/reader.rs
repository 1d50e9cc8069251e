//! Markable readers handed out by message accessors
//!
//! A one-shot source sits behind a shared cursor: every view handed out for
//! it reads from the same position, so asking twice never duplicates
//! consumption. Both views support `mark`/`reset` and a non-destructive peek.

use parking_lot::Mutex;
use std::io::{self, Read};
use std::sync::Arc;

/// Reader that can replay bytes read since the last `mark`
pub struct MarkReader<R> {
    inner: R,
    buffer: Vec<u8>,
    pos: usize,
    read_limit: Option<usize>,
}

impl<R: Read> MarkReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            pos: 0,
            read_limit: None,
        }
    }

    /// Remember the current position; up to `read_limit` bytes can be replayed
    pub fn mark(&mut self, read_limit: usize) {
        self.buffer.drain(..self.pos);
        self.pos = 0;
        self.read_limit = Some(read_limit);
    }

    /// Return to the marked position
    pub fn reset(&mut self) -> io::Result<()> {
        if self.read_limit.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "reset without a valid mark",
            ));
        }
        self.pos = 0;
        Ok(())
    }

    /// Read up to `n` bytes without consuming them
    pub fn peek(&mut self, n: usize) -> io::Result<Vec<u8>> {
        self.mark(n);
        let mut peeked = Vec::with_capacity(n.min(8192));
        let mut chunk = [0u8; 4096];
        while peeked.len() < n {
            let want = (n - peeked.len()).min(chunk.len());
            let read = self.read(&mut chunk[..want])?;
            if read == 0 {
                break;
            }
            peeked.extend_from_slice(&chunk[..read]);
        }
        self.reset()?;
        Ok(peeked)
    }
}

impl<R: Read> Read for MarkReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.buffer.len() {
            let n = (self.buffer.len() - self.pos).min(out.len());
            out[..n].copy_from_slice(&self.buffer[self.pos..self.pos + n]);
            self.pos += n;
            if self.read_limit.is_none() && self.pos == self.buffer.len() {
                self.buffer.clear();
                self.pos = 0;
            }
            return Ok(n);
        }

        let n = self.inner.read(out)?;
        if let Some(limit) = self.read_limit {
            if self.buffer.len() + n <= limit {
                self.buffer.extend_from_slice(&out[..n]);
                self.pos = self.buffer.len();
            } else {
                // mark invalidated
                self.read_limit = None;
                self.buffer.clear();
                self.pos = 0;
            }
        }
        Ok(n)
    }
}

pub(crate) type SharedCursor = Arc<Mutex<MarkReader<Box<dyn Read + Send>>>>;

pub(crate) fn shared_cursor(reader: Box<dyn Read + Send>) -> SharedCursor {
    Arc::new(Mutex::new(MarkReader::new(reader)))
}

/// Byte view of a message
pub struct ByteReader {
    cursor: SharedCursor,
}

impl ByteReader {
    /// Wrap any reader
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            cursor: shared_cursor(Box::new(reader)),
        }
    }

    pub(crate) fn from_cursor(cursor: SharedCursor) -> Self {
        Self { cursor }
    }

    pub(crate) fn cursor(&self) -> SharedCursor {
        Arc::clone(&self.cursor)
    }

    /// Remember the position; up to `read_limit` bytes can be replayed
    pub fn mark(&mut self, read_limit: usize) {
        self.cursor.lock().mark(read_limit);
    }

    /// Return to the last mark
    pub fn reset(&mut self) -> io::Result<()> {
        self.cursor.lock().reset()
    }

    /// Up to `n` bytes from the current position, left unconsumed
    pub fn peek(&mut self, n: usize) -> io::Result<Vec<u8>> {
        self.cursor.lock().peek(n)
    }

    /// Read everything that remains
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.read_to_end(&mut out)?;
        Ok(out)
    }
}

impl Read for ByteReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.cursor.lock().read(out)
    }
}

impl std::fmt::Debug for ByteReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteReader").finish_non_exhaustive()
    }
}

/// Character view of a message. Always yields UTF-8.
pub struct CharReader {
    cursor: SharedCursor,
    pending: Vec<u8>,
}

impl CharReader {
    /// Wrap a reader that already produces UTF-8
    pub fn new(utf8: impl Read + Send + 'static) -> Self {
        Self::from_cursor(shared_cursor(Box::new(utf8)))
    }

    pub(crate) fn from_cursor(cursor: SharedCursor) -> Self {
        Self {
            cursor,
            pending: Vec::new(),
        }
    }

    pub(crate) fn cursor(&self) -> SharedCursor {
        Arc::clone(&self.cursor)
    }

    /// Remember the position; up to `read_limit_chars` characters can be replayed
    pub fn mark(&mut self, read_limit_chars: usize) {
        self.pending.clear();
        self.cursor.lock().mark(read_limit_chars.saturating_mul(4));
    }

    /// Return to the last mark
    pub fn reset(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.cursor.lock().reset()
    }

    /// Up to `max_chars` characters, left unconsumed
    pub fn peek(&mut self, max_chars: usize) -> io::Result<String> {
        self.mark(max_chars);
        let text = self.read_text(max_chars)?;
        self.reset()?;
        Ok(text)
    }

    /// Read up to `max_chars` characters. Never reads past the last
    /// character returned: each pull asks for at most one byte per
    /// character still missing.
    pub fn read_text(&mut self, max_chars: usize) -> io::Result<String> {
        let mut text = String::new();
        let mut count = 0;
        let mut chunk = [0u8; 512];
        let mut cursor = self.cursor.lock();
        while count < max_chars {
            let want = (max_chars - count).min(chunk.len());
            let n = cursor.read(&mut chunk[..want])?;
            if n == 0 {
                if !self.pending.is_empty() {
                    return Err(invalid_utf8());
                }
                break;
            }
            self.pending.extend_from_slice(&chunk[..n]);
            let valid = match std::str::from_utf8(&self.pending) {
                Ok(all) => all.len(),
                Err(e) if e.error_len().is_some() => return Err(invalid_utf8()),
                Err(e) => e.valid_up_to(),
            };
            let decoded = std::str::from_utf8(&self.pending[..valid]).map_err(|_| invalid_utf8())?;
            count += decoded.chars().count();
            text.push_str(decoded);
            self.pending.drain(..valid);
        }
        Ok(text)
    }

    /// Read all remaining characters
    pub fn read_all(&mut self) -> io::Result<String> {
        let mut bytes = std::mem::take(&mut self.pending);
        self.cursor.lock().read_to_end(&mut bytes)?;
        String::from_utf8(bytes).map_err(|_| invalid_utf8())
    }
}

impl Read for CharReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if !self.pending.is_empty() {
            let n = self.pending.len().min(out.len());
            out[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            return Ok(n);
        }
        self.cursor.lock().read(out)
    }
}

impl std::fmt::Debug for CharReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CharReader").finish_non_exhaustive()
    }
}

fn invalid_utf8() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "character stream is not valid UTF-8")
}
