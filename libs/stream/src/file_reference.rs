//! Disk-backed message content
//!
//! Content spilled by `preserve()` lives in a temporary file that is removed
//! when the last clone of the reference goes away.

use crate::charset::{self, DecodingReader, EncodingReader};
use crate::error::{Result, StreamError};
use crate::reader::{ByteReader, CharReader};
use encoding_rs::{Encoding, UTF_8};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::{NamedTempFile, TempPath};

/// Handle to a spilled temporary file
#[derive(Clone)]
pub struct FileReference {
    path: Arc<TempPath>,
    binary: bool,
    size: u64,
    charset: &'static Encoding,
}

impl FileReference {
    /// Store UTF-8 character data, encoded on disk as `charset`
    pub fn from_char_reader(reader: impl Read, charset: &'static Encoding) -> Result<Self> {
        let (path, size) = if charset == UTF_8 {
            spill(reader)?
        } else {
            spill(EncodingReader::new(reader, charset)?)?
        };
        Ok(Self {
            path: Arc::new(path),
            binary: false,
            size,
            charset,
        })
    }

    pub fn from_byte_reader(reader: impl Read) -> Result<Self> {
        let (path, size) = spill(reader)?;
        Ok(Self {
            path: Arc::new(path),
            binary: true,
            size,
            charset: UTF_8,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_byte_reader(bytes)
    }

    pub fn from_text(text: &str, charset: &'static Encoding) -> Result<Self> {
        charset::ensure_output(charset)?;
        Self::from_char_reader(text.as_bytes(), charset)
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// Bytes on disk
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Charset of character content on disk
    pub fn charset(&self) -> &'static Encoding {
        self.charset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fresh character view; binary content is decoded with `binary_charset`
    pub fn open_reader(&self, binary_charset: &'static Encoding) -> Result<CharReader> {
        let file = self.open()?;
        let encoding = if self.binary { binary_charset } else { self.charset };
        Ok(CharReader::new(DecodingReader::new(file, encoding)))
    }

    /// Fresh byte view of the stored bytes
    pub fn open_byte_reader(&self) -> Result<ByteReader> {
        Ok(ByteReader::new(self.open()?))
    }

    fn open(&self) -> Result<BufReader<File>> {
        File::open(self.path())
            .map(BufReader::new)
            .map_err(|e| StreamError::resource_with_context("failed to open spilled message", e))
    }

    /// Remove the file now if this is the last reference
    pub fn release(self) -> Result<()> {
        match Arc::try_unwrap(self.path) {
            Ok(path) => path
                .close()
                .map_err(|e| StreamError::resource_with_context("failed to remove spilled message", e)),
            Err(_) => Ok(()),
        }
    }
}

impl std::fmt::Debug for FileReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReference")
            .field("path", &self.path())
            .field("binary", &self.binary)
            .field("size", &self.size)
            .field("charset", &self.charset.name())
            .finish()
    }
}

fn spill(mut reader: impl Read) -> Result<(TempPath, u64)> {
    let mut file = temp_file()?;
    let size = io::copy(&mut reader, &mut file)?;
    file.flush()?;
    Ok((file.into_temp_path(), size))
}

fn temp_file() -> Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("msg-").suffix(".dat");
    let created = match &crate::settings().message.temp_dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    };
    created.map_err(|e| StreamError::resource_with_context("failed to create spill file", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::WINDOWS_1252;

    #[test]
    fn test_text_spill_uses_charset_on_disk() {
        let reference = FileReference::from_text("café", WINDOWS_1252).unwrap();

        assert!(!reference.is_binary());
        assert_eq!(reference.size(), 4);
        assert_eq!(std::fs::read(reference.path()).unwrap(), vec![b'c', b'a', b'f', 0xE9]);
        assert_eq!(reference.open_reader(UTF_8).unwrap().read_all().unwrap(), "café");
    }

    #[test]
    fn test_each_reader_starts_at_the_beginning() {
        let reference = FileReference::from_bytes(b"payload").unwrap();

        let first = reference.open_byte_reader().unwrap().read_all().unwrap();
        let second = reference.open_byte_reader().unwrap().read_all().unwrap();
        assert_eq!(first, b"payload");
        assert_eq!(second, b"payload");
    }

    #[test]
    fn test_release_removes_file_with_last_reference() {
        let reference = FileReference::from_bytes(b"x").unwrap();
        let path = reference.path().to_path_buf();
        let clone = reference.clone();

        reference.release().unwrap();
        assert!(path.exists());
        clone.release().unwrap();
        assert!(!path.exists());
    }
}
