//! The polymorphic message value
//!
//! A message holds exactly one representation of its content plus a
//! [`MessageContext`]. Conversions between representations are lazy. One-shot
//! streams are replaced by whatever they were converted into, so a spent
//! stream is never handed out twice.

mod convert;
mod wire;
mod wrapper;

pub use convert::IntoMessage;
pub use wrapper::MessageWrapper;

use crate::charset::{self, DecodingReader, EncodingReader};
use crate::context::{keys, MessageContext};
use crate::error::{Result, StreamError};
use crate::file_reference::FileReference;
use crate::node::Node;
use crate::reader::{shared_cursor, ByteReader, CharReader, SharedCursor};
use crate::resources::{Closeable, Resources};
use crate::session::Session;
use bytes::Bytes;
use encoding_rs::{Encoding, UTF_8};
use std::io::{self, BufReader, Read};
use std::sync::Arc;
use stream_config::defaults::message::{AUTO_DETECT_CHARSET, CHARSET_SNIFF_LENGTH};
use tracing::{debug, info, warn};

/// Re-invocable source of a fresh byte stream
pub type ByteSupplier = Arc<dyn Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync>;

pub(crate) enum Payload {
    Null,
    Text(String),
    Bytes(Bytes),
    CharStream(SharedCursor),
    ByteStream(SharedCursor),
    Node(Arc<Node>),
    Disk(FileReference),
    Supplier(ByteSupplier),
}

impl Payload {
    fn is_repeatable(&self) -> bool {
        !matches!(self, Payload::CharStream(_) | Payload::ByteStream(_))
    }

    fn is_binary(&self) -> bool {
        match self {
            Payload::Bytes(_) | Payload::ByteStream(_) | Payload::Supplier(_) => true,
            Payload::Disk(reference) => reference.is_binary(),
            Payload::Null | Payload::Text(_) | Payload::CharStream(_) | Payload::Node(_) => false,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Payload::Null => "null",
            Payload::Text(_) => "text",
            Payload::Bytes(_) => "bytes",
            Payload::CharStream(_) => "character stream",
            Payload::ByteStream(_) => "byte stream",
            Payload::Node(_) => "node",
            Payload::Disk(_) => "disk",
            Payload::Supplier(_) => "supplier",
        }
    }
}

/// A unit of data travelling through the pipeline
pub struct Message {
    payload: Payload,
    context: MessageContext,
    request_class: String,
    resources: Resources,
    sniff_failed: bool,
    closed: bool,
}

impl Message {
    fn with_payload(payload: Payload, request_class: &str) -> Self {
        Self {
            payload,
            context: MessageContext::new(),
            request_class: request_class.to_string(),
            resources: Resources::new(),
            sniff_failed: false,
            closed: false,
        }
    }

    /// The empty message
    pub fn null() -> Self {
        Self::with_payload(Payload::Null, "null")
    }

    /// Owned text; repeatable
    pub fn from_text<S: Into<String>>(text: S) -> Self {
        Self::with_payload(Payload::Text(text.into()), std::any::type_name::<S>())
    }

    /// In-memory bytes; repeatable and binary
    pub fn from_bytes<B: Into<Bytes>>(bytes: B) -> Self {
        Self::with_payload(Payload::Bytes(bytes.into()), std::any::type_name::<B>())
    }

    /// One-shot character stream; `reader` must produce UTF-8
    pub fn from_char_stream<R: Read + Send + 'static>(reader: R) -> Self {
        Self::with_payload(
            Payload::CharStream(shared_cursor(Box::new(reader))),
            std::any::type_name::<R>(),
        )
    }

    /// One-shot byte stream
    pub fn from_byte_stream<R: Read + Send + 'static>(reader: R) -> Self {
        Self::with_payload(
            Payload::ByteStream(shared_cursor(Box::new(reader))),
            std::any::type_name::<R>(),
        )
    }

    /// Structured node; the other views render it as XML text
    pub fn from_node(node: Node) -> Self {
        Self::with_payload(Payload::Node(Arc::new(node)), std::any::type_name::<Node>())
    }

    /// Content already spilled to disk
    pub fn from_file_reference(reference: FileReference) -> Self {
        Self::with_payload(Payload::Disk(reference), std::any::type_name::<FileReference>())
    }

    /// Repeatable byte source; every conversion invokes `supplier` afresh
    pub fn from_supplier<F>(supplier: F) -> Self
    where
        F: Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync + 'static,
    {
        Self::with_payload(Payload::Supplier(Arc::new(supplier)), std::any::type_name::<F>())
    }

    /// Replace the context
    pub fn with_context(mut self, context: MessageContext) -> Self {
        self.context = context;
        self
    }

    /// Record the charset of byte content in the context
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.context.set(keys::CHARSET, charset.into());
        self
    }

    /// Metadata attached to the message
    pub fn context(&self) -> &MessageContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut MessageContext {
        &mut self.context
    }

    /// Type name of the representation the message was built from
    pub fn request_class(&self) -> &str {
        &self.request_class
    }

    /// Whether the message carries no content at all
    pub fn is_null(&self) -> bool {
        matches!(self.payload, Payload::Null)
    }

    /// Whether the representation is bytes rather than characters
    pub fn is_binary(&self) -> bool {
        self.payload.is_binary()
    }

    /// Whether the content can be read more than once
    pub fn is_repeatable(&self) -> bool {
        self.payload.is_repeatable()
    }

    /// Whether the content lives in a spill file
    pub fn is_disk_backed(&self) -> bool {
        matches!(self.payload, Payload::Disk(_))
    }

    /// Byte count when it is known without consuming anything
    pub fn size(&self) -> Option<u64> {
        match &self.payload {
            Payload::Null => Some(0),
            Payload::Text(text) => Some(text.len() as u64),
            Payload::Bytes(bytes) => Some(bytes.len() as u64),
            Payload::Disk(reference) => Some(reference.size()),
            Payload::Node(node) => Some(node.to_xml().len() as u64),
            Payload::CharStream(_) | Payload::ByteStream(_) | Payload::Supplier(_) => {
                self.context.size()
            }
        }
    }

    /// Known to hold zero bytes
    pub fn is_empty(&self) -> bool {
        self.size() == Some(0)
    }

    /// Charset used to turn this message into bytes or characters: explicit
    /// context charset, sniffed content when set to "auto", the caller's
    /// default, then the configured fallback.
    pub fn charset(&mut self, default_charset: Option<&str>) -> Result<&'static Encoding> {
        if let Some(label) = self.context.charset().map(str::to_string) {
            if !label.eq_ignore_ascii_case(AUTO_DETECT_CHARSET) {
                return charset::resolve(&label);
            }
            if !self.sniff_failed {
                match self.sniff_prefix()?.as_deref().and_then(charset::sniff) {
                    Some(encoding) => {
                        debug!(
                            "{}: detected charset {}",
                            self.request_class,
                            encoding.name()
                        );
                        self.context.set(keys::CHARSET, encoding.name());
                        self.context.remove(keys::SIZE);
                        return Ok(encoding);
                    }
                    None => {
                        debug!("{}: charset detection failed", self.request_class);
                        self.sniff_failed = true;
                    }
                }
            }
        }
        match default_charset {
            Some(label) => charset::resolve(label),
            None => Ok(charset::default_charset()),
        }
    }

    fn sniff_prefix(&mut self) -> Result<Option<Vec<u8>>> {
        let prefix = match &self.payload {
            Payload::Bytes(bytes) => Some(bytes[..bytes.len().min(CHARSET_SNIFF_LENGTH)].to_vec()),
            Payload::ByteStream(cursor) => Some(cursor.lock().peek(CHARSET_SNIFF_LENGTH)?),
            Payload::Supplier(supplier) => {
                let mut prefix = Vec::new();
                open_supplier(supplier)?
                    .take(CHARSET_SNIFF_LENGTH as u64)
                    .read_to_end(&mut prefix)?;
                Some(prefix)
            }
            Payload::Disk(reference) if reference.is_binary() => {
                Some(reference.open_byte_reader()?.peek(CHARSET_SNIFF_LENGTH)?)
            }
            _ => None,
        };
        Ok(prefix)
    }

    /// Content as text
    pub fn as_text(&mut self, default_charset: Option<&str>) -> Result<Option<String>> {
        match &self.payload {
            Payload::Null => return Ok(None),
            Payload::Text(text) => return Ok(Some(text.clone())),
            Payload::Node(node) => return Ok(Some(node.to_xml())),
            Payload::Disk(reference) if !reference.is_binary() => {
                let text = reference.open_reader(UTF_8)?.read_all().map_err(read_failure)?;
                return Ok(Some(text));
            }
            Payload::CharStream(cursor) => {
                let text = CharReader::from_cursor(Arc::clone(cursor))
                    .read_all()
                    .map_err(read_failure)?;
                self.payload = Payload::Text(text.clone());
                return Ok(Some(text));
            }
            _ => {}
        }
        let encoding = self.charset(default_charset)?;
        let bytes = self.binary_content()?;
        Ok(Some(charset::decode(&bytes, encoding)))
    }

    /// Content as bytes
    pub fn as_bytes(&mut self, default_charset: Option<&str>) -> Result<Option<Bytes>> {
        if self.is_null() {
            return Ok(None);
        }
        if self.is_binary() {
            return self.binary_content().map(Some);
        }
        let encoding = self.charset(default_charset)?;
        let text = self.as_text(None)?.unwrap_or_default();
        Ok(Some(Bytes::from(charset::encode(&text, encoding)?)))
    }

    fn binary_content(&mut self) -> Result<Bytes> {
        match &self.payload {
            Payload::Bytes(bytes) => Ok(bytes.clone()),
            Payload::ByteStream(cursor) => {
                let mut buffer = Vec::new();
                cursor.lock().read_to_end(&mut buffer)?;
                let bytes = Bytes::from(buffer);
                self.payload = Payload::Bytes(bytes.clone());
                Ok(bytes)
            }
            Payload::Supplier(supplier) => {
                let mut buffer = Vec::new();
                open_supplier(supplier)?.read_to_end(&mut buffer)?;
                Ok(Bytes::from(buffer))
            }
            Payload::Disk(reference) => {
                Ok(Bytes::from(reference.open_byte_reader()?.read_all()?))
            }
            other => Err(StreamError::illegal_state(format!(
                "{} payload is not byte oriented",
                other.kind()
            ))),
        }
    }

    /// Content as a byte stream
    pub fn as_byte_stream(&mut self, default_charset: Option<&str>) -> Result<Option<ByteReader>> {
        let reader = match &self.payload {
            Payload::Null => return Ok(None),
            Payload::ByteStream(cursor) => ByteReader::from_cursor(Arc::clone(cursor)),
            Payload::Bytes(bytes) => ByteReader::new(io::Cursor::new(bytes.clone())),
            Payload::Supplier(supplier) => ByteReader::new(open_supplier(supplier)?),
            Payload::Disk(reference) if reference.is_binary() => reference.open_byte_reader()?,
            _ => {
                let encoding = self.charset(default_charset)?;
                return self.encoded_byte_stream(encoding).map(Some);
            }
        };
        Ok(Some(reader))
    }

    fn encoded_byte_stream(&mut self, encoding: &'static Encoding) -> Result<ByteReader> {
        match &self.payload {
            Payload::Text(text) => Ok(ByteReader::new(io::Cursor::new(charset::encode(
                text, encoding,
            )?))),
            Payload::Node(node) => Ok(ByteReader::new(io::Cursor::new(charset::encode(
                &node.to_xml(),
                encoding,
            )?))),
            Payload::Disk(reference) => Ok(ByteReader::new(EncodingReader::new(
                reference.open_reader(UTF_8)?,
                encoding,
            )?)),
            Payload::CharStream(cursor) => {
                let encoded = EncodingReader::new(CharReader::from_cursor(Arc::clone(cursor)), encoding)?;
                let converted = shared_cursor(Box::new(encoded));
                self.payload = Payload::ByteStream(Arc::clone(&converted));
                self.context.set(keys::CHARSET, encoding.name());
                debug!("{}: character stream now read as bytes", self.request_class);
                Ok(ByteReader::from_cursor(converted))
            }
            other => Err(StreamError::illegal_state(format!(
                "{} payload is not character oriented",
                other.kind()
            ))),
        }
    }

    /// Content as a character stream
    pub fn as_character_stream(&mut self, default_charset: Option<&str>) -> Result<Option<CharReader>> {
        let reader = match &self.payload {
            Payload::Null => return Ok(None),
            Payload::CharStream(cursor) => CharReader::from_cursor(Arc::clone(cursor)),
            Payload::Text(text) => CharReader::new(io::Cursor::new(text.clone().into_bytes())),
            Payload::Node(node) => CharReader::new(io::Cursor::new(node.to_xml().into_bytes())),
            Payload::Disk(reference) if !reference.is_binary() => reference.open_reader(UTF_8)?,
            _ => {
                let encoding = self.charset(default_charset)?;
                return self.decoded_char_stream(encoding).map(Some);
            }
        };
        Ok(Some(reader))
    }

    fn decoded_char_stream(&mut self, encoding: &'static Encoding) -> Result<CharReader> {
        match &self.payload {
            Payload::Bytes(bytes) => Ok(CharReader::new(DecodingReader::new(
                io::Cursor::new(bytes.clone()),
                encoding,
            ))),
            Payload::Supplier(supplier) => Ok(CharReader::new(DecodingReader::new(
                open_supplier(supplier)?,
                encoding,
            ))),
            Payload::Disk(reference) => reference.open_reader(encoding),
            Payload::ByteStream(cursor) => {
                let decoded = DecodingReader::new(ByteReader::from_cursor(Arc::clone(cursor)), encoding);
                let converted = shared_cursor(Box::new(decoded));
                self.payload = Payload::CharStream(Arc::clone(&converted));
                debug!("{}: byte stream now read as characters", self.request_class);
                Ok(CharReader::from_cursor(converted))
            }
            other => Err(StreamError::illegal_state(format!(
                "{} payload is not byte oriented",
                other.kind()
            ))),
        }
    }

    /// Content as an element tree
    pub fn as_node(&mut self) -> Result<Option<Node>> {
        if let Payload::Node(node) = &self.payload {
            return Ok(Some(Node::clone(node)));
        }
        let one_shot = !self.is_repeatable();
        let Some(reader) = self.as_character_stream(None)? else {
            return Ok(None);
        };
        let node = Node::parse_reader(BufReader::new(reader))?;
        if one_shot {
            self.payload = Payload::Node(Arc::new(node.clone()));
        }
        Ok(Some(node))
    }

    /// Up to `limit` characters from the start, without consuming them
    pub fn peek(&mut self, limit: usize) -> Result<Option<String>> {
        match self.as_character_stream(None)? {
            Some(mut reader) => Ok(Some(reader.peek(limit).map_err(read_failure)?)),
            None => Ok(None),
        }
    }

    /// Make the content repeatable using the configured memory threshold
    pub fn preserve(&mut self) -> Result<()> {
        self.preserve_with_threshold(crate::settings().message.memory_threshold)
    }

    /// Keep content of at most `threshold` bytes in memory, spill anything
    /// larger or of unknown size to disk
    pub fn preserve_with_threshold(&mut self, threshold: u64) -> Result<()> {
        let size = self.size();
        let spill = size.map_or(true, |size| size > threshold);
        let preserved = match &self.payload {
            Payload::Null | Payload::Disk(_) | Payload::Node(_) | Payload::Supplier(_) => {
                return Ok(())
            }
            Payload::Text(text) if spill => Payload::Disk(FileReference::from_text(text, UTF_8)?),
            Payload::Bytes(bytes) if spill => Payload::Disk(FileReference::from_bytes(bytes)?),
            Payload::Text(_) | Payload::Bytes(_) => return Ok(()),
            Payload::CharStream(cursor) => {
                let mut reader = CharReader::from_cursor(Arc::clone(cursor));
                if spill {
                    Payload::Disk(FileReference::from_char_reader(reader, UTF_8)?)
                } else {
                    Payload::Text(reader.read_all().map_err(read_failure)?)
                }
            }
            Payload::ByteStream(cursor) => {
                let mut reader = ByteReader::from_cursor(Arc::clone(cursor));
                if spill {
                    Payload::Disk(FileReference::from_byte_reader(reader)?)
                } else {
                    Payload::Bytes(Bytes::from(reader.read_all()?))
                }
            }
        };

        if let Payload::Disk(reference) = &preserved {
            info!(
                "{}: spilled {} of {} bytes to {:?}",
                self.request_class,
                self.payload.kind(),
                reference.size(),
                reference.path()
            );
        }
        self.payload = preserved;
        Ok(())
    }

    /// Independent copy; a one-shot source is preserved first so the copy
    /// never shares it
    pub fn copy_message(&mut self) -> Result<Message> {
        if !self.is_repeatable() {
            self.preserve()?;
        }
        let payload = match &self.payload {
            Payload::Null => Payload::Null,
            Payload::Text(text) => Payload::Text(text.clone()),
            Payload::Bytes(bytes) => Payload::Bytes(bytes.clone()),
            Payload::Node(node) => Payload::Node(Arc::clone(node)),
            Payload::Disk(reference) => Payload::Disk(reference.clone()),
            Payload::Supplier(supplier) => Payload::Supplier(Arc::clone(supplier)),
            other => {
                return Err(StreamError::illegal_state(format!(
                    "{} payload is still one-shot after preserve",
                    other.kind()
                )))
            }
        };
        let mut copy = Message::with_payload(payload, &self.request_class);
        copy.context = self.context.clone();
        copy.sniff_failed = self.sniff_failed;
        Ok(copy)
    }

    /// Release `resource` together with this message
    pub fn register_resource(&mut self, resource: Box<dyn Closeable>) {
        self.resources.register(resource);
    }

    /// Hand the extra resources to `session`; they are released when the
    /// session closes instead of when this message does
    pub fn close_on_close_of(&mut self, session: &mut Session) {
        if self.resources.is_empty() {
            return;
        }
        let resources = std::mem::take(&mut self.resources);
        session.close_on_exit(Box::new(resources));
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release the representation, then every registered resource in
    /// registration order. Every step runs even when an earlier one fails.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut errors = Vec::new();
        if let Payload::Disk(reference) = std::mem::replace(&mut self.payload, Payload::Null) {
            if let Err(e) = reference.release() {
                warn!("{}: {}", self.request_class, e);
                errors.push(e);
            }
        }
        if let Err(e) = self.resources.close_all(&self.request_class) {
            errors.extend(e.into_failures());
        }
        StreamError::from_release_failures(errors)
    }

    pub(crate) fn payload(&self) -> &Payload {
        &self.payload
    }
}

impl Closeable for Message {
    fn close(&mut self) -> Result<()> {
        Message::close(self)
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("{}: release on drop failed: {}", self.request_class, e);
        }
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::null()
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("payload", &self.payload.kind())
            .field("request_class", &self.request_class)
            .field("context", &self.context)
            .field("resources", &self.resources)
            .finish()
    }
}

fn open_supplier(supplier: &ByteSupplier) -> Result<Box<dyn Read + Send>> {
    let open = &**supplier;
    open().map_err(|e| StreamError::resource_with_context("failed to open message source", e))
}

fn read_failure(err: io::Error) -> StreamError {
    if err.kind() == io::ErrorKind::InvalidData {
        StreamError::conversion(err.to_string())
    } else {
        StreamError::from(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{CountingResource, FailingResource, ReleaseLog};
    use std::io::Cursor;

    #[test]
    fn test_text_round_trip_and_size() {
        let mut message = Message::from_text("héllo");

        assert_eq!(message.as_text(None).unwrap().as_deref(), Some("héllo"));
        assert_eq!(message.size(), Some(6));
        assert!(!message.is_binary());
        assert!(message.is_repeatable());
        assert_eq!(message.request_class(), "&str");
    }

    #[test]
    fn test_bytes_decoded_with_context_charset() {
        let mut message = Message::from_bytes(vec![b'c', b'a', b'f', 0xE9]).with_charset("ISO-8859-1");

        assert_eq!(message.as_text(None).unwrap().as_deref(), Some("café"));
        assert_eq!(
            message.as_bytes(None).unwrap().unwrap().as_ref(),
            &[b'c', b'a', b'f', 0xE9]
        );
    }

    #[test]
    fn test_unknown_charset_is_conversion_error() {
        let mut message = Message::from_text("x").with_charset("no-such");

        assert!(message.as_bytes(None).unwrap_err().is_conversion());
    }

    #[test]
    fn test_one_shot_byte_stream_is_cached_after_conversion() {
        let mut message = Message::from_byte_stream(Cursor::new(b"stream".to_vec()));
        assert!(!message.is_repeatable());
        assert_eq!(message.size(), None);

        assert_eq!(message.as_text(None).unwrap().as_deref(), Some("stream"));
        assert!(message.is_repeatable());
        assert_eq!(message.as_text(None).unwrap().as_deref(), Some("stream"));
    }

    #[test]
    fn test_byte_stream_twice_shares_cursor() {
        let mut message = Message::from_byte_stream(Cursor::new(b"0123456789".to_vec()));
        let mut first = message.as_byte_stream(None).unwrap().unwrap();
        let mut head = [0u8; 4];
        first.read_exact(&mut head).unwrap();

        let mut second = message.as_byte_stream(None).unwrap().unwrap();
        assert_eq!(second.read_all().unwrap(), b"456789");
    }

    #[test]
    fn test_char_stream_converted_to_bytes_once() {
        let mut message = Message::from_char_stream(Cursor::new("ab".as_bytes().to_vec()));
        let mut first = message.as_byte_stream(None).unwrap().unwrap();
        assert!(message.is_binary());

        let mut second = message.as_byte_stream(None).unwrap().unwrap();
        let mut one = [0u8; 1];
        first.read_exact(&mut one).unwrap();
        assert_eq!(second.read_all().unwrap(), b"b");
    }

    #[test]
    fn test_auto_charset_sniffs_and_purges_size() {
        let content = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><a>\xE9</a>".to_vec();
        let context = MessageContext::new().with_charset("auto").with_size(99);
        let mut message = Message::from_bytes(content).with_context(context);

        assert_eq!(message.charset(None).unwrap(), encoding_rs::WINDOWS_1252);
        assert_eq!(message.context().size(), None);
        assert_eq!(message.context().charset(), Some("windows-1252"));
    }

    #[test]
    fn test_failed_sniff_falls_back_and_is_not_retried() {
        let mut message = Message::from_bytes(vec![b'a', 0xE9, b'b']).with_charset("auto");

        assert_eq!(message.charset(Some("ISO-8859-1")).unwrap(), encoding_rs::WINDOWS_1252);
        assert!(message.sniff_failed);
        assert_eq!(message.charset(None).unwrap(), UTF_8);
    }

    #[test]
    fn test_preserve_below_threshold_stays_in_memory() {
        let mut message = Message::from_byte_stream(Cursor::new(vec![7u8; 10]));
        message.context_mut().set(keys::SIZE, 10i64);
        message.preserve_with_threshold(64).unwrap();

        assert!(matches!(message.payload(), Payload::Bytes(_)));
    }

    #[test]
    fn test_preserve_unknown_size_spills() {
        let mut message = Message::from_char_stream(Cursor::new("spill me".as_bytes().to_vec()));
        message.preserve_with_threshold(1024).unwrap();

        assert!(matches!(message.payload(), Payload::Disk(_)));
        assert_eq!(message.as_text(None).unwrap().as_deref(), Some("spill me"));
        assert_eq!(message.as_text(None).unwrap().as_deref(), Some("spill me"));
    }

    #[test]
    fn test_peek_does_not_consume_stream() {
        let mut message = Message::from_char_stream(Cursor::new("peekaboo".as_bytes().to_vec()));

        assert_eq!(message.peek(4).unwrap().as_deref(), Some("peek"));
        assert_eq!(message.as_text(None).unwrap().as_deref(), Some("peekaboo"));
    }

    #[test]
    fn test_copy_does_not_share_one_shot_source() {
        let mut message = Message::from_byte_stream(Cursor::new(b"data".to_vec()));
        let mut copy = message.copy_message().unwrap();

        assert_eq!(copy.as_bytes(None).unwrap().unwrap().as_ref(), b"data");
        assert_eq!(message.as_bytes(None).unwrap().unwrap().as_ref(), b"data");
    }

    #[test]
    fn test_node_views() {
        let mut message = Message::from_text("<a><b>x</b></a>");
        let node = message.as_node().unwrap().unwrap();
        assert_eq!(node.text(), "x");

        let mut from_node = Message::from_node(node);
        assert_eq!(from_node.as_text(None).unwrap().as_deref(), Some("<a><b>x</b></a>"));
    }

    #[test]
    fn test_close_releases_resources_in_order_despite_failure() {
        let log = ReleaseLog::new();
        let mut message = Message::from_text("x");
        message.register_resource(Box::new(FailingResource::new("first", &log)));
        message.register_resource(Box::new(CountingResource::new("second", &log)));

        assert!(message.close().is_err());
        assert!(message.close().is_ok());
        assert!(message.is_null());
        assert_eq!(log.entries(), vec!["first", "second"]);
    }

    #[test]
    fn test_close_on_close_of_defers_to_session() {
        let log = ReleaseLog::new();
        let mut session = Session::new();
        let mut message = Message::from_text("x");
        message.register_resource(Box::new(CountingResource::new("deferred", &log)));
        message.close_on_close_of(&mut session);

        message.close().unwrap();
        assert!(log.entries().is_empty());
        session.close().unwrap();
        assert_eq!(log.entries(), vec!["deferred"]);
    }

    #[test]
    fn test_null_message() {
        let mut message = Message::null();

        assert!(message.is_empty());
        assert_eq!(message.as_text(None).unwrap(), None);
        assert!(message.as_byte_stream(None).unwrap().is_none());
    }
}
