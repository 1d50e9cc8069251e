//! Wrapping foreign values as messages

use super::{Message, MessageWrapper};
use crate::context::MessageContext;
use crate::error::{Result, StreamError};
use crate::node::Node;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use url::Url;

/// Conversion into a [`Message`]. A message converts to itself, so nothing is
/// ever wrapped twice.
pub trait IntoMessage {
    fn into_message(self) -> Result<Message>;
}

impl IntoMessage for Message {
    fn into_message(self) -> Result<Message> {
        Ok(self)
    }
}

impl IntoMessage for MessageWrapper {
    fn into_message(self) -> Result<Message> {
        Ok(self.into_inner())
    }
}

impl IntoMessage for String {
    fn into_message(self) -> Result<Message> {
        Ok(Message::from_text(self))
    }
}

impl IntoMessage for &str {
    fn into_message(self) -> Result<Message> {
        Ok(Message::from_text(self))
    }
}

impl IntoMessage for Vec<u8> {
    fn into_message(self) -> Result<Message> {
        Ok(Message::from_bytes(self))
    }
}

impl IntoMessage for Bytes {
    fn into_message(self) -> Result<Message> {
        Ok(Message::from_bytes(self))
    }
}

impl IntoMessage for &[u8] {
    fn into_message(self) -> Result<Message> {
        Ok(Message::from_bytes(Bytes::copy_from_slice(self)))
    }
}

impl IntoMessage for Node {
    fn into_message(self) -> Result<Message> {
        Ok(Message::from_node(self))
    }
}

impl IntoMessage for PathBuf {
    fn into_message(self) -> Result<Message> {
        let metadata = fs::metadata(&self)
            .map_err(|e| StreamError::resource_with_context(format!("{}", self.display()), e))?;
        let context = file_context(&self, &metadata);
        let path = self;
        Ok(Message::from_supplier(move || {
            let file = File::open(&path)?;
            Ok(Box::new(BufReader::new(file)) as Box<dyn Read + Send>)
        })
        .with_context(context))
    }
}

impl IntoMessage for &Path {
    fn into_message(self) -> Result<Message> {
        self.to_path_buf().into_message()
    }
}

/// An open file is a one-shot stream; its length is recorded as the size
impl IntoMessage for File {
    fn into_message(self) -> Result<Message> {
        let size = self.metadata()?.len();
        Ok(Message::from_byte_stream(BufReader::new(self))
            .with_context(MessageContext::new().with_size(size)))
    }
}

impl IntoMessage for Url {
    fn into_message(self) -> Result<Message> {
        if self.scheme() != "file" {
            return Err(StreamError::conversion(format!(
                "cannot read message from '{}' URL",
                self.scheme()
            )));
        }
        let path = self
            .to_file_path()
            .map_err(|_| StreamError::conversion(format!("'{}' is not a local file URL", self)))?;
        let mut message = path.into_message()?;
        message.context_mut().set(crate::context::keys::LOCATION, self.to_string());
        Ok(message)
    }
}

fn file_context(path: &Path, metadata: &fs::Metadata) -> MessageContext {
    let mut context = MessageContext::new()
        .with_location(path.display().to_string())
        .with_size(metadata.len());
    if let Some(name) = path.file_name() {
        context = context.with_name(name.to_string_lossy());
    }
    if let Ok(modified) = metadata.modified() {
        context = context.with_modification_time(DateTime::<Utc>::from(modified));
    }
    context
}

impl Message {
    /// Wrap anything convertible, leaving existing messages untouched
    pub fn as_message(value: impl IntoMessage) -> Result<Message> {
        value.into_message()
    }

    /// Convert to text and release the message
    pub fn text_of(value: impl IntoMessage) -> Result<Option<String>> {
        let mut message = value.into_message()?;
        let text = message.as_text(None);
        let closed = message.close();
        let text = text?;
        closed?;
        Ok(text)
    }

    /// Convert to bytes and release the message
    pub fn bytes_of(value: impl IntoMessage) -> Result<Option<Bytes>> {
        let mut message = value.into_message()?;
        let bytes = message.as_bytes(None);
        let closed = message.close();
        let bytes = bytes?;
        closed?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::keys;
    use std::io::Write;

    #[test]
    fn test_message_is_not_wrapped_twice() {
        let message = Message::from_text("once").with_charset("UTF-8");
        let mut same = Message::as_message(message).unwrap();

        assert_eq!(same.request_class(), "&str");
        assert_eq!(same.as_text(None).unwrap().as_deref(), Some("once"));
    }

    #[test]
    fn test_path_is_repeatable_with_metadata() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"file body").unwrap();

        let mut message = file.path().into_message().unwrap();

        assert!(message.is_repeatable());
        assert!(message.is_binary());
        assert_eq!(message.size(), Some(9));
        assert!(message.context().name().is_some());
        assert!(message.context().modification_time().is_some());
        assert_eq!(message.as_text(None).unwrap().as_deref(), Some("file body"));
        assert_eq!(message.as_text(None).unwrap().as_deref(), Some("file body"));
    }

    #[test]
    fn test_open_file_is_one_shot_with_size() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"abc").unwrap();
        std::io::Seek::rewind(&mut file).unwrap();

        let message = file.into_message().unwrap();

        assert!(!message.is_repeatable());
        assert_eq!(message.size(), Some(3));
    }

    #[test]
    fn test_url_schemes() {
        let remote = Url::parse("https://example.org/a.xml").unwrap();
        assert!(remote.into_message().unwrap_err().is_conversion());

        let file = tempfile::NamedTempFile::new().unwrap();
        let url = Url::from_file_path(file.path()).unwrap();
        let message = url.clone().into_message().unwrap();
        assert_eq!(message.context().location(), Some(url.as_str()));
        assert!(message.context().contains(keys::SIZE));
    }

    #[test]
    fn test_text_of_and_bytes_of() {
        assert_eq!(Message::text_of(vec![b'h', b'i']).unwrap().as_deref(), Some("hi"));
        assert_eq!(Message::bytes_of("hi").unwrap().unwrap().as_ref(), b"hi");
        assert_eq!(Message::text_of(Message::null()).unwrap(), None);
    }
}
