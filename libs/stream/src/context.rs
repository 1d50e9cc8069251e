//! Ordered metadata attached to every message

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known context keys
pub mod keys {
    pub const CHARSET: &str = "Metadata.Charset";
    pub const SIZE: &str = "Metadata.Size";
    pub const MIME_TYPE: &str = "Metadata.MimeType";
    pub const MODIFICATION_TIME: &str = "Metadata.ModificationTime";
    pub const NAME: &str = "Metadata.Name";
    pub const LOCATION: &str = "Metadata.Location";

    /// Prefix for free-form header entries
    pub const HEADER_PREFIX: &str = "Header.";
}

/// Value stored under a context key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextValue {
    Text(String),
    Number(i64),
    Time(DateTime<Utc>),
}

impl ContextValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ContextValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            ContextValue::Number(n) => Some(*n),
            ContextValue::Text(text) => text.trim().parse().ok(),
            ContextValue::Time(_) => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            ContextValue::Time(time) => Some(*time),
            _ => None,
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextValue::Text(text) => f.write_str(text),
            ContextValue::Number(n) => write!(f, "{}", n),
            ContextValue::Time(time) => write!(f, "{}", time.to_rfc3339()),
        }
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::Text(value)
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::Text(value.to_string())
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        ContextValue::Number(value)
    }
}

impl From<DateTime<Utc>> for ContextValue {
    fn from(value: DateTime<Utc>) -> Self {
        ContextValue::Time(value)
    }
}

/// Insertion-ordered key/value metadata. Setting an existing key keeps its position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContext {
    entries: Vec<(String, ContextValue)>,
}

impl MessageContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, returning the context for chaining
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn with_charset(self, charset: impl Into<String>) -> Self {
        self.with(keys::CHARSET, charset.into())
    }

    pub fn with_size(self, size: u64) -> Self {
        self.with(keys::SIZE, size.min(i64::MAX as u64) as i64)
    }

    pub fn with_mime_type(self, mime_type: impl Into<String>) -> Self {
        self.with(keys::MIME_TYPE, mime_type.into())
    }

    pub fn with_modification_time(self, time: DateTime<Utc>) -> Self {
        self.with(keys::MODIFICATION_TIME, time)
    }

    pub fn with_name(self, name: impl Into<String>) -> Self {
        self.with(keys::NAME, name.into())
    }

    pub fn with_location(self, location: impl Into<String>) -> Self {
        self.with(keys::LOCATION, location.into())
    }

    pub fn with_header(self, name: &str, value: impl Into<String>) -> Self {
        self.with(format!("{}{}", keys::HEADER_PREFIX, name), value.into())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<ContextValue> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn charset(&self) -> Option<&str> {
        self.get(keys::CHARSET).and_then(ContextValue::as_str)
    }

    pub fn size(&self) -> Option<u64> {
        self.get(keys::SIZE)
            .and_then(ContextValue::as_number)
            .and_then(|n| u64::try_from(n).ok())
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.get(keys::MIME_TYPE).and_then(ContextValue::as_str)
    }

    pub fn modification_time(&self) -> Option<DateTime<Utc>> {
        self.get(keys::MODIFICATION_TIME).and_then(ContextValue::as_time)
    }

    pub fn name(&self) -> Option<&str> {
        self.get(keys::NAME).and_then(ContextValue::as_str)
    }

    pub fn location(&self) -> Option<&str> {
        self.get(keys::LOCATION).and_then(ContextValue::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.get(&format!("{}{}", keys::HEADER_PREFIX, name))
            .and_then(ContextValue::as_str)
    }

    /// Header entries in insertion order, prefix stripped
    pub fn headers(&self) -> impl Iterator<Item = (&str, &ContextValue)> {
        self.entries
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(keys::HEADER_PREFIX).map(|name| (name, v)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContextValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_keeps_insertion_order() {
        let context = MessageContext::new()
            .with_name("order.xml")
            .with_charset("UTF-8")
            .with_header("X-Trace", "abc")
            .with_size(12);

        let keys: Vec<&str> = context.iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![keys::NAME, keys::CHARSET, "Header.X-Trace", keys::SIZE]
        );
        assert_eq!(context.size(), Some(12));
        assert_eq!(context.header("X-Trace"), Some("abc"));
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let mut context = MessageContext::new().with_charset("UTF-8").with_size(1);
        context.set(keys::CHARSET, "ISO-8859-1");

        assert_eq!(context.iter().next().map(|(k, _)| k), Some(keys::CHARSET));
        assert_eq!(context.charset(), Some("ISO-8859-1"));
        assert_eq!(context.len(), 2);
    }

    #[test]
    fn test_remove_and_textual_size() {
        let mut context = MessageContext::new().with(keys::SIZE, "42");
        assert_eq!(context.size(), Some(42));

        assert!(context.remove(keys::SIZE).is_some());
        assert_eq!(context.size(), None);
        assert!(context.remove(keys::SIZE).is_none());
    }

    #[test]
    fn test_copy_is_by_value() {
        let original = MessageContext::new().with_name("a");
        let mut copy = original.clone();
        copy.set(keys::NAME, "b");

        assert_eq!(original.name(), Some("a"));
        assert_eq!(copy.name(), Some("b"));
    }
}
