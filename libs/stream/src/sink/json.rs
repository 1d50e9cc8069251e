//! JSON event handling: the handler trait, a serialising writer and a
//! streaming parser built on a serde visitor

use super::TextSink;
use crate::error::{Result, StreamError};
use serde::de::{self, DeserializeSeed, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::Number;
use std::fmt;
use std::io::Read;

/// Push-style consumer of JSON events
pub trait JsonEventHandler: Send {
    fn start_document(&mut self) -> Result<()> {
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        Ok(())
    }

    fn start_object(&mut self) -> Result<()>;

    fn end_object(&mut self) -> Result<()>;

    fn start_array(&mut self) -> Result<()>;

    fn end_array(&mut self) -> Result<()>;

    fn key(&mut self, key: &str) -> Result<()>;

    fn string(&mut self, value: &str) -> Result<()>;

    fn number(&mut self, value: &Number) -> Result<()>;

    fn boolean(&mut self, value: bool) -> Result<()>;

    fn null(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Level {
    first: bool,
    object: bool,
}

/// Serialises events as compact JSON into a character sink
pub struct JsonWriter<T> {
    out: T,
    levels: Vec<Level>,
    after_key: bool,
}

impl<T: TextSink> JsonWriter<T> {
    pub fn new(out: T) -> Self {
        Self {
            out,
            levels: Vec::new(),
            after_key: false,
        }
    }

    pub fn into_inner(self) -> T {
        self.out
    }

    fn value_prefix(&mut self) -> Result<()> {
        if self.after_key {
            self.after_key = false;
            return Ok(());
        }
        if let Some(level) = self.levels.last_mut() {
            if level.object {
                return Err(StreamError::conversion("object member written without a key"));
            }
            if !level.first {
                self.out.write_str(",")?;
            }
            level.first = false;
        }
        Ok(())
    }

    fn scalar(&mut self, json: &str) -> Result<()> {
        self.value_prefix()?;
        self.out.write_str(json)
    }

    fn close_level(&mut self, object: bool, token: &str) -> Result<()> {
        match self.levels.pop() {
            Some(level) if level.object == object && !self.after_key => self.out.write_str(token),
            _ => Err(StreamError::conversion(format!("unbalanced '{}'", token))),
        }
    }
}

impl<T: TextSink> JsonEventHandler for JsonWriter<T> {
    fn start_object(&mut self) -> Result<()> {
        self.value_prefix()?;
        self.levels.push(Level {
            first: true,
            object: true,
        });
        self.out.write_str("{")
    }

    fn end_object(&mut self) -> Result<()> {
        self.close_level(true, "}")
    }

    fn start_array(&mut self) -> Result<()> {
        self.value_prefix()?;
        self.levels.push(Level {
            first: true,
            object: false,
        });
        self.out.write_str("[")
    }

    fn end_array(&mut self) -> Result<()> {
        self.close_level(false, "]")
    }

    fn key(&mut self, key: &str) -> Result<()> {
        let level = match self.levels.last_mut() {
            Some(level) if level.object && !self.after_key => level,
            _ => return Err(StreamError::conversion("key outside of an object")),
        };
        let separator = if level.first { "" } else { "," };
        level.first = false;
        let encoded = serde_json::to_string(key)?;
        self.out.write_str(&format!("{}{}:", separator, encoded))?;
        self.after_key = true;
        Ok(())
    }

    fn string(&mut self, value: &str) -> Result<()> {
        let encoded = serde_json::to_string(value)?;
        self.scalar(&encoded)
    }

    fn number(&mut self, value: &Number) -> Result<()> {
        self.scalar(&value.to_string())
    }

    fn boolean(&mut self, value: bool) -> Result<()> {
        self.scalar(if value { "true" } else { "false" })
    }

    fn null(&mut self) -> Result<()> {
        self.scalar("null")
    }

    fn end_document(&mut self) -> Result<()> {
        if !self.levels.is_empty() {
            return Err(StreamError::conversion("document ended inside a container"));
        }
        self.out.flush()
    }

    fn close(&mut self) -> Result<()> {
        self.out.close()
    }
}

/// Forwards every value it deserialises to the handler
struct EventSeed<'a, H: ?Sized> {
    handler: &'a mut H,
    failure: &'a mut Option<StreamError>,
}

impl<'a, H: JsonEventHandler + ?Sized> EventSeed<'a, H> {
    fn forward<E: de::Error>(self, outcome: Result<()>) -> std::result::Result<(), E> {
        outcome.map_err(|err| {
            let message = err.to_string();
            *self.failure = Some(err);
            E::custom(message)
        })
    }
}

impl<'de, 'a, H: JsonEventHandler + ?Sized> DeserializeSeed<'de> for EventSeed<'a, H> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<(), D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de, 'a, H: JsonEventHandler + ?Sized> Visitor<'de> for EventSeed<'a, H> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any JSON value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<(), E> {
        let outcome = self.handler.boolean(v);
        self.forward(outcome)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<(), E> {
        let outcome = self.handler.number(&Number::from(v));
        self.forward(outcome)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<(), E> {
        let outcome = self.handler.number(&Number::from(v));
        self.forward(outcome)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<(), E> {
        let number = Number::from_f64(v).ok_or_else(|| E::custom("non-finite number"))?;
        let outcome = self.handler.number(&number);
        self.forward(outcome)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<(), E> {
        let outcome = self.handler.string(v);
        self.forward(outcome)
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<(), E> {
        let outcome = self.handler.null();
        self.forward(outcome)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<(), E> {
        self.visit_unit()
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<(), A::Error> {
        let outcome = self.handler.start_array();
        let EventSeed { handler, failure } = self;
        EventSeed { handler: &mut *handler, failure: &mut *failure }
            .forward::<A::Error>(outcome)?;
        while seq
            .next_element_seed(EventSeed { handler: &mut *handler, failure: &mut *failure })?
            .is_some()
        {}
        let outcome = handler.end_array();
        EventSeed { handler, failure }.forward(outcome)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<(), A::Error> {
        let outcome = self.handler.start_object();
        let EventSeed { handler, failure } = self;
        EventSeed { handler: &mut *handler, failure: &mut *failure }
            .forward::<A::Error>(outcome)?;
        while let Some(key) = map.next_key::<String>()? {
            let outcome = handler.key(&key);
            EventSeed { handler: &mut *handler, failure: &mut *failure }
            .forward::<A::Error>(outcome)?;
            map.next_value_seed(EventSeed { handler: &mut *handler, failure: &mut *failure })?;
        }
        let outcome = handler.end_object();
        EventSeed { handler, failure }.forward(outcome)
    }
}

/// Parse one JSON document from `reader`, feeding every event to `handler`
pub fn parse_json_events<R, H>(reader: R, handler: &mut H) -> Result<()>
where
    R: Read,
    H: JsonEventHandler + ?Sized,
{
    handler.start_document()?;
    let mut failure = None;
    let mut deserializer = serde_json::Deserializer::from_reader(reader);
    let outcome = EventSeed {
        handler: &mut *handler,
        failure: &mut failure,
    }
    .deserialize(&mut deserializer)
    .and_then(|()| deserializer.end());

    if let Some(err) = failure {
        return Err(err);
    }
    outcome?;
    handler.end_document()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SharedText;
    use crate::test_utils::RecordingJsonHandler;

    #[test]
    fn test_parse_emits_events_in_order() {
        let mut handler = RecordingJsonHandler::new();
        parse_json_events(&br#"{"a":[1,true,null],"b":"x"}"#[..], &mut handler).unwrap();

        assert_eq!(
            handler.events(),
            vec![
                "{", "key(a)", "[", "num(1)", "bool(true)", "null", "]", "key(b)", "str(x)", "}"
            ]
        );
    }

    #[test]
    fn test_handler_failure_is_returned_intact() {
        let mut handler = RecordingJsonHandler::failing_on_key("b");
        let err = parse_json_events(&br#"{"a":1,"b":2}"#[..], &mut handler).unwrap_err();

        assert!(matches!(err, StreamError::Handler(_)));
    }

    #[test]
    fn test_trailing_garbage_is_rejected() {
        let mut handler = RecordingJsonHandler::new();
        let err = parse_json_events(&b"[1] x"[..], &mut handler).unwrap_err();

        assert!(err.is_conversion());
    }

    #[test]
    fn test_writer_reproduces_compact_json() {
        let text = SharedText::new();
        let mut writer = JsonWriter::new(text.clone());
        let document = r#"{"a":[1,2.5,{"q":"\"x\""}],"b":false,"c":null}"#;
        parse_json_events(document.as_bytes(), &mut writer).unwrap();

        assert_eq!(text.contents(), document);
    }

    #[test]
    fn test_writer_rejects_value_without_key() {
        let mut writer = JsonWriter::new(SharedText::new());
        writer.start_object().unwrap();

        assert!(writer.string("orphan").unwrap_err().is_conversion());
    }
}
