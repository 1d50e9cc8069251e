//! XML event handling: the handler trait, a serialising writer and the parser
//! that drives a handler from bytes

use super::TextSink;
use crate::error::{Result, StreamError};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::BufRead;

/// Push-style consumer of XML events
pub trait XmlEventHandler: Send {
    fn start_document(&mut self) -> Result<()> {
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        Ok(())
    }

    fn start_element(&mut self, name: &str, attributes: &[(String, String)]) -> Result<()>;

    fn end_element(&mut self, name: &str) -> Result<()>;

    fn characters(&mut self, text: &str) -> Result<()>;

    fn comment(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Serialises events as XML text into a character sink
pub struct XmlWriter<T> {
    out: T,
    depth: usize,
}

impl<T: TextSink> XmlWriter<T> {
    pub fn new(out: T) -> Self {
        Self { out, depth: 0 }
    }

    pub fn into_inner(self) -> T {
        self.out
    }
}

impl<T: TextSink> XmlEventHandler for XmlWriter<T> {
    fn start_element(&mut self, name: &str, attributes: &[(String, String)]) -> Result<()> {
        let mut tag = String::with_capacity(name.len() + 2);
        tag.push('<');
        tag.push_str(name);
        for (key, value) in attributes {
            tag.push(' ');
            tag.push_str(key);
            tag.push_str("=\"");
            tag.push_str(&escape(value.as_str()));
            tag.push('"');
        }
        tag.push('>');
        self.depth += 1;
        self.out.write_str(&tag)
    }

    fn end_element(&mut self, name: &str) -> Result<()> {
        self.depth = self.depth.saturating_sub(1);
        self.out.write_str(&format!("</{}>", name))
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        self.out.write_str(&escape(text))
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.out.write_str(&format!("<!--{}-->", text))
    }

    fn end_document(&mut self) -> Result<()> {
        if self.depth != 0 {
            return Err(StreamError::conversion(format!(
                "document ended with {} unclosed elements",
                self.depth
            )));
        }
        self.out.flush()
    }

    fn close(&mut self) -> Result<()> {
        self.out.close()
    }
}

fn utf8(raw: &[u8]) -> Result<&str> {
    std::str::from_utf8(raw).map_err(|e| StreamError::conversion(format!("invalid UTF-8 in XML: {}", e)))
}

fn element_parts(start: &BytesStart<'_>) -> Result<(String, Vec<(String, String)>)> {
    let name = utf8(start.name().as_ref())?.to_string();
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        let key = utf8(attribute.key.as_ref())?.to_string();
        let value = attribute.unescape_value()?.into_owned();
        attributes.push((key, value));
    }
    Ok((name, attributes))
}

/// Parse XML from `reader`, feeding every event to `handler`
pub fn parse_xml_events<R, H>(reader: R, handler: &mut H) -> Result<()>
where
    R: BufRead,
    H: XmlEventHandler + ?Sized,
{
    let mut xml = Reader::from_reader(reader);
    xml.trim_text(false);
    let mut buf = Vec::new();

    handler.start_document()?;
    loop {
        match xml.read_event_into(&mut buf)? {
            Event::Start(start) => {
                let (name, attributes) = element_parts(&start)?;
                handler.start_element(&name, &attributes)?;
            }
            Event::Empty(start) => {
                let (name, attributes) = element_parts(&start)?;
                handler.start_element(&name, &attributes)?;
                handler.end_element(&name)?;
            }
            Event::End(end) => {
                handler.end_element(utf8(end.name().as_ref())?)?;
            }
            Event::Text(text) => {
                let text = text.unescape()?;
                if !text.is_empty() {
                    handler.characters(&text)?;
                }
            }
            Event::CData(data) => {
                let raw = data.into_inner();
                handler.characters(utf8(&raw)?)?;
            }
            Event::Comment(comment) => {
                let raw = comment.into_inner();
                handler.comment(utf8(&raw)?)?;
            }
            Event::Eof => break,
            Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
        }
        buf.clear();
    }
    handler.end_document()
}
