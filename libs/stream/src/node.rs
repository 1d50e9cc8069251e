//! Structured document representation

use crate::error::{Result, StreamError};
use crate::sink::{parse_xml_events, XmlEventHandler};
use quick_xml::escape::escape;
use serde::{Deserialize, Serialize};
use std::io::BufRead;

/// Element tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<NodeChild>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeChild {
    Element(Node),
    Text(String),
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(NodeChild::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(NodeChild::Text(text.into()));
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Child elements, skipping text
    pub fn elements(&self) -> impl Iterator<Item = &Node> {
        self.children.iter().filter_map(|child| match child {
            NodeChild::Element(node) => Some(node),
            NodeChild::Text(_) => None,
        })
    }

    /// Concatenated text of this element and its descendants
    pub fn text(&self) -> String {
        let mut text = String::new();
        self.collect_text(&mut text);
        text
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                NodeChild::Text(text) => out.push_str(text),
                NodeChild::Element(node) => node.collect_text(out),
            }
        }
    }

    pub fn parse(xml: &str) -> Result<Node> {
        Self::parse_reader(xml.as_bytes())
    }

    pub fn parse_reader(reader: impl BufRead) -> Result<Node> {
        let mut builder = TreeBuilder::default();
        parse_xml_events(reader, &mut builder)?;
        builder
            .root
            .ok_or_else(|| StreamError::conversion("document has no root element"))
    }

    /// Serialise as XML text without a declaration
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                NodeChild::Text(text) => out.push_str(&escape(text.as_str())),
                NodeChild::Element(node) => node.write_xml(out),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }

    /// Replay this tree as events into `handler`
    pub fn write_events<H: XmlEventHandler + ?Sized>(&self, handler: &mut H) -> Result<()> {
        handler.start_element(&self.name, &self.attributes)?;
        for child in &self.children {
            match child {
                NodeChild::Text(text) => handler.characters(text)?,
                NodeChild::Element(node) => node.write_events(handler)?,
            }
        }
        handler.end_element(&self.name)
    }
}

#[derive(Default)]
struct TreeBuilder {
    open: Vec<Node>,
    root: Option<Node>,
}

impl XmlEventHandler for TreeBuilder {
    fn start_element(&mut self, name: &str, attributes: &[(String, String)]) -> Result<()> {
        if self.root.is_some() {
            return Err(StreamError::conversion("content after the root element"));
        }
        let mut node = Node::new(name);
        node.attributes = attributes.to_vec();
        self.open.push(node);
        Ok(())
    }

    fn end_element(&mut self, _name: &str) -> Result<()> {
        let node = self
            .open
            .pop()
            .ok_or_else(|| StreamError::conversion("unbalanced end element"))?;
        match self.open.last_mut() {
            Some(parent) => parent.children.push(NodeChild::Element(node)),
            None => self.root = Some(node),
        }
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        match self.open.last_mut() {
            Some(parent) => {
                if let Some(NodeChild::Text(previous)) = parent.children.last_mut() {
                    previous.push_str(text);
                } else {
                    parent.children.push(NodeChild::Text(text.to_string()));
                }
                Ok(())
            }
            None if text.trim().is_empty() => Ok(()),
            None => Err(StreamError::conversion("text outside of the root element")),
        }
    }

    fn end_document(&mut self) -> Result<()> {
        if !self.open.is_empty() {
            return Err(StreamError::conversion("document ended inside an element"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_builds_tree() {
        let node = Node::parse(r#"<order id="7"><line>a</line><line>b &amp; c</line></order>"#).unwrap();

        assert_eq!(node.name, "order");
        assert_eq!(node.attribute("id"), Some("7"));
        assert_eq!(node.elements().count(), 2);
        assert_eq!(node.text(), "ab & c");
    }

    #[test]
    fn test_to_xml_escapes() {
        let node = Node::new("a")
            .with_attribute("q", "\"")
            .with_text("1 < 2")
            .with_child(Node::new("b"));

        assert_eq!(node.to_xml(), r#"<a q="&quot;">1 &lt; 2<b/></a>"#);
        assert_eq!(Node::parse(&node.to_xml()).unwrap(), node);
    }

    #[test]
    fn test_parse_rejects_empty_document() {
        assert!(Node::parse("  ").unwrap_err().is_conversion());
    }
}
