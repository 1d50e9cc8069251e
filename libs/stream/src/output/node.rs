//! One link of an output stream chain: its sink, cached views and the
//! resources released with it

use crate::bridge::EventBridge;
use crate::charset;
use crate::connector::{ThreadConnector, ThreadLifecycleListener, TransactionCoordinator};
use crate::error::{Result, StreamError};
use crate::message::Message;
use crate::resources::Resources;
use crate::sink::{
    ByteSink, ByteTee, CharSink, DecodingSink, EncodingSink, JsonSink, JsonTee, JsonWriter, LimitedBytes,
    LimitedText, SharedBytes, SharedText, TextSink, TextTee, XmlSink, XmlTee, XmlWriter,
};
use encoding_rs::{Encoding, UTF_8};
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, warn};

/// The sink a stream writes into
#[derive(Clone, Debug)]
pub enum StreamSink {
    Bytes(ByteSink),
    Chars(CharSink),
    Xml(XmlSink),
    Json(JsonSink),
}

impl StreamSink {
    fn kind(&self) -> &'static str {
        match self {
            StreamSink::Bytes(_) => "byte",
            StreamSink::Chars(_) => "character",
            StreamSink::Xml(_) => "XML event",
            StreamSink::Json(_) => "JSON event",
        }
    }

    fn close(&self) -> Result<()> {
        match self {
            StreamSink::Bytes(sink) => sink.close(),
            StreamSink::Chars(sink) => sink.close(),
            StreamSink::Xml(sink) => sink.close(),
            StreamSink::Json(sink) => sink.close(),
        }
    }
}

impl From<ByteSink> for StreamSink {
    fn from(sink: ByteSink) -> Self {
        StreamSink::Bytes(sink)
    }
}

impl From<CharSink> for StreamSink {
    fn from(sink: CharSink) -> Self {
        StreamSink::Chars(sink)
    }
}

impl From<XmlSink> for StreamSink {
    fn from(sink: XmlSink) -> Self {
        StreamSink::Xml(sink)
    }
}

impl From<JsonSink> for StreamSink {
    fn from(sink: JsonSink) -> Self {
        StreamSink::Json(sink)
    }
}

enum Accumulator {
    Bytes(SharedBytes),
    Text(SharedText),
}

/// Derived views, closed before the stored sink. `direct` is set once the
/// stored sink itself was handed out.
#[derive(Default)]
struct Views {
    direct: bool,
    bytes: Option<ByteSink>,
    chars: Option<CharSink>,
    xml: Option<XmlSink>,
    json: Option<JsonSink>,
}

impl Views {
    fn is_empty(&self) -> bool {
        !self.direct && self.bytes.is_none() && self.chars.is_none() && self.xml.is_none() && self.json.is_none()
    }
}

/// Thread lifecycle collaborators handed to bridges a node creates
pub(super) struct Bridging<'a> {
    pub(super) listener: &'a Arc<dyn ThreadLifecycleListener>,
    pub(super) coordinator: &'a dyn TransactionCoordinator,
}

pub(super) type CloseHook = Box<dyn FnOnce() -> Result<()> + Send>;

pub(super) struct StreamNode {
    pub(super) owner: String,
    sink: Option<StreamSink>,
    pub(super) charset: Option<&'static Encoding>,
    views: Views,
    accumulator: Option<Accumulator>,
    pub(super) forward: Option<String>,
    pub(super) response: Option<Message>,
    pub(super) own_connector: Option<ThreadConnector>,
    pub(super) target_connector: Option<ThreadConnector>,
    pub(super) after_close: Option<CloseHook>,
    pub(super) resources: Resources,
}

impl StreamNode {
    pub(super) fn new(owner: &str, sink: Option<StreamSink>) -> Self {
        Self {
            owner: owner.to_string(),
            sink,
            charset: None,
            views: Views::default(),
            accumulator: None,
            forward: None,
            response: None,
            own_connector: None,
            target_connector: None,
            after_close: None,
            resources: Resources::new(),
        }
    }

    pub(super) fn encoding(&self) -> &'static Encoding {
        self.charset.unwrap_or_else(charset::default_charset)
    }

    pub(super) fn is_binary(&self) -> bool {
        matches!(self.sink, Some(StreamSink::Bytes(_)))
    }

    pub(super) fn is_capturing(&self) -> bool {
        self.sink.is_none() || self.accumulator.is_some()
    }

    /// The stored sink; an unset sink becomes an in-memory accumulator of
    /// the requested orientation
    fn sink(&mut self, binary: bool) -> StreamSink {
        if let Some(sink) = &self.sink {
            return sink.clone();
        }
        let (sink, accumulator) = if binary {
            let buffer = SharedBytes::new();
            (StreamSink::Bytes(ByteSink::new(buffer.clone())), Accumulator::Bytes(buffer))
        } else {
            let buffer = SharedText::new();
            (StreamSink::Chars(CharSink::new(buffer.clone())), Accumulator::Text(buffer))
        };
        debug!("{}: capturing output in memory as {}", self.owner, sink.kind());
        self.accumulator = Some(accumulator);
        self.sink = Some(sink.clone());
        sink
    }

    fn bridge_connector(&self, bridging: &Bridging<'_>) -> ThreadConnector {
        ThreadConnector::new(&self.owner, Arc::clone(bridging.listener), bridging.coordinator)
    }

    pub(super) fn byte_view(&mut self, bridging: &Bridging<'_>) -> Result<ByteSink> {
        if let Some(view) = &self.views.bytes {
            return Ok(view.clone());
        }
        let stored = self.sink(true);
        let view = match &stored {
            StreamSink::Bytes(sink) => {
                self.views.direct = true;
                return Ok(sink.clone());
            }
            StreamSink::Chars(sink) => ByteSink::new(DecodingSink::new(sink.clone(), self.encoding())),
            StreamSink::Xml(sink) => {
                ByteSink::new(EventBridge::to_xml(sink.clone(), self.bridge_connector(bridging))?)
            }
            StreamSink::Json(sink) => {
                ByteSink::new(EventBridge::to_json(sink.clone(), self.bridge_connector(bridging))?)
            }
        };
        debug!("{}: byte view over {} sink", self.owner, stored.kind());
        self.views.bytes = Some(view.clone());
        Ok(view)
    }

    pub(super) fn char_view(&mut self, bridging: &Bridging<'_>) -> Result<CharSink> {
        if let Some(view) = &self.views.chars {
            return Ok(view.clone());
        }
        let stored = self.sink(false);
        let view = match &stored {
            StreamSink::Chars(sink) => {
                self.views.direct = true;
                return Ok(sink.clone());
            }
            StreamSink::Bytes(sink) => CharSink::new(EncodingSink::new(sink.clone(), self.encoding())?),
            StreamSink::Xml(_) | StreamSink::Json(_) => {
                let bytes = self.byte_view(bridging)?;
                CharSink::new(EncodingSink::new(bytes, UTF_8)?)
            }
        };
        debug!("{}: character view over {} sink", self.owner, stored.kind());
        self.views.chars = Some(view.clone());
        Ok(view)
    }

    pub(super) fn xml_view(&mut self) -> Result<XmlSink> {
        if let Some(view) = &self.views.xml {
            return Ok(view.clone());
        }
        let stored = self.sink(false);
        let view = match &stored {
            StreamSink::Xml(sink) => {
                self.views.direct = true;
                return Ok(sink.clone());
            }
            StreamSink::Chars(sink) => XmlSink::new(XmlWriter::new(sink.clone())),
            StreamSink::Bytes(sink) => {
                XmlSink::new(XmlWriter::new(EncodingSink::new(sink.clone(), self.encoding())?))
            }
            StreamSink::Json(_) => {
                return Err(StreamError::conversion(format!(
                    "{}: a JSON event sink cannot receive XML events",
                    self.owner
                )))
            }
        };
        debug!("{}: XML event view over {} sink", self.owner, stored.kind());
        self.views.xml = Some(view.clone());
        Ok(view)
    }

    pub(super) fn json_view(&mut self) -> Result<JsonSink> {
        if let Some(view) = &self.views.json {
            return Ok(view.clone());
        }
        let stored = self.sink(false);
        let view = match &stored {
            StreamSink::Json(sink) => {
                self.views.direct = true;
                return Ok(sink.clone());
            }
            StreamSink::Chars(sink) => JsonSink::new(JsonWriter::new(sink.clone())),
            StreamSink::Bytes(sink) => {
                JsonSink::new(JsonWriter::new(EncodingSink::new(sink.clone(), self.encoding())?))
            }
            StreamSink::Xml(_) => {
                return Err(StreamError::conversion(format!(
                    "{}: an XML event sink cannot receive JSON events",
                    self.owner
                )))
            }
        };
        debug!("{}: JSON event view over {} sink", self.owner, stored.kind());
        self.views.json = Some(view.clone());
        Ok(view)
    }

    fn ensure_no_views(&self) -> Result<()> {
        if self.views.is_empty() {
            Ok(())
        } else {
            Err(StreamError::illegal_state(format!(
                "{}: capture must be installed before any sink view is handed out",
                self.owner
            )))
        }
    }

    pub(super) fn capture_text(&mut self, target: Box<dyn TextSink>, limit: usize) -> Result<()> {
        self.ensure_no_views()?;
        let mirror = LimitedText::new(target, limit);
        let tee = match self.sink(false) {
            StreamSink::Chars(sink) => StreamSink::Chars(CharSink::new(TextTee::new(sink, Box::new(mirror)))),
            StreamSink::Bytes(sink) => {
                let decoded = DecodingSink::new(mirror, self.encoding());
                StreamSink::Bytes(ByteSink::new(ByteTee::new(sink, Box::new(decoded))))
            }
            StreamSink::Xml(sink) => {
                StreamSink::Xml(XmlSink::new(XmlTee::new(sink, Box::new(XmlWriter::new(mirror)))))
            }
            StreamSink::Json(sink) => {
                StreamSink::Json(JsonSink::new(JsonTee::new(sink, Box::new(JsonWriter::new(mirror)))))
            }
        };
        debug!("{}: capturing up to {} characters of {} output", self.owner, limit, tee.kind());
        self.sink = Some(tee);
        Ok(())
    }

    pub(super) fn capture_bytes(&mut self, target: Box<dyn Write + Send>, limit: usize) -> Result<()> {
        self.ensure_no_views()?;
        let mirror = LimitedBytes::new(target, limit);
        let encoding = self.encoding();
        let tee = match self.sink(true) {
            StreamSink::Bytes(sink) => StreamSink::Bytes(ByteSink::new(ByteTee::new(sink, Box::new(mirror)))),
            StreamSink::Chars(sink) => {
                let encoded = EncodingSink::new(mirror, encoding)?;
                StreamSink::Chars(CharSink::new(TextTee::new(sink, Box::new(encoded))))
            }
            StreamSink::Xml(sink) => {
                let writer = XmlWriter::new(EncodingSink::new(mirror, encoding)?);
                StreamSink::Xml(XmlSink::new(XmlTee::new(sink, Box::new(writer))))
            }
            StreamSink::Json(sink) => {
                let writer = JsonWriter::new(EncodingSink::new(mirror, encoding)?);
                StreamSink::Json(JsonSink::new(JsonTee::new(sink, Box::new(writer))))
            }
        };
        debug!("{}: capturing up to {} bytes of {} output", self.owner, limit, tee.kind());
        self.sink = Some(tee);
        Ok(())
    }

    /// The explicit response, else whatever the accumulator captured
    pub(super) fn take_response(&mut self) -> Option<Message> {
        if let Some(response) = self.response.take() {
            return Some(response);
        }
        match &self.accumulator {
            Some(Accumulator::Bytes(buffer)) => {
                Some(Message::from_bytes(buffer.contents()).with_charset(self.encoding().name()))
            }
            Some(Accumulator::Text(buffer)) => Some(Message::from_text(buffer.contents())),
            None => None,
        }
    }

    /// Close derived views, then the stored sink
    pub(super) fn close_sinks(&mut self, errors: &mut Vec<StreamError>) {
        let owner = self.owner.clone();
        if let Some(view) = self.views.xml.take() {
            record(&owner, "XML view", view.close(), errors);
        }
        if let Some(view) = self.views.json.take() {
            record(&owner, "JSON view", view.close(), errors);
        }
        if let Some(view) = self.views.chars.take() {
            record(&owner, "character view", view.close(), errors);
        }
        if let Some(view) = self.views.bytes.take() {
            record(&owner, "byte view", view.close(), errors);
        }
        if let Some(sink) = &self.sink {
            record(&owner, "sink", sink.close(), errors);
        }
    }

    /// Connectors (target first), the close hook, then extra resources
    pub(super) fn release(&mut self, errors: &mut Vec<StreamError>) {
        let owner = self.owner.clone();
        if let Some(connector) = self.target_connector.take() {
            record(&owner, "target thread connector", connector.close(), errors);
        }
        if let Some(connector) = self.own_connector.take() {
            record(&owner, "thread connector", connector.close(), errors);
        }
        if let Some(hook) = self.after_close.take() {
            record(&owner, "close hook", hook(), errors);
        }
        if let Err(e) = self.resources.close_all(&owner) {
            errors.extend(e.into_failures());
        }
    }
}

fn record(owner: &str, step: &str, outcome: Result<()>, errors: &mut Vec<StreamError>) {
    if let Err(e) = outcome {
        warn!("{}: closing {} failed: {}", owner, step, e);
        errors.extend(e.into_failures());
    }
}
