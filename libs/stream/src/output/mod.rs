//! Negotiated output streams
//!
//! A [`MessageOutputStream`] is the sink one stage writes its result into.
//! It is either backed by a real sink handed out by the next stage or, when
//! the next stage cannot accept a stream, it is a capture ("cap") that
//! accumulates the output in memory and turns it into the next message.
//!
//! Streams chain: [`MessageOutputStream::with_next`] puts a new link in front
//! of an existing chain. The link closest to the real consumer is the tail.
//! It decides the forward and provides the result, because it observed the
//! actual outcome.

mod node;

pub use node::StreamSink;

use crate::capability::{ForwardResolver, PipelineStage};
use crate::charset;
use crate::connector::{NoTransaction, NoopListener, ThreadConnector, ThreadLifecycleListener, TransactionCoordinator};
use crate::error::{Result, StreamError};
use crate::message::Message;
use crate::resources::Closeable;
use crate::session::{NamedObject, Session};
use crate::sink::{ByteSink, CharSink, JsonSink, TextSink, XmlSink};
use node::{Bridging, StreamNode};
use std::io::Write;
use std::iter;
use std::sync::Arc;
use tracing::{debug, warn};

/// What a stage hands back after running: the forward to follow and the
/// result the chain produced
#[derive(Debug)]
pub struct PipeRunResult {
    pub forward: Option<String>,
    pub result: Message,
}

pub struct MessageOutputStream {
    head: StreamNode,
    /// Downstream links, tail first
    chain: Vec<StreamNode>,
    listener: Arc<dyn ThreadLifecycleListener>,
    coordinator: Arc<dyn TransactionCoordinator>,
    closed: bool,
}

impl MessageOutputStream {
    fn from_head(head: StreamNode) -> Self {
        Self {
            head,
            chain: Vec::new(),
            listener: Arc::new(NoopListener),
            coordinator: Arc::new(NoTransaction),
            closed: false,
        }
    }

    /// Stream writing into `sink`
    pub fn new(owner: &str, sink: impl Into<StreamSink>) -> Self {
        Self::from_head(StreamNode::new(owner, Some(sink.into())))
    }

    /// Capturing stream; the first view requested decides whether bytes or
    /// text are accumulated
    pub fn cap(owner: &str) -> Self {
        Self::from_head(StreamNode::new(owner, None))
    }

    /// Put a link writing into `sink` in front of `next`
    pub fn with_next(owner: &str, sink: impl Into<StreamSink>, mut next: MessageOutputStream) -> Self {
        let mut chain = std::mem::take(&mut next.chain);
        chain.push(std::mem::replace(&mut next.head, StreamNode::new(owner, None)));
        next.closed = true;

        Self {
            head: StreamNode::new(owner, Some(sink.into())),
            chain,
            listener: Arc::clone(&next.listener),
            coordinator: Arc::clone(&next.coordinator),
            closed: false,
        }
    }

    /// Collaborators for the bridge threads this stream may start
    pub fn with_thread_lifecycle(
        mut self,
        listener: Arc<dyn ThreadLifecycleListener>,
        coordinator: Arc<dyn TransactionCoordinator>,
    ) -> Self {
        self.listener = listener;
        self.coordinator = coordinator;
        self
    }

    /// Charset used when character output must become bytes or vice versa
    pub fn with_charset(mut self, label: &str) -> Result<Self> {
        self.head.charset = Some(charset::resolve_output(label)?);
        Ok(self)
    }

    pub fn owner_name(&self) -> &str {
        &self.head.owner
    }

    /// Whether the stored sink is byte oriented
    pub fn is_binary(&self) -> bool {
        self.head.is_binary()
    }

    /// Whether output ends up in memory rather than in a consumer's sink
    pub fn is_capturing(&self) -> bool {
        self.head.is_capturing()
    }

    /// Number of links, this one included
    pub fn len(&self) -> usize {
        self.chain.len() + 1
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn set_forward(&mut self, forward: impl Into<String>) {
        self.head.forward = Some(forward.into());
    }

    pub fn set_response(&mut self, response: Message) {
        self.head.response = Some(response);
    }

    pub fn register_resource(&mut self, resource: Box<dyn Closeable>) {
        self.head.resources.register(resource);
    }

    /// Run `hook` on close, after the thread connectors and before the
    /// extra resources
    pub fn after_close<F>(&mut self, hook: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.head.after_close = Some(Box::new(hook));
    }

    /// Hand ownership of a connector pair to this stream
    pub fn set_thread_connectors(&mut self, own: Option<ThreadConnector>, target: Option<ThreadConnector>) {
        self.head.own_connector = own;
        self.head.target_connector = target;
    }

    fn bridging(&self) -> (Arc<dyn ThreadLifecycleListener>, Arc<dyn TransactionCoordinator>) {
        (Arc::clone(&self.listener), Arc::clone(&self.coordinator))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(StreamError::illegal_state(format!(
                "{}: output stream already closed",
                self.head.owner
            )));
        }
        Ok(())
    }

    pub fn as_byte_sink(&mut self) -> Result<ByteSink> {
        self.ensure_open()?;
        let (listener, coordinator) = self.bridging();
        self.head.byte_view(&Bridging {
            listener: &listener,
            coordinator: coordinator.as_ref(),
        })
    }

    pub fn as_character_sink(&mut self) -> Result<CharSink> {
        self.ensure_open()?;
        let (listener, coordinator) = self.bridging();
        self.head.char_view(&Bridging {
            listener: &listener,
            coordinator: coordinator.as_ref(),
        })
    }

    pub fn as_xml_event_sink(&mut self) -> Result<XmlSink> {
        self.ensure_open()?;
        self.head.xml_view()
    }

    pub fn as_json_event_sink(&mut self) -> Result<JsonSink> {
        self.ensure_open()?;
        self.head.json_view()
    }

    /// Mirror up to `limit` characters of the output into `target`.
    /// The stored sink is replaced by the tee for good.
    pub fn capture_character_stream(&mut self, target: impl TextSink + 'static, limit: usize) -> Result<()> {
        self.ensure_open()?;
        self.head.capture_text(Box::new(target), limit)
    }

    /// Mirror up to `limit` bytes of the output into `target`
    pub fn capture_binary_stream(&mut self, target: impl Write + Send + 'static, limit: usize) -> Result<()> {
        self.ensure_open()?;
        self.head.capture_bytes(Box::new(target), limit)
    }

    fn tail_first(&self) -> impl Iterator<Item = &StreamNode> {
        self.chain.iter().chain(iter::once(&self.head))
    }

    /// Forward of the link closest to the consumer that has one
    pub fn get_forward(&self) -> Option<&str> {
        self.tail_first().find_map(|node| node.forward.as_deref())
    }

    /// Forward and result of the chain. The result is the tail-most
    /// response: an explicit one is handed over once, captured output
    /// can be read again.
    pub fn pipe_run_result(&mut self) -> PipeRunResult {
        let forward = self.get_forward().map(str::to_string);
        let result = self
            .chain
            .iter_mut()
            .chain(iter::once(&mut self.head))
            .find_map(StreamNode::take_response)
            .unwrap_or_default();
        PipeRunResult { forward, result }
    }

    /// Close every sink from this link down to the tail, then release
    /// connectors, hooks and resources from the tail back up. Every step
    /// runs even when an earlier one failed.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!("{}: closing output stream of {} links", self.head.owner, self.len());

        let mut errors = Vec::new();
        for node in iter::once(&mut self.head).chain(self.chain.iter_mut().rev()) {
            node.close_sinks(&mut errors);
        }
        for node in self.chain.iter_mut().chain(iter::once(&mut self.head)) {
            node.release(&mut errors);
        }
        StreamError::from_release_failures(errors)
    }

    /// Ask `next` for a stream to write into; fall back to a capture when it
    /// cannot provide one
    pub fn target_stream(
        owner: &dyn NamedObject,
        session: &mut Session,
        next: Option<&dyn PipelineStage>,
        resolver: &dyn ForwardResolver,
    ) -> Result<MessageOutputStream> {
        let Some(stage) = next else {
            return Ok(Self::cap(owner.name()));
        };
        if !crate::settings().streaming.active {
            debug!("{}: streaming disabled, capturing output for {}", owner.name(), stage.name());
            return Ok(Self::cap(owner.name()));
        }

        if let Some(support) = stage.as_streaming_support() {
            if support.streaming_active() {
                let after = stage.forward_name().and_then(|forward| resolver.resolve(forward));
                if let Some(stream) = support.provide_output_stream(session, after.as_deref(), resolver)? {
                    debug!("{}: streaming output directly into {}", owner.name(), stage.name());
                    return Ok(stream);
                }
            }
        }
        debug!("{}: {} provides no output stream, capturing output", owner.name(), stage.name());
        Ok(Self::cap(owner.name()))
    }
}

impl Closeable for MessageOutputStream {
    fn close(&mut self) -> Result<()> {
        MessageOutputStream::close(self)
    }
}

impl Drop for MessageOutputStream {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("{}: output stream closed on drop with failure: {}", self.head.owner, e);
        }
    }
}

impl std::fmt::Debug for MessageOutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageOutputStream")
            .field("owner", &self.head.owner)
            .field("links", &self.len())
            .field("binary", &self.is_binary())
            .field("closed", &self.closed)
            .finish()
    }
}
