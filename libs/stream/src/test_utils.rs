//! Test doubles shared by unit and integration tests

use crate::capability::{
    ForwardResolver, OutputStreamingSupport, PipelineStage, StageSettings, StreamingPipeBase, StreamingSender,
    StreamingSenderBase,
};
use crate::connector::{ThreadInfo, ThreadLifecycleListener, TransactionBridge, TransactionCoordinator};
use crate::error::{Result, StreamError};
use crate::message::Message;
use crate::output::{MessageOutputStream, PipeRunResult};
use crate::resources::Closeable;
use crate::session::{NamedObject, Session};
use crate::sink::{ByteSink, JsonEventHandler, SharedBytes, TextSink, XmlEventHandler};
use serde_json::Number;
use std::sync::{Arc, Mutex};

/// Shared, ordered record of named events
#[derive(Debug, Clone, Default)]
pub struct ReleaseLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ReleaseLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry.to_string());
        }
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| e.as_str() == entry).count()
    }
}

/// Resource that records its release
#[derive(Debug)]
pub struct CountingResource {
    name: String,
    log: ReleaseLog,
}

impl CountingResource {
    pub fn new(name: &str, log: &ReleaseLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
        }
    }
}

impl Closeable for CountingResource {
    fn close(&mut self) -> Result<()> {
        self.log.record(&self.name);
        Ok(())
    }
}

/// Resource that records its release attempt and then fails
#[derive(Debug)]
pub struct FailingResource {
    name: String,
    log: ReleaseLog,
}

impl FailingResource {
    pub fn new(name: &str, log: &ReleaseLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
        }
    }
}

impl Closeable for FailingResource {
    fn close(&mut self) -> Result<()> {
        self.log.record(&self.name);
        Err(StreamError::handler(format!("{} refused to close", self.name)))
    }
}

/// Records XML events as `start(name k=v)`, `text(..)`, `end(name)`
#[derive(Debug, Clone, Default)]
pub struct RecordingXmlHandler {
    log: ReleaseLog,
}

impl RecordingXmlHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.log.entries()
    }
}

impl XmlEventHandler for RecordingXmlHandler {
    fn start_element(&mut self, name: &str, attributes: &[(String, String)]) -> Result<()> {
        let mut event = format!("start({}", name);
        for (key, value) in attributes {
            event.push_str(&format!(" {}={}", key, value));
        }
        event.push(')');
        self.log.record(&event);
        Ok(())
    }

    fn end_element(&mut self, name: &str) -> Result<()> {
        self.log.record(&format!("end({})", name));
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        self.log.record(&format!("text({})", text));
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.log.record(&format!("comment({})", text));
        Ok(())
    }
}

/// Rejects the start of one element
#[derive(Debug, Clone)]
pub struct FailingXmlHandler {
    element: String,
}

impl FailingXmlHandler {
    pub fn on_element(element: &str) -> Self {
        Self {
            element: element.to_string(),
        }
    }
}

impl XmlEventHandler for FailingXmlHandler {
    fn start_element(&mut self, name: &str, _attributes: &[(String, String)]) -> Result<()> {
        if name == self.element {
            return Err(StreamError::handler(format!("element <{}> rejected", name)));
        }
        Ok(())
    }

    fn end_element(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn characters(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }
}

/// Records JSON events as `{`, `key(a)`, `num(1)`, `str(x)` ...
#[derive(Debug, Clone, Default)]
pub struct RecordingJsonHandler {
    log: ReleaseLog,
    failing_key: Option<String>,
}

impl RecordingJsonHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on_key(key: &str) -> Self {
        Self {
            log: ReleaseLog::new(),
            failing_key: Some(key.to_string()),
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.log.entries()
    }

    fn record(&self, event: &str) -> Result<()> {
        self.log.record(event);
        Ok(())
    }
}

impl JsonEventHandler for RecordingJsonHandler {
    fn start_object(&mut self) -> Result<()> {
        self.record("{")
    }

    fn end_object(&mut self) -> Result<()> {
        self.record("}")
    }

    fn start_array(&mut self) -> Result<()> {
        self.record("[")
    }

    fn end_array(&mut self) -> Result<()> {
        self.record("]")
    }

    fn key(&mut self, key: &str) -> Result<()> {
        if self.failing_key.as_deref() == Some(key) {
            return Err(StreamError::handler(format!("key '{}' rejected", key)));
        }
        self.record(&format!("key({})", key))
    }

    fn string(&mut self, value: &str) -> Result<()> {
        self.record(&format!("str({})", value))
    }

    fn number(&mut self, value: &Number) -> Result<()> {
        self.record(&format!("num({})", value))
    }

    fn boolean(&mut self, value: bool) -> Result<()> {
        self.record(&format!("bool({})", value))
    }

    fn null(&mut self) -> Result<()> {
        self.record("null")
    }
}

/// Records lifecycle notifications as `announce`, `created`, `ended`,
/// `aborted` and `cancel`, together with the announcing owner
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    events: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: &str, child: &ThreadInfo) {
        if let Ok(mut events) = self.events.lock() {
            events.push((event.to_string(), child.owner().to_string()));
        }
    }

    fn snapshot(&self) -> Vec<(String, String)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn events(&self) -> Vec<String> {
        self.snapshot().into_iter().map(|(event, _)| event).collect()
    }

    pub fn count(&self, event: &str) -> usize {
        self.snapshot().iter().filter(|(e, _)| e == event).count()
    }

    pub fn owners_of(&self, event: &str) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter(|(e, _)| e == event)
            .map(|(_, owner)| owner)
            .collect()
    }
}

impl ThreadLifecycleListener for RecordingListener {
    fn announce(&self, child: &ThreadInfo) {
        self.record("announce", child);
    }

    fn thread_created(&self, child: &ThreadInfo) {
        self.record("created", child);
    }

    fn thread_ended(&self, child: &ThreadInfo) {
        self.record("ended", child);
    }

    fn thread_aborted(&self, child: &ThreadInfo, _cause: &StreamError) {
        self.record("aborted", child);
    }

    fn cancel_child(&self, child: &ThreadInfo) {
        self.record("cancel", child);
    }
}

/// Records `resume`, `end(commit)` / `end(rollback)` and `release`
#[derive(Debug, Clone, Default)]
pub struct RecordingCoordinator {
    log: ReleaseLog,
}

impl RecordingCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.log.entries()
    }
}

struct RecordingBridge {
    log: ReleaseLog,
}

impl TransactionBridge for RecordingBridge {
    fn resume(&mut self) -> Result<()> {
        self.log.record("resume");
        Ok(())
    }

    fn end(&mut self, commit: bool) -> Result<()> {
        self.log.record(if commit { "end(commit)" } else { "end(rollback)" });
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.log.record("release");
        Ok(())
    }
}

impl TransactionCoordinator for RecordingCoordinator {
    fn capture(&self) -> Box<dyn TransactionBridge> {
        Box::new(RecordingBridge {
            log: self.log.clone(),
        })
    }
}

/// Stage without streaming support
#[derive(Debug, Clone)]
pub struct PlainStage {
    name: String,
}

impl PlainStage {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl NamedObject for PlainStage {
    fn name(&self) -> &str {
        &self.name
    }
}

impl PipelineStage for PlainStage {}

/// Stage that accepts streamed input into a shared byte buffer, gated by
/// its pipe settings
#[derive(Debug, Clone)]
pub struct StreamingStage {
    pipe: StreamingPipeBase,
    target: SharedBytes,
    forward: Option<String>,
}

impl StreamingStage {
    pub fn new(name: &str, target: SharedBytes) -> Self {
        Self::with_settings(name, target, StageSettings::default())
    }

    pub fn with_settings(name: &str, target: SharedBytes, mut settings: StageSettings) -> Self {
        settings.streaming_active.get_or_insert(true);
        Self {
            pipe: StreamingPipeBase::new(name, settings),
            target,
            forward: None,
        }
    }

    pub fn inactive(self) -> Self {
        let settings = StageSettings {
            streaming_active: Some(false),
            ..self.pipe.settings().clone()
        };
        Self {
            pipe: StreamingPipeBase::new(self.pipe.name(), settings),
            ..self
        }
    }

    pub fn with_forward(mut self, forward: &str) -> Self {
        self.forward = Some(forward.to_string());
        self
    }
}

impl NamedObject for StreamingStage {
    fn name(&self) -> &str {
        self.pipe.name()
    }
}

impl PipelineStage for StreamingStage {
    fn forward_name(&self) -> Option<&str> {
        self.forward.as_deref()
    }

    fn as_streaming_support(&self) -> Option<&dyn OutputStreamingSupport> {
        Some(self)
    }
}

impl OutputStreamingSupport for StreamingStage {
    fn streaming_active(&self) -> bool {
        self.pipe.streaming_active()
    }

    fn provide_output_stream(
        &self,
        session: &mut Session,
        next: Option<&dyn PipelineStage>,
        resolver: &dyn ForwardResolver,
    ) -> Result<Option<MessageOutputStream>> {
        self.pipe.provide_output_stream(session, next, resolver, |_, _, _| {
            Ok(Some(MessageOutputStream::new(
                self.pipe.name(),
                ByteSink::new(self.target.clone()),
            )))
        })
    }
}

/// Sender whose reply is its request, forwarded to `success`
#[derive(Debug, Clone)]
pub struct EchoSender {
    base: StreamingSenderBase,
}

impl EchoSender {
    pub fn new(name: &str) -> Self {
        Self {
            base: StreamingSenderBase::new(name),
        }
    }
}

impl NamedObject for EchoSender {
    fn name(&self) -> &str {
        self.base.name()
    }
}

impl OutputStreamingSupport for EchoSender {
    fn streaming_active(&self) -> bool {
        self.base.streaming_active()
    }

    fn provide_output_stream(
        &self,
        _session: &mut Session,
        _next: Option<&dyn PipelineStage>,
        _resolver: &dyn ForwardResolver,
    ) -> Result<Option<MessageOutputStream>> {
        Ok(None)
    }
}

impl StreamingSender for EchoSender {
    fn send_message(
        &self,
        mut message: Message,
        session: &mut Session,
        next: Option<&dyn PipelineStage>,
        resolver: &dyn ForwardResolver,
    ) -> Result<PipeRunResult> {
        let mut stream = self.base.target_stream(session, next, resolver)?;
        let request = message.as_text(None)?.unwrap_or_default();
        stream.as_character_sink()?.write_str(&request)?;
        stream.set_forward("success");
        stream.close()?;
        Ok(stream.pipe_run_result())
    }
}
