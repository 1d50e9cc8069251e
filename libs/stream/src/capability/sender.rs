use super::{ForwardResolver, OutputStreamingSupport, PipelineStage};
use crate::error::Result;
use crate::message::Message;
use crate::output::{MessageOutputStream, PipeRunResult};
use crate::session::{NamedObject, Session};
use tracing::debug;

/// A sender that can write its reply straight into the next stage's stream
pub trait StreamingSender: NamedObject + OutputStreamingSupport {
    /// Send `message`; the reply is written into the stream obtained for
    /// `next`, or returned as a captured message when `next` takes none
    fn send_message(
        &self,
        message: Message,
        session: &mut Session,
        next: Option<&dyn PipelineStage>,
        resolver: &dyn ForwardResolver,
    ) -> Result<PipeRunResult>;
}

/// Shared state of streaming senders
#[derive(Debug, Clone)]
pub struct StreamingSenderBase {
    name: String,
    streaming_active: Option<bool>,
}

impl StreamingSenderBase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            streaming_active: None,
        }
    }

    /// Override `streaming.active` for this sender
    pub fn with_streaming_active(mut self, active: bool) -> Self {
        self.streaming_active = Some(active);
        self
    }

    pub fn streaming_active(&self) -> bool {
        self.streaming_active
            .unwrap_or(crate::settings().streaming.active)
    }

    /// Stream the reply is written into
    pub fn target_stream(
        &self,
        session: &mut Session,
        next: Option<&dyn PipelineStage>,
        resolver: &dyn ForwardResolver,
    ) -> Result<MessageOutputStream> {
        if !self.streaming_active() {
            debug!("{}: streaming switched off, capturing reply", self.name);
            return Ok(MessageOutputStream::cap(&self.name));
        }
        MessageOutputStream::target_stream(self, session, next, resolver)
    }
}

impl NamedObject for StreamingSenderBase {
    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::NoForwards;
    use crate::sink::SharedBytes;
    use crate::test_utils::{EchoSender, StreamingStage};

    #[test]
    fn test_reply_streams_into_next_stage() {
        let target = SharedBytes::new();
        let next = StreamingStage::new("next", target.clone());
        let sender = EchoSender::new("echo");
        let mut session = Session::new();

        let run = sender
            .send_message(
                Message::from_text("ping"),
                &mut session,
                Some(&next as &dyn PipelineStage),
                &NoForwards,
            )
            .unwrap();

        assert_eq!(target.contents(), b"ping");
        assert!(run.result.is_null());
        assert_eq!(run.forward.as_deref(), Some("success"));
    }

    #[test]
    fn test_reply_captured_without_next_stage() {
        let sender = EchoSender::new("echo");
        let mut session = Session::new();

        let mut run = sender
            .send_message(Message::from_text("ping"), &mut session, None, &NoForwards)
            .unwrap();

        assert_eq!(run.result.as_text(None).unwrap().as_deref(), Some("ping"));
    }

    #[test]
    fn test_disabled_sender_captures() {
        let base = StreamingSenderBase::new("s").with_streaming_active(false);
        let next = StreamingStage::new("next", SharedBytes::new());
        let mut session = Session::new();

        let stream = base
            .target_stream(&mut session, Some(&next as &dyn PipelineStage), &NoForwards)
            .unwrap();
        assert!(stream.is_capturing());
    }
}
