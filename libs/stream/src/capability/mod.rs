//! Streaming capability contracts between pipeline stages
//!
//! A stage that can take its input as a stream implements
//! [`OutputStreamingSupport`] and is reached through
//! [`PipelineStage::as_streaming_support`]. Whether a configured pipe may
//! stream at all is decided once, at configuration time, by
//! [`StreamingPipeBase::configure`].

mod pipe;
mod sender;

pub use pipe::{ParameterSettings, StageSettings, StreamingPipeBase};
pub use sender::{StreamingSender, StreamingSenderBase};

use crate::error::Result;
use crate::output::MessageOutputStream;
use crate::session::{NamedObject, Session};
use std::collections::HashMap;
use std::sync::Arc;

/// Implemented by stages that can accept their input as a stream
pub trait OutputStreamingSupport: Send + Sync {
    /// Whether the stage hands a sink it does not need itself on to the
    /// previous stage
    fn supports_output_stream_pass_through(&self) -> bool {
        false
    }

    /// Whether streaming is currently switched on for this stage
    fn streaming_active(&self) -> bool;

    /// A stream the previous stage may write into, or `None` when this stage
    /// needs a materialised message. `next` is the stage following this one.
    fn provide_output_stream(
        &self,
        session: &mut Session,
        next: Option<&dyn PipelineStage>,
        resolver: &dyn ForwardResolver,
    ) -> Result<Option<MessageOutputStream>>;
}

/// A stage in a pipeline as seen by its neighbours
pub trait PipelineStage: NamedObject + Send + Sync {
    /// Name of the forward followed on success
    fn forward_name(&self) -> Option<&str> {
        None
    }

    fn as_streaming_support(&self) -> Option<&dyn OutputStreamingSupport> {
        None
    }
}

/// Looks up the stage a forward leads to
pub trait ForwardResolver {
    fn resolve(&self, forward: &str) -> Option<Arc<dyn PipelineStage>>;
}

impl ForwardResolver for HashMap<String, Arc<dyn PipelineStage>> {
    fn resolve(&self, forward: &str) -> Option<Arc<dyn PipelineStage>> {
        self.get(forward).cloned()
    }
}

/// Resolver for a stage without successors
#[derive(Debug, Default, Clone, Copy)]
pub struct NoForwards;

impl ForwardResolver for NoForwards {
    fn resolve(&self, _forward: &str) -> Option<Arc<dyn PipelineStage>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{SharedBytes, TextSink};
    use crate::test_utils::{PlainStage, StreamingStage};
    use std::io::Write;

    #[test]
    fn test_streaming_stage_provides_its_sink() {
        let target = SharedBytes::new();
        let stage = StreamingStage::new("next", target.clone());
        let mut session = Session::new();

        let mut stream = MessageOutputStream::target_stream(
            &PlainStage::new("owner"),
            &mut session,
            Some(&stage as &dyn PipelineStage),
            &NoForwards,
        )
        .unwrap();
        assert!(!stream.is_capturing());
        stream.as_byte_sink().unwrap().write_all(b"direct").unwrap();
        stream.close().unwrap();

        assert_eq!(target.contents(), b"direct");
    }

    #[test]
    fn test_inactive_or_plain_stage_gets_a_cap() {
        let mut session = Session::new();
        let owner = PlainStage::new("owner");
        let inactive = StreamingStage::new("next", SharedBytes::new()).inactive();
        let plain = PlainStage::new("plain");

        for next in [&inactive as &dyn PipelineStage, &plain] {
            let mut stream =
                MessageOutputStream::target_stream(&owner, &mut session, Some(next), &NoForwards).unwrap();
            assert!(stream.is_capturing());
            stream.as_character_sink().unwrap().write_str("kept").unwrap();
            stream.close().unwrap();
            let mut run = stream.pipe_run_result();
            assert_eq!(run.result.as_text(None).unwrap().as_deref(), Some("kept"));
        }
    }

    #[test]
    fn test_locked_stage_refuses_streamed_input() {
        let target = SharedBytes::new();
        let settings = StageSettings {
            locker: Some("orders".into()),
            ..Default::default()
        };
        let locked = StreamingStage::with_settings("next", target.clone(), settings);
        let mut session = Session::new();

        assert!(locked.streaming_active());
        let mut stream = MessageOutputStream::target_stream(
            &PlainStage::new("owner"),
            &mut session,
            Some(&locked as &dyn PipelineStage),
            &NoForwards,
        )
        .unwrap();
        assert!(stream.is_capturing());
        stream.as_byte_sink().unwrap().write_all(b"buffered").unwrap();
        stream.close().unwrap();

        assert!(target.contents().is_empty());
        let mut run = stream.pipe_run_result();
        assert_eq!(run.result.as_bytes(None).unwrap().unwrap().as_ref(), b"buffered");
    }

    #[test]
    fn test_no_next_stage_gets_a_cap() {
        let mut session = Session::new();
        let stream =
            MessageOutputStream::target_stream(&PlainStage::new("owner"), &mut session, None, &NoForwards).unwrap();

        assert!(stream.is_capturing());
        assert_eq!(stream.owner_name(), "owner");
    }

    #[test]
    fn test_resolver_map() {
        let mut stages: HashMap<String, Arc<dyn PipelineStage>> = HashMap::new();
        stages.insert("success".to_string(), Arc::new(PlainStage::new("exit")));

        assert_eq!(stages.resolve("success").map(|s| s.name().to_string()).as_deref(), Some("exit"));
        assert!(stages.resolve("failure").is_none());
    }
}
