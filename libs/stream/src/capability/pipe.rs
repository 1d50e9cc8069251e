use super::{ForwardResolver, PipelineStage};
use crate::error::Result;
use crate::output::MessageOutputStream;
use crate::session::{NamedObject, Session};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A pipe parameter. One without a session key or value is resolved from
/// the pipe's input message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParameterSettings {
    pub name: String,
    pub session_key: Option<String>,
    pub value: Option<String>,
    /// Explicitly resolved against the input even when a key or value is set
    pub uses_input: bool,
}

impl ParameterSettings {
    pub fn consumes_input(&self) -> bool {
        self.uses_input || (self.session_key.is_none() && self.value.is_none())
    }
}

/// Side-effecting pipe attributes that rule out streaming
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StageSettings {
    pub get_input_from_session_key: Option<String>,
    pub get_input_from_fixed_value: Option<String>,
    pub skip_on_empty_input: bool,
    pub locker: Option<String>,
    /// Conditional execution guard
    pub only_if: Option<String>,
    pub parameters: Vec<ParameterSettings>,
    pub store_result_in_session_key: Option<String>,
    pub preserve_input: bool,
    /// Post-processing steps that inspect the materialised result
    pub post_processors: Vec<String>,
    /// Per-stage override of `streaming.active`
    pub streaming_active: Option<bool>,
}

impl StageSettings {
    /// Attributes that need the input as a message, not as a stream
    fn input_blockers(&self) -> Vec<&'static str> {
        let mut blockers = Vec::new();
        if self.get_input_from_session_key.is_some() {
            blockers.push("input from session key");
        }
        if self.get_input_from_fixed_value.is_some() {
            blockers.push("fixed input value");
        }
        if self.skip_on_empty_input {
            blockers.push("skip on empty input");
        }
        if self.locker.is_some() {
            blockers.push("locker");
        }
        if self.only_if.is_some() {
            blockers.push("conditional execution");
        }
        if self.parameters.iter().any(ParameterSettings::consumes_input) {
            blockers.push("parameter resolved from input");
        }
        blockers
    }

    /// Attributes that need the result as a message
    fn output_blockers(&self) -> Vec<&'static str> {
        let mut blockers = Vec::new();
        if self.store_result_in_session_key.is_some() {
            blockers.push("result stored in session");
        }
        if self.preserve_input {
            blockers.push("preserve input");
        }
        if !self.post_processors.is_empty() {
            blockers.push("post-processing");
        }
        blockers
    }
}

/// Streaming decisions for a configured pipe
#[derive(Debug, Clone)]
pub struct StreamingPipeBase {
    name: String,
    settings: StageSettings,
    can_provide_output_stream: bool,
    can_stream_to_next_pipe: bool,
}

impl StreamingPipeBase {
    pub fn new(name: impl Into<String>, settings: StageSettings) -> Self {
        let mut pipe = Self {
            name: name.into(),
            settings,
            can_provide_output_stream: false,
            can_stream_to_next_pipe: false,
        };
        pipe.configure();
        pipe
    }

    /// Recompute both capabilities from the settings
    pub fn configure(&mut self) {
        let input = self.settings.input_blockers();
        let output = self.settings.output_blockers();
        self.can_provide_output_stream = input.is_empty();
        self.can_stream_to_next_pipe = output.is_empty();

        if !input.is_empty() {
            debug!("{}: cannot take a stream as input: {}", self.name, input.join(", "));
        }
        if !output.is_empty() {
            debug!("{}: cannot stream to the next pipe: {}", self.name, output.join(", "));
        }
    }

    pub fn settings(&self) -> &StageSettings {
        &self.settings
    }

    pub fn can_provide_output_stream(&self) -> bool {
        self.can_provide_output_stream
    }

    pub fn can_stream_to_next_pipe(&self) -> bool {
        self.can_stream_to_next_pipe
    }

    pub fn streaming_active(&self) -> bool {
        self.settings
            .streaming_active
            .unwrap_or(crate::settings().streaming.active)
    }

    /// Whether this pipe may take its input as a stream: both capabilities
    /// hold and streaming is switched on
    pub fn accepts_stream(&self) -> bool {
        self.can_provide_output_stream && self.can_stream_to_next_pipe && self.streaming_active()
    }

    /// Gate for [`OutputStreamingSupport::provide_output_stream`]: `open`
    /// only runs when [`accepts_stream`](Self::accepts_stream) holds, else
    /// the previous stage falls back to a capture
    ///
    /// [`OutputStreamingSupport::provide_output_stream`]: super::OutputStreamingSupport::provide_output_stream
    pub fn provide_output_stream<F>(
        &self,
        session: &mut Session,
        next: Option<&dyn PipelineStage>,
        resolver: &dyn ForwardResolver,
        open: F,
    ) -> Result<Option<MessageOutputStream>>
    where
        F: FnOnce(&mut Session, Option<&dyn PipelineStage>, &dyn ForwardResolver) -> Result<Option<MessageOutputStream>>,
    {
        if !self.accepts_stream() {
            debug!("{}: refusing streamed input", self.name);
            return Ok(None);
        }
        open(session, next, resolver)
    }

    /// Stream this pipe writes its result into: the next stage's own stream
    /// when both sides allow it, a capture otherwise
    pub fn target_stream(
        &self,
        session: &mut Session,
        next: Option<&dyn PipelineStage>,
        resolver: &dyn ForwardResolver,
    ) -> Result<MessageOutputStream> {
        if self.can_stream_to_next_pipe && self.streaming_active() {
            return MessageOutputStream::target_stream(self, session, next, resolver);
        }
        Ok(MessageOutputStream::cap(&self.name))
    }

    /// For pass-through pipes: offer the next stage's stream to the previous
    /// stage when nothing in this pipe's configuration needs the message
    pub fn pass_through_stream(
        &self,
        session: &mut Session,
        next: Option<&dyn PipelineStage>,
        resolver: &dyn ForwardResolver,
    ) -> Result<Option<MessageOutputStream>> {
        if !self.accepts_stream() {
            return Ok(None);
        }
        let Some(stage) = next else {
            return Ok(None);
        };
        let Some(support) = stage.as_streaming_support() else {
            return Ok(None);
        };
        if !support.streaming_active() {
            return Ok(None);
        }
        let after = stage.forward_name().and_then(|forward| resolver.resolve(forward));
        let stream = support.provide_output_stream(session, after.as_deref(), resolver)?;
        if stream.is_some() {
            debug!("{}: passing the stream of {} through", self.name, stage.name());
        }
        Ok(stream)
    }
}

impl NamedObject for StreamingPipeBase {
    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::NoForwards;
    use crate::sink::SharedBytes;
    use crate::test_utils::StreamingStage;

    #[test]
    fn test_plain_settings_allow_streaming() {
        let pipe = StreamingPipeBase::new("echo", StageSettings::default());

        assert!(pipe.can_provide_output_stream());
        assert!(pipe.can_stream_to_next_pipe());
    }

    #[test]
    fn test_each_input_attribute_blocks_input_streaming() {
        let variants = [
            StageSettings {
                get_input_from_session_key: Some("k".into()),
                ..Default::default()
            },
            StageSettings {
                get_input_from_fixed_value: Some("v".into()),
                ..Default::default()
            },
            StageSettings {
                skip_on_empty_input: true,
                ..Default::default()
            },
            StageSettings {
                locker: Some("lock".into()),
                ..Default::default()
            },
            StageSettings {
                only_if: Some("flag".into()),
                ..Default::default()
            },
            StageSettings {
                parameters: vec![ParameterSettings {
                    name: "p".into(),
                    ..Default::default()
                }],
                ..Default::default()
            },
        ];

        for settings in variants {
            let pipe = StreamingPipeBase::new("p", settings);
            assert!(!pipe.can_provide_output_stream());
            assert!(pipe.can_stream_to_next_pipe());
        }
    }

    #[test]
    fn test_parameter_with_value_does_not_block() {
        let settings = StageSettings {
            parameters: vec![ParameterSettings {
                name: "p".into(),
                session_key: Some("key".into()),
                ..Default::default()
            }],
            ..Default::default()
        };

        assert!(StreamingPipeBase::new("p", settings).can_provide_output_stream());
    }

    #[test]
    fn test_output_attributes_force_capture() {
        let settings = StageSettings {
            store_result_in_session_key: Some("result".into()),
            ..Default::default()
        };
        let pipe = StreamingPipeBase::new("p", settings);
        let next = StreamingStage::new("next", SharedBytes::new());
        let mut session = Session::new();

        assert!(!pipe.can_stream_to_next_pipe());
        let stream = pipe.target_stream(&mut session, Some(&next as &dyn PipelineStage), &NoForwards).unwrap();
        assert!(stream.is_capturing());
    }

    #[test]
    fn test_pass_through_reaches_next_stage() {
        let pipe = StreamingPipeBase::new("p", StageSettings::default());
        let target = SharedBytes::new();
        let next = StreamingStage::new("next", target);
        let mut session = Session::new();

        let stream = pipe.pass_through_stream(&mut session, Some(&next as &dyn PipelineStage), &NoForwards).unwrap();
        assert!(stream.is_some());

        let disabled = StreamingPipeBase::new(
            "p",
            StageSettings {
                streaming_active: Some(false),
                ..Default::default()
            },
        );
        assert!(disabled
            .pass_through_stream(&mut session, Some(&next as &dyn PipelineStage), &NoForwards)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_settings_deserialise_from_toml() {
        let settings: StageSettings = toml::from_str(
            r#"
            store_result_in_session_key = "out"

            [[parameters]]
            name = "id"
            value = "42"
            "#,
        )
        .unwrap();

        assert_eq!(settings.store_result_in_session_key.as_deref(), Some("out"));
        assert!(!settings.parameters[0].consumes_input());
    }
}
