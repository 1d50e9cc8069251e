use super::Message;
use uuid::Uuid;

/// A message carried together with its transport identifiers
#[derive(Debug)]
pub struct MessageWrapper {
    id: String,
    correlation_id: Option<String>,
    message: Message,
}

impl MessageWrapper {
    pub fn new(message: Message) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), message)
    }

    pub fn with_id(id: impl Into<String>, message: Message) -> Self {
        Self {
            id: id.into(),
            correlation_id: None,
            message,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    pub fn into_inner(self) -> Message {
        self.message
    }
}
