//! Error taxonomy for message conversion, output streams and thread bridging
//!
//! Conversion and resource errors surface synchronously at the call that
//! triggered them. Failures of a background consumer are captured and only
//! raised when the owner joins it, wrapped as [`StreamError::ThreadBridge`].

use std::io;
use thiserror::Error;

/// Result type alias for stream operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Main error type of the streaming core
#[derive(Error, Debug)]
pub enum StreamError {
    /// Unsupported or failed representation conversion (bad charset, malformed content)
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// I/O failure on the underlying stream or file
    #[error("Resource error: {message}")]
    Resource {
        message: String,
        #[source]
        source: io::Error,
    },

    /// Failure captured from a background consumer, surfaced at the join point
    #[error("Background consumer failed: {message}")]
    ThreadBridge {
        message: String,
        #[source]
        source: Option<Box<StreamError>>,
    },

    /// Operation invoked in a state or on a thread that does not allow it
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// A structured-event handler rejected an event
    #[error("Event handler failed: {0}")]
    Handler(String),

    /// Versioned wire encode/decode failure
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Several isolated release steps failed; every failure is kept
    #[error("{} release steps failed, first: {}", .errors.len(), first_message(.errors))]
    Release { errors: Vec<StreamError> },
}

fn first_message(errors: &[StreamError]) -> String {
    errors
        .first()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl StreamError {
    /// Create a conversion error
    pub fn conversion(msg: impl Into<String>) -> Self {
        StreamError::Conversion(msg.into())
    }

    /// Create a resource error from an I/O error
    pub fn resource(source: io::Error) -> Self {
        StreamError::Resource {
            message: source.to_string(),
            source,
        }
    }

    /// Create a resource error with additional context
    pub fn resource_with_context(context: impl Into<String>, source: io::Error) -> Self {
        StreamError::Resource {
            message: format!("{}: {}", context.into(), source),
            source,
        }
    }

    /// Wrap a failure captured on a background consumer
    pub fn thread_bridge(captured: StreamError) -> Self {
        StreamError::ThreadBridge {
            message: captured.to_string(),
            source: Some(Box::new(captured)),
        }
    }

    /// Background consumer ended without an error value (panic, lost handle)
    pub fn thread_bridge_message(msg: impl Into<String>) -> Self {
        StreamError::ThreadBridge {
            message: msg.into(),
            source: None,
        }
    }

    /// Create an illegal state error
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        StreamError::IllegalState(msg.into())
    }

    /// Create a handler error
    pub fn handler(msg: impl Into<String>) -> Self {
        StreamError::Handler(msg.into())
    }

    /// Create a wire encoding error
    pub fn encoding(msg: impl Into<String>) -> Self {
        StreamError::Encoding(msg.into())
    }

    /// Fold the failures of a multi-step release into one result
    pub fn from_release_failures(mut errors: Vec<StreamError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(StreamError::Release { errors }),
        }
    }

    /// Flatten an aggregate back into its individual failures
    pub fn into_failures(self) -> Vec<StreamError> {
        match self {
            StreamError::Release { errors } => errors,
            other => vec![other],
        }
    }

    /// Check if this is a conversion error
    pub fn is_conversion(&self) -> bool {
        matches!(self, StreamError::Conversion(_))
    }

    /// Check if this is a resource (I/O) error
    pub fn is_resource(&self) -> bool {
        matches!(self, StreamError::Resource { .. })
    }

    /// Check if this error was captured on a background consumer
    pub fn is_thread_bridge(&self) -> bool {
        matches!(self, StreamError::ThreadBridge { .. })
    }

    /// Check if this is an illegal state error
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, StreamError::IllegalState(_))
    }

    /// The error captured on the background consumer, if any
    pub fn bridged_cause(&self) -> Option<&StreamError> {
        match self {
            StreamError::ThreadBridge { source, .. } => source.as_deref(),
            _ => None,
        }
    }

    /// Convert into an `io::Error` so it can cross `Read`/`Write` boundaries
    /// and be recovered intact by `From<io::Error>`
    pub fn into_io(self) -> io::Error {
        match self {
            StreamError::Resource { source, .. } => source,
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        if !err
            .get_ref()
            .is_some_and(|inner| inner.is::<StreamError>())
        {
            return StreamError::resource(err);
        }

        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<StreamError>()) {
            Some(Ok(stream)) => *stream,
            Some(Err(other)) => StreamError::resource(io::Error::new(kind, other)),
            None => StreamError::resource(io::Error::from(kind)),
        }
    }
}

impl From<quick_xml::Error> for StreamError {
    fn from(err: quick_xml::Error) -> Self {
        match err {
            quick_xml::Error::Io(io_err) => match std::sync::Arc::try_unwrap(io_err) {
                Ok(io_err) => StreamError::from(io_err),
                Err(shared) => StreamError::resource(io::Error::new(shared.kind(), shared.to_string())),
            },
            other => StreamError::Conversion(format!("malformed XML: {}", other)),
        }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            return StreamError::from(io::Error::from(err));
        }
        StreamError::Conversion(format!("malformed JSON: {}", err))
    }
}

impl From<bincode::Error> for StreamError {
    fn from(err: bincode::Error) -> Self {
        StreamError::Encoding(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_roundtrip_keeps_stream_error() {
        let original = StreamError::handler("rejected <b>");
        let io_err = original.into_io();

        let recovered = StreamError::from(io_err);
        assert!(matches!(recovered, StreamError::Handler(msg) if msg == "rejected <b>"));
    }

    #[test]
    fn test_plain_io_becomes_resource() {
        let err = StreamError::from(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));

        assert!(err.is_resource());
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn test_release_folding() {
        assert!(StreamError::from_release_failures(Vec::new()).is_ok());

        let single = StreamError::from_release_failures(vec![StreamError::handler("a")]);
        assert!(matches!(single, Err(StreamError::Handler(_))));

        let many = StreamError::from_release_failures(vec![
            StreamError::handler("a"),
            StreamError::illegal_state("b"),
        ])
        .unwrap_err();
        match &many {
            StreamError::Release { errors } => assert_eq!(errors.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        assert!(many.to_string().starts_with("2 release steps failed"));
    }

    #[test]
    fn test_thread_bridge_keeps_cause() {
        let err = StreamError::thread_bridge(StreamError::conversion("bad token"));

        assert!(err.is_thread_bridge());
        assert!(err.bridged_cause().unwrap().is_conversion());
    }
}
