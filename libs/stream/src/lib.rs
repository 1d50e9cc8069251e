//! # Stream
//!
//! Message representation and output-stream plumbing for pipeline stages.
//!
//! ## Features
//!
//! - **Message**: one payload readable as text, bytes, streams or a node,
//!   with charset detection, preservation and wire encoding
//! - **Output streams**: a stage writes into the next stage's sink when it
//!   can, into a capturing accumulator when it cannot
//! - **Thread bridging**: event sinks driven from a worker thread, with the
//!   diagnostic context and transaction carried across
//!
//! ## Usage
//!
//! ```rust
//! use stream::{Message, MessageOutputStream};
//! use stream::sink::TextSink;
//!
//! let mut output = MessageOutputStream::cap("pipe");
//! output.as_character_sink()?.write_str("hello")?;
//! output.close()?;
//!
//! let mut run = output.pipe_run_result();
//! assert_eq!(run.result.as_text(None)?.as_deref(), Some("hello"));
//! # Ok::<(), stream::StreamError>(())
//! ```

pub mod bridge;
pub mod capability;
pub mod charset;
pub mod connector;
pub mod context;
pub mod error;
pub mod file_reference;
pub mod message;
pub mod node;
pub mod output;
pub mod reader;
pub mod resources;
pub mod session;
mod settings;
pub mod sink;
pub mod test_utils;

pub use bridge::EventBridge;
pub use capability::{
    ForwardResolver, NoForwards, OutputStreamingSupport, PipelineStage, StageSettings,
    StreamingPipeBase, StreamingSender, StreamingSenderBase,
};
pub use connector::{
    NoTransaction, NoopListener, ThreadConnector, ThreadLifecycleListener, TransactionCoordinator,
};
pub use context::{ContextValue, MessageContext};
pub use error::{Result, StreamError};
pub use file_reference::FileReference;
pub use message::{IntoMessage, Message, MessageWrapper};
pub use node::Node;
pub use output::{MessageOutputStream, PipeRunResult, StreamSink};
pub use resources::Closeable;
pub use session::{NamedObject, Session};
pub use settings::{install_settings, settings};
pub use stream_config::StreamSettings;
