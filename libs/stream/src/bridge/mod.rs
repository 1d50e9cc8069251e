//! Push/pull bridges: byte sinks whose bytes are parsed into structured
//! events on a consumer thread
//!
//! The owner writes bytes; a worker started through a [`ThreadConnector`]
//! reads them from a bounded channel and feeds the parsed events to the
//! target handler. A consumer failure is held until [`EventBridge::close`],
//! which finishes the channel, joins the worker and reports the failure as
//! [`StreamError::ThreadBridge`].

mod channel;

use crate::connector::ThreadConnector;
use crate::error::{Result, StreamError};
use crate::sink::{parse_json_events, parse_xml_events, JsonSink, OutputSink, XmlSink};
use channel::{byte_channel, ChannelReader, ChannelWriter};
use std::io::{self, BufReader, Write};
use std::thread::JoinHandle;
use tracing::{debug, warn};

pub struct EventBridge {
    owner: String,
    writer: Option<ChannelWriter>,
    worker: Option<JoinHandle<Result<()>>>,
    connector: ThreadConnector,
}

impl EventBridge {
    /// Byte sink that parses XML into `handler`
    pub fn to_xml(handler: XmlSink, connector: ThreadConnector) -> Result<Self> {
        Self::start(connector, move |reader| {
            let mut handler = handler;
            parse_xml_events(BufReader::new(reader), &mut handler)
        })
    }

    /// Byte sink that parses one JSON document into `handler`
    pub fn to_json(handler: JsonSink, connector: ThreadConnector) -> Result<Self> {
        Self::start(connector, move |reader| {
            let mut handler = handler;
            parse_json_events(BufReader::new(reader), &mut handler)
        })
    }

    fn start<F>(connector: ThreadConnector, consume: F) -> Result<Self>
    where
        F: FnOnce(ChannelReader) -> Result<()> + Send + 'static,
    {
        let settings = &crate::settings().streaming;
        let (writer, reader) = byte_channel(settings.channel_capacity, settings.chunk_size);
        let worker = connector.spawn(move || consume(reader))?;
        debug!(
            capacity = settings.channel_capacity,
            chunk_size = settings.chunk_size,
            "{}: event bridge started",
            connector.owner()
        );

        Ok(Self {
            owner: connector.owner().to_string(),
            writer: Some(writer),
            worker: Some(worker),
            connector,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    fn join_worker(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        match worker.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_thread_bridge() => Err(e),
            Ok(Err(e)) => Err(StreamError::thread_bridge(e)),
            Err(_) => Err(StreamError::thread_bridge_message(format!(
                "{}: consumer thread could not be joined",
                self.owner
            ))),
        }
    }
}

impl Write for EventBridge {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writer.as_mut() {
            Some(writer) => writer.write(buf),
            None => Err(StreamError::illegal_state("event bridge already closed").into_io()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl OutputSink for EventBridge {
    /// Finish the channel, join the consumer, then close the connector.
    /// Blocks until the consumer has drained everything written.
    fn close(&mut self) -> Result<()> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        writer.finish();
        drop(writer);

        let mut errors = Vec::new();
        if let Err(e) = self.join_worker() {
            errors.push(e);
        }
        if let Err(e) = self.connector.close() {
            warn!("{}: failed to close thread connector: {}", self.owner, e);
            errors.push(e);
        }
        StreamError::from_release_failures(errors)
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        if let Err(e) = OutputSink::close(self) {
            warn!("{}: event bridge closed on drop with failure: {}", self.owner, e);
        }
    }
}
