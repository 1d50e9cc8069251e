//! Thread Bridge Tests
//!
//! Lifecycle notifications of the thread connector and the byte-to-event
//! bridges an output stream starts when a structured sink is written as bytes.

use std::io::Write;
use std::sync::Arc;
use std::thread;
use stream::connector::diagnostics;
use stream::sink::XmlSink;
use stream::test_utils::{FailingXmlHandler, RecordingCoordinator, RecordingListener, RecordingXmlHandler};
use stream::{MessageOutputStream, NoTransaction, StreamError, ThreadConnector};
use test_log::test;

#[test]
fn test_same_thread_never_creates() {
    let listener = RecordingListener::new();
    let connector = ThreadConnector::new("same", Arc::new(listener.clone()), &NoTransaction);

    let scope = connector.start_thread().unwrap();
    assert!(!scope.is_bridged());
    drop(scope);
    connector.start_thread().unwrap();
    connector.end_thread().unwrap();
    connector.close().unwrap();

    assert_eq!(listener.count("created"), 0);
    assert_eq!(listener.count("cancel"), 1);
}

#[test]
fn test_other_thread_reports_exactly_once() {
    let listener = RecordingListener::new();
    let coordinator = RecordingCoordinator::new();
    let connector = ThreadConnector::new("other", Arc::new(listener.clone()), &coordinator);

    let worker = connector.clone();
    thread::spawn(move || {
        let scope = worker.start_thread().unwrap();
        assert!(scope.is_bridged());
        drop(scope);
        worker.end_thread().unwrap();
    })
    .join()
    .unwrap();
    connector.close().unwrap();
    connector.close().unwrap();

    assert_eq!(listener.count("created"), 1);
    assert_eq!(listener.count("ended") + listener.count("aborted"), 1);
    assert_eq!(coordinator.events(), vec!["resume", "end(commit)", "release"]);
}

#[test]
fn test_diagnostic_context_follows_the_worker() {
    diagnostics::put("request", "r-17");
    let connector = ThreadConnector::new("ctx", Arc::new(RecordingListener::new()), &NoTransaction);

    let seen = connector
        .spawn(|| Ok(diagnostics::get("request")))
        .unwrap()
        .join()
        .unwrap()
        .unwrap();
    connector.close().unwrap();
    diagnostics::clear();

    assert_eq!(seen.as_deref(), Some("r-17"));
}

#[test]
fn test_xml_round_trip_through_byte_view() {
    let listener = RecordingListener::new();
    let handler = RecordingXmlHandler::new();
    let mut stream = MessageOutputStream::new("xml", XmlSink::new(handler.clone()))
        .with_thread_lifecycle(Arc::new(listener.clone()), Arc::new(NoTransaction));

    let mut bytes = stream.as_byte_sink().unwrap();
    bytes.write_all(b"<a><b>x</b></a>").unwrap();
    stream.close().unwrap();

    assert_eq!(
        handler.events(),
        vec!["start(a)", "start(b)", "text(x)", "end(b)", "end(a)"]
    );
    assert_eq!(listener.count("created"), 1);
    assert_eq!(listener.count("ended"), 1);
}

#[test]
fn test_consumer_failure_is_not_lost() {
    let listener = RecordingListener::new();
    let mut stream = MessageOutputStream::new("xml", XmlSink::new(FailingXmlHandler::on_element("b")))
        .with_thread_lifecycle(Arc::new(listener.clone()), Arc::new(NoTransaction));

    let mut bytes = stream.as_byte_sink().unwrap();
    bytes.write_all(b"<a><b>x</b></a>").unwrap();
    let err = stream.close().unwrap_err();

    let failures = err.into_failures();
    assert!(failures
        .iter()
        .any(|e| e.is_thread_bridge() && matches!(e.bridged_cause(), Some(StreamError::Handler(_)))));
    assert_eq!(listener.count("aborted"), 1);
    assert_eq!(listener.count("ended"), 0);
}
