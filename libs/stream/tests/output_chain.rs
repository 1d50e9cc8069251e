//! Output Stream Chain Tests
//!
//! Chained streams resolve forward and result from the far end, and close
//! releases every registered resource exactly once in registration order.

use std::io::Write;
use stream::sink::{ByteSink, CharSink, SharedBytes, SharedText, TextSink};
use stream::test_utils::{CountingResource, FailingResource, ReleaseLog, StreamingStage};
use stream::{MessageOutputStream, NoForwards, PipelineStage, Session};
use test_log::test;

fn chain(c_forward: Option<&str>) -> MessageOutputStream {
    let mut c = MessageOutputStream::new("c", ByteSink::new(SharedBytes::new()));
    if let Some(forward) = c_forward {
        c.set_forward(forward);
    }
    let b = MessageOutputStream::with_next("b", ByteSink::new(SharedBytes::new()), c);
    MessageOutputStream::with_next("a", ByteSink::new(SharedBytes::new()), b)
}

#[test]
fn test_forward_of_last_link_wins() {
    let mut a = chain(Some("c-forward"));

    assert_eq!(a.len(), 3);
    assert_eq!(a.get_forward(), Some("c-forward"));
    a.close().unwrap();
}

#[test]
fn test_no_forward_anywhere() {
    let mut a = chain(None);

    assert_eq!(a.get_forward(), None);
    a.close().unwrap();
}

#[test]
fn test_resources_released_once_in_order() {
    for count in [0usize, 1, 4] {
        let log = ReleaseLog::new();
        let mut stream = MessageOutputStream::cap("pipe");
        let names: Vec<String> = (0..count).map(|i| format!("r{}", i)).collect();
        for (i, name) in names.iter().enumerate() {
            if i == 0 && count > 1 {
                stream.register_resource(Box::new(FailingResource::new(name, &log)));
            } else {
                stream.register_resource(Box::new(CountingResource::new(name, &log)));
            }
        }

        let closed = stream.close();
        assert_eq!(closed.is_err(), count > 1);
        assert!(stream.close().is_ok());
        assert_eq!(log.entries(), names);
    }
}

#[test]
fn test_stage_receives_streamed_output() {
    let target = SharedBytes::new();
    let next = StreamingStage::new("next", target.clone());
    let owner = StreamingStage::new("owner", SharedBytes::new());
    let mut session = Session::new();

    let mut stream =
        MessageOutputStream::target_stream(&owner, &mut session, Some(&next as &dyn PipelineStage), &NoForwards)
            .unwrap();
    stream.as_byte_sink().unwrap().write_all(b"streamed").unwrap();
    stream.close().unwrap();

    assert_eq!(target.contents(), b"streamed");
    assert!(stream.pipe_run_result().result.is_null());
}

#[test]
fn test_capture_keeps_a_copy_of_streamed_text() {
    let target = SharedText::new();
    let copy = SharedText::new();
    let mut stream = MessageOutputStream::new("pipe", CharSink::new(target.clone()));
    stream.capture_character_stream(copy.clone(), 1024).unwrap();

    stream.as_character_sink().unwrap().write_str("both ways").unwrap();
    stream.close().unwrap();

    assert_eq!(target.contents(), "both ways");
    assert_eq!(copy.contents(), "both ways");
}
