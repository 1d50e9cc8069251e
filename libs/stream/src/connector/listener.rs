use super::ThreadInfo;
use crate::error::StreamError;

/// Observer of bridged child threads, e.g. for thread accounting
///
/// `announce` is called on the owner thread before anything is spawned.
/// Afterwards either `cancel_child` (no thread was introduced) or
/// `thread_created` followed by exactly one of `thread_ended` and
/// `thread_aborted` is reported.
pub trait ThreadLifecycleListener: Send + Sync {
    fn announce(&self, _child: &ThreadInfo) {}

    fn thread_created(&self, _child: &ThreadInfo) {}

    fn thread_ended(&self, _child: &ThreadInfo) {}

    fn thread_aborted(&self, _child: &ThreadInfo, _cause: &StreamError) {}

    fn cancel_child(&self, _child: &ThreadInfo) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl ThreadLifecycleListener for NoopListener {}
