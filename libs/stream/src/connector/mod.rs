//! Thread connector: carries diagnostic and transaction context from an
//! owner thread to the one worker thread that serves it
//!
//! A connector is created on the owner thread, which announces the child to
//! the lifecycle listener. The worker calls [`ThreadConnector::start_thread`]
//! first and [`ThreadConnector::end_thread`] or
//! [`ThreadConnector::abort_thread`] last. If `start_thread` turns out to run
//! on the owner thread no child exists and the announcement is cancelled.
//! [`ThreadConnector::close`] reconciles whatever state was reached.

pub mod diagnostics;
mod listener;
mod transaction;

pub use diagnostics::{ContextGuard, ContextSnapshot};
pub use listener::{NoopListener, ThreadLifecycleListener};
pub use transaction::{NoTransaction, TransactionBridge, TransactionCoordinator};

use crate::error::{Result, StreamError};
use parking_lot::Mutex;
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Announced,
    Created,
    Finished,
}

/// Correlation handle for one announced child thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    id: Uuid,
    owner: String,
}

impl ThreadInfo {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

struct Lifecycle {
    state: ConnectorState,
    child: Option<ThreadId>,
    bridge: Option<Box<dyn TransactionBridge>>,
    cancelled: bool,
    closed: bool,
}

struct Inner {
    owner: String,
    parent: ThreadId,
    info: ThreadInfo,
    snapshot: ContextSnapshot,
    listener: Arc<dyn ThreadLifecycleListener>,
    lifecycle: Mutex<Lifecycle>,
}

/// Shared between the owner and its worker; clones refer to the same connector
#[derive(Clone)]
pub struct ThreadConnector {
    inner: Arc<Inner>,
}

/// Keeps the owner's diagnostic context applied on the worker thread
#[must_use = "dropping the scope restores the worker's own diagnostic context"]
#[derive(Debug)]
pub struct ThreadScope {
    context: Option<ContextGuard>,
}

impl ThreadScope {
    /// False when start_thread ran on the owner thread
    pub fn is_bridged(&self) -> bool {
        self.context.is_some()
    }
}

impl ThreadConnector {
    /// Snapshot the calling thread's context and announce a child
    pub fn new(
        owner: &str,
        listener: Arc<dyn ThreadLifecycleListener>,
        coordinator: &dyn TransactionCoordinator,
    ) -> Self {
        let info = ThreadInfo {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
        };
        let snapshot = ContextSnapshot::capture();
        let bridge = coordinator.capture();
        listener.announce(&info);
        debug!("{}: announced child thread {}", owner, info.id);

        Self {
            inner: Arc::new(Inner {
                owner: owner.to_string(),
                parent: thread::current().id(),
                info,
                snapshot,
                listener,
                lifecycle: Mutex::new(Lifecycle {
                    state: ConnectorState::Announced,
                    child: None,
                    bridge: Some(bridge),
                    cancelled: false,
                    closed: false,
                }),
            }),
        }
    }

    /// Connector without listener or transaction
    pub fn detached(owner: &str) -> Self {
        Self::new(owner, Arc::new(NoopListener), &NoTransaction)
    }

    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    pub fn info(&self) -> &ThreadInfo {
        &self.inner.info
    }

    pub fn state(&self) -> ConnectorState {
        self.inner.lifecycle.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lifecycle.lock().closed
    }

    /// Enter the child side. Applies the owner's diagnostic context and
    /// resumes its transaction on this thread.
    pub fn start_thread(&self) -> Result<ThreadScope> {
        let inner = &self.inner;
        let current = thread::current().id();

        if current == inner.parent {
            let cancel = {
                let mut lifecycle = inner.lifecycle.lock();
                let cancel = lifecycle.state == ConnectorState::Announced && !lifecycle.cancelled;
                lifecycle.cancelled = true;
                cancel
            };
            if cancel {
                debug!("{}: running on owner thread, child {} cancelled", inner.owner, inner.info.id);
                inner.listener.cancel_child(&inner.info);
            }
            return Ok(ThreadScope { context: None });
        }

        let mut lifecycle = inner.lifecycle.lock();
        if lifecycle.closed {
            return Err(StreamError::illegal_state(format!(
                "{}: connector closed before the child thread started",
                inner.owner
            )));
        }
        if lifecycle.state != ConnectorState::Announced || lifecycle.cancelled {
            return Err(StreamError::illegal_state(format!(
                "{}: child thread already started",
                inner.owner
            )));
        }

        let context = inner.snapshot.apply();
        if let Some(bridge) = lifecycle.bridge.as_mut() {
            bridge.resume()?;
        }
        lifecycle.state = ConnectorState::Created;
        lifecycle.child = Some(current);
        drop(lifecycle);

        inner.listener.thread_created(&inner.info);
        debug!(
            thread = thread::current().name().unwrap_or("unnamed"),
            "{}: child thread {} started", inner.owner, inner.info.id
        );
        Ok(ThreadScope {
            context: Some(context),
        })
    }

    /// Leave the child side normally; must run on the child thread
    pub fn end_thread(&self) -> Result<()> {
        self.finish(None)
    }

    /// Leave the child side after `cause`; must run on the child thread
    pub fn abort_thread(&self, cause: &StreamError) -> Result<()> {
        self.finish(Some(cause))
    }

    fn finish(&self, cause: Option<&StreamError>) -> Result<()> {
        let inner = &self.inner;
        let current = thread::current().id();

        let mut lifecycle = inner.lifecycle.lock();
        if lifecycle.child != Some(current) {
            if current == inner.parent && lifecycle.child.is_none() && lifecycle.cancelled {
                return Ok(());
            }
            let operation = if cause.is_some() { "abort_thread" } else { "end_thread" };
            return Err(StreamError::illegal_state(format!(
                "{}: {} must be called from the child thread",
                inner.owner, operation
            )));
        }
        if lifecycle.state == ConnectorState::Finished {
            return Ok(());
        }
        lifecycle.state = ConnectorState::Finished;
        let ended = match lifecycle.bridge.as_mut() {
            Some(bridge) => bridge.end(cause.is_none()),
            None => Ok(()),
        };
        drop(lifecycle);

        match cause {
            None => inner.listener.thread_ended(&inner.info),
            Some(cause) => inner.listener.thread_aborted(&inner.info, cause),
        }
        ended
    }

    /// Reconcile and release. Safe to call from any thread, any number of times.
    pub fn close(&self) -> Result<()> {
        let inner = &self.inner;
        let (state, cancel, bridge) = {
            let mut lifecycle = inner.lifecycle.lock();
            if lifecycle.closed {
                return Ok(());
            }
            lifecycle.closed = true;
            let state = lifecycle.state;
            let cancel = state == ConnectorState::Announced && !lifecycle.cancelled;
            lifecycle.cancelled |= cancel;
            if state == ConnectorState::Created {
                lifecycle.state = ConnectorState::Finished;
            }
            (state, cancel, lifecycle.bridge.take())
        };

        if cancel {
            debug!("{}: child {} never started", inner.owner, inner.info.id);
            inner.listener.cancel_child(&inner.info);
        }
        if state == ConnectorState::Created {
            warn!(
                "{}: child thread {} did not report its end, marking it ended",
                inner.owner, inner.info.id
            );
            inner.listener.thread_ended(&inner.info);
        }

        let mut errors = Vec::new();
        if let Some(mut bridge) = bridge {
            if let Err(e) = bridge.release() {
                warn!("{}: failed to release transaction bridge: {}", inner.owner, e);
                errors.push(e);
            }
        }
        StreamError::from_release_failures(errors)
    }

    /// Run `body` on a new named thread between start_thread and
    /// end_thread, aborting on error or panic
    pub fn spawn<F, T>(&self, body: F) -> Result<JoinHandle<Result<T>>>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let connector = self.clone();
        let name = format!(
            "{}-{}",
            crate::settings().streaming.thread_name_prefix,
            self.inner.owner
        );
        thread::Builder::new()
            .name(name)
            .spawn(move || {
                let _scope = connector.start_thread()?;
                let failure = match panic::catch_unwind(AssertUnwindSafe(body)) {
                    Ok(Ok(value)) => {
                        connector.end_thread()?;
                        return Ok(value);
                    }
                    Ok(Err(e)) => e,
                    Err(payload) => StreamError::thread_bridge_message(format!(
                        "consumer panicked: {}",
                        panic_message(&*payload)
                    )),
                };
                error!("{}: bridged consumer failed: {}", connector.owner(), failure);
                if let Err(e) = connector.abort_thread(&failure) {
                    warn!("{}: abort after failure failed: {}", connector.owner(), e);
                }
                Err(failure)
            })
            .map_err(|e| self.spawn_failed(e))
    }

    /// Withdraw the announced child when no thread could be started for it
    fn spawn_failed(&self, err: io::Error) -> StreamError {
        if let Err(e) = self.close() {
            warn!("{}: closing after failed spawn failed: {}", self.owner(), e);
        }
        StreamError::resource_with_context("failed to spawn bridge thread", err)
    }
}

impl std::fmt::Debug for ThreadConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadConnector")
            .field("owner", &self.inner.owner)
            .field("child", &self.inner.info.id)
            .field("state", &self.state())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return text.to_string();
    }
    payload
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingCoordinator, RecordingListener};

    fn connector(listener: &RecordingListener) -> ThreadConnector {
        ThreadConnector::new("stage", Arc::new(listener.clone()), &NoTransaction)
    }

    #[test]
    fn test_failed_spawn_cancels_announced_child() {
        let listener = RecordingListener::new();
        let connector = connector(&listener);

        let err = connector.spawn_failed(io::Error::new(io::ErrorKind::WouldBlock, "no threads left"));

        assert!(err.is_resource());
        assert_eq!(listener.count("announce"), 1);
        assert_eq!(listener.count("cancel"), 1);
        assert_eq!(listener.count("created"), 0);
        connector.close().unwrap();
        assert_eq!(listener.count("cancel"), 1);
    }

    #[test]
    fn test_same_thread_cancels_once() {
        let listener = RecordingListener::new();
        let connector = connector(&listener);

        let scope = connector.start_thread().unwrap();
        assert!(!scope.is_bridged());
        connector.start_thread().unwrap();
        connector.end_thread().unwrap();
        connector.close().unwrap();

        assert_eq!(listener.count("created"), 0);
        assert_eq!(listener.count("cancel"), 1);
        assert_eq!(connector.state(), ConnectorState::Announced);
    }

    #[test]
    fn test_child_thread_reports_once_even_after_close() {
        let listener = RecordingListener::new();
        let coordinator = RecordingCoordinator::new();
        let connector = ThreadConnector::new("stage", Arc::new(listener.clone()), &coordinator);

        let child = connector.clone();
        thread::spawn(move || {
            let scope = child.start_thread().unwrap();
            assert!(scope.is_bridged());
            child.end_thread().unwrap();
            child.end_thread().unwrap();
        })
        .join()
        .unwrap();
        connector.close().unwrap();
        connector.close().unwrap();

        assert_eq!(listener.events(), vec!["announce", "created", "ended"]);
        assert_eq!(coordinator.events(), vec!["resume", "end(commit)", "release"]);
    }

    #[test]
    fn test_end_thread_from_owner_is_illegal_once_child_exists() {
        let listener = RecordingListener::new();
        let connector = connector(&listener);

        let child = connector.clone();
        let scope_held = thread::spawn(move || child.start_thread().map(|s| s.is_bridged()))
            .join()
            .unwrap();
        assert!(scope_held.unwrap());

        let err = connector.end_thread().unwrap_err();
        assert!(err.is_illegal_state());
        assert!(connector
            .abort_thread(&StreamError::handler("x"))
            .unwrap_err()
            .is_illegal_state());

        // close forces the missing end notification
        connector.close().unwrap();
        assert_eq!(listener.count("ended"), 1);
        assert_eq!(connector.state(), ConnectorState::Finished);
    }

    #[test]
    fn test_close_before_start_cancels() {
        let listener = RecordingListener::new();
        let connector = connector(&listener);

        connector.close().unwrap();

        assert_eq!(listener.events(), vec!["announce", "cancel"]);
    }

    #[test]
    fn test_spawn_turns_panic_into_abort() {
        let listener = RecordingListener::new();
        let connector = connector(&listener);

        let handle = connector
            .spawn(|| -> Result<()> { panic!("consumer exploded") })
            .unwrap();
        let err = handle.join().unwrap().unwrap_err();
        connector.close().unwrap();

        assert!(err.is_thread_bridge());
        assert!(err.to_string().contains("consumer exploded"));
        assert_eq!(listener.count("aborted"), 1);
        assert_eq!(listener.count("ended"), 0);
    }

    #[test]
    fn test_spawn_returns_body_value() {
        let listener = RecordingListener::new();
        let connector = connector(&listener);

        let value = connector.spawn(|| Ok(7)).unwrap().join().unwrap().unwrap();

        assert_eq!(value, 7);
        assert_eq!(listener.events(), vec!["announce", "created", "ended"]);
    }
}
