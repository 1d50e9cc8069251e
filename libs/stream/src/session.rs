//! Per-invocation session bag and the naming seam stages share

use crate::context::ContextValue;
use crate::error::Result;
use crate::resources::{Closeable, Resources};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Anything with a name used to prefix its log lines
pub trait NamedObject {
    fn name(&self) -> &str;
}

/// Key/value store for one pipeline invocation. Resources scheduled with
/// [`Session::close_on_exit`] are released when the session closes.
pub struct Session {
    id: String,
    values: HashMap<String, ContextValue>,
    closeables: Resources,
    closed: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            values: HashMap::new(),
            closeables: Resources::new(),
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.values.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ContextValue> {
        self.values.remove(key)
    }

    /// Release `resource` when this session closes
    pub fn close_on_exit(&mut self, resource: Box<dyn Closeable>) {
        self.closeables.register(resource);
    }

    pub fn pending_closes(&self) -> usize {
        self.closeables.len()
    }

    /// Release scheduled resources in registration order
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!(session = %self.id, pending = self.closeables.len(), "closing session");
        self.closeables.close_all(&self.id)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("session {}: release on drop failed: {}", self.id, e);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("values", &self.values)
            .field("pending_closes", &self.closeables.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{CountingResource, ReleaseLog};

    #[test]
    fn test_values_round_trip() {
        let mut session = Session::with_id("s1");
        session.put("count", 3i64);

        assert_eq!(session.get("count").and_then(ContextValue::as_number), Some(3));
        assert!(session.remove("count").is_some());
        assert!(session.get("count").is_none());
    }

    #[test]
    fn test_close_on_exit_runs_once_in_order() {
        let log = ReleaseLog::new();
        let mut session = Session::new();
        session.close_on_exit(Box::new(CountingResource::new("first", &log)));
        session.close_on_exit(Box::new(CountingResource::new("second", &log)));

        session.close().unwrap();
        drop(session);

        assert_eq!(log.entries(), vec!["first", "second"]);
    }
}
