//! Closeable resources released alongside a message or output stream

use crate::error::{Result, StreamError};
use tracing::warn;

/// A resource that must be released exactly once
pub trait Closeable: Send {
    fn close(&mut self) -> Result<()>;
}

/// Closure-backed resource
pub struct CloseFn<F>(Option<F>);

impl<F> CloseFn<F>
where
    F: FnOnce() -> Result<()> + Send,
{
    pub fn new(f: F) -> Self {
        Self(Some(f))
    }
}

impl<F> Closeable for CloseFn<F>
where
    F: FnOnce() -> Result<()> + Send,
{
    fn close(&mut self) -> Result<()> {
        match self.0.take() {
            Some(f) => f(),
            None => Ok(()),
        }
    }
}

/// Insertion-ordered set of extra resources
#[derive(Default)]
pub struct Resources {
    items: Vec<Box<dyn Closeable>>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource: Box<dyn Closeable>) {
        self.items.push(resource);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Close every resource in registration order. A failure never prevents
    /// the remaining releases; all failures are returned together.
    pub fn close_all(&mut self, owner: &str) -> Result<()> {
        let mut errors = Vec::new();
        for mut resource in self.items.drain(..) {
            if let Err(e) = resource.close() {
                warn!("{}: failed to release resource: {}", owner, e);
                errors.push(e);
            }
        }
        StreamError::from_release_failures(errors)
    }
}

/// A whole set can be handed on, e.g. to a session
impl Closeable for Resources {
    fn close(&mut self) -> Result<()> {
        self.close_all("deferred")
    }
}

impl std::fmt::Debug for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resources")
            .field("count", &self.items.len())
            .finish()
    }
}
