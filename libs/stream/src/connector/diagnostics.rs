//! Per-thread diagnostic context and log masking patterns
//!
//! Both registries are thread-local. Nothing is inherited by a new thread:
//! the owner captures a [`ContextSnapshot`] and the worker applies it
//! explicitly, getting a guard that puts the previous state back on drop.

use crate::error::{Result, StreamError};
use regex::Regex;
use std::cell::RefCell;
use std::collections::BTreeMap;
use tracing::span::EnteredSpan;
use tracing::Span;

thread_local! {
    static DIAGNOSTIC_CONTEXT: RefCell<BTreeMap<String, String>> = RefCell::new(BTreeMap::new());
    static MASKS: RefCell<Vec<Regex>> = RefCell::new(Vec::new());
}

const MASK_CHAR: char = '*';

pub fn put(key: impl Into<String>, value: impl Into<String>) {
    DIAGNOSTIC_CONTEXT.with(|ctx| {
        ctx.borrow_mut().insert(key.into(), value.into());
    });
}

pub fn get(key: &str) -> Option<String> {
    DIAGNOSTIC_CONTEXT.with(|ctx| ctx.borrow().get(key).cloned())
}

pub fn remove(key: &str) -> Option<String> {
    DIAGNOSTIC_CONTEXT.with(|ctx| ctx.borrow_mut().remove(key))
}

pub fn clear() {
    DIAGNOSTIC_CONTEXT.with(|ctx| ctx.borrow_mut().clear());
    MASKS.with(|masks| masks.borrow_mut().clear());
}

/// Copy of this thread's diagnostic values
pub fn current() -> BTreeMap<String, String> {
    DIAGNOSTIC_CONTEXT.with(|ctx| ctx.borrow().clone())
}

/// Hide every match of `pattern` in text passed through [`mask`]
pub fn add_mask(pattern: &str) -> Result<()> {
    let regex = Regex::new(pattern)
        .map_err(|e| StreamError::conversion(format!("invalid masking pattern '{}': {}", pattern, e)))?;
    MASKS.with(|masks| masks.borrow_mut().push(regex));
    Ok(())
}

pub fn mask_count() -> usize {
    MASKS.with(|masks| masks.borrow().len())
}

/// Replace every match of a registered pattern with asterisks
pub fn mask(text: &str) -> String {
    MASKS.with(|masks| {
        masks.borrow().iter().fold(text.to_string(), |acc, regex| {
            regex
                .replace_all(&acc, |caps: &regex::Captures<'_>| {
                    MASK_CHAR.to_string().repeat(caps[0].chars().count())
                })
                .into_owned()
        })
    })
}

/// Diagnostic state of one thread, ready to be applied on another
#[derive(Clone, Debug)]
pub struct ContextSnapshot {
    span: Span,
    values: BTreeMap<String, String>,
    masks: Vec<Regex>,
}

impl ContextSnapshot {
    /// Capture the current span, diagnostic values and masks
    pub fn capture() -> Self {
        Self {
            span: Span::current(),
            values: current(),
            masks: MASKS.with(|masks| masks.borrow().clone()),
        }
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Install this snapshot on the calling thread until the guard drops
    pub fn apply(&self) -> ContextGuard {
        let previous_values =
            DIAGNOSTIC_CONTEXT.with(|ctx| std::mem::replace(&mut *ctx.borrow_mut(), self.values.clone()));
        let previous_masks =
            MASKS.with(|masks| std::mem::replace(&mut *masks.borrow_mut(), self.masks.clone()));
        ContextGuard {
            previous_values: Some(previous_values),
            previous_masks: Some(previous_masks),
            _span: self.span.clone().entered(),
        }
    }
}

/// Restores the diagnostic state that was active before [`ContextSnapshot::apply`]
#[must_use = "the snapshot is undone as soon as the guard is dropped"]
pub struct ContextGuard {
    previous_values: Option<BTreeMap<String, String>>,
    previous_masks: Option<Vec<Regex>>,
    _span: EnteredSpan,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(values) = self.previous_values.take() {
            DIAGNOSTIC_CONTEXT.with(|ctx| *ctx.borrow_mut() = values);
        }
        if let Some(masks) = self.previous_masks.take() {
            MASKS.with(|current| *current.borrow_mut() = masks);
        }
    }
}

impl std::fmt::Debug for ContextGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_snapshot_crosses_thread_explicitly() {
        clear();
        put("request", "r-42");
        add_mask("secret-\\d+").unwrap();
        let snapshot = ContextSnapshot::capture();

        let seen = thread::spawn(move || {
            let inherited = get("request");
            let guard = snapshot.apply();
            let applied = (get("request"), mask("token secret-123 end"));
            drop(guard);
            (inherited, applied, get("request"))
        })
        .join()
        .unwrap();

        assert_eq!(seen.0, None);
        assert_eq!(seen.1 .0.as_deref(), Some("r-42"));
        assert_eq!(seen.1 .1, "token ********** end");
        assert_eq!(seen.2, None);
        clear();
    }

    #[test]
    fn test_guard_restores_previous_values() {
        clear();
        put("stage", "outer");
        let inner = thread::spawn(|| {
            put("stage", "inner");
            ContextSnapshot::capture()
        })
        .join()
        .unwrap();

        {
            let _guard = inner.apply();
            assert_eq!(get("stage").as_deref(), Some("inner"));
        }
        assert_eq!(get("stage").as_deref(), Some("outer"));
        clear();
    }

    #[test]
    fn test_invalid_mask_is_rejected() {
        assert!(add_mask("(unclosed").unwrap_err().is_conversion());
    }
}
