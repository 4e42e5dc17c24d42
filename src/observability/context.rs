//! Per-request ambient log properties
//!
//! Each request runs inside [`AmbientContext::scope`], which installs a
//! task-local property stack. Pushes return a guard; dropping the guard
//! removes exactly the entry it pushed, on every exit path including
//! cancellation of the request future.

use std::cell::RefCell;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::redaction::RedactedValue;

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
struct Entry {
    id: u64,
    name: String,
    value: RedactedValue,
}

tokio::task_local! {
    static AMBIENT: RefCell<Vec<Entry>>;
}

/// Access point for the ambient property stack of the current task
pub struct AmbientContext;

impl AmbientContext {
    /// Run `fut` with its own property stack
    ///
    /// The new stack starts as a copy of the caller's stack when one is
    /// active, so wrapping a spawned future keeps the request's properties.
    pub fn scope<F: Future>(fut: F) -> impl Future<Output = F::Output> {
        let inherited = AMBIENT
            .try_with(|stack| stack.borrow().clone())
            .unwrap_or_default();
        AMBIENT.scope(RefCell::new(inherited), fut)
    }

    /// Synchronous counterpart of [`AmbientContext::scope`]
    pub fn sync_scope<R>(f: impl FnOnce() -> R) -> R {
        let inherited = AMBIENT
            .try_with(|stack| stack.borrow().clone())
            .unwrap_or_default();
        AMBIENT.sync_scope(RefCell::new(inherited), f)
    }

    pub fn is_active() -> bool {
        AMBIENT.try_with(|_| ()).is_ok()
    }

    /// Push a property; `None` when no scope is active for this task
    #[must_use = "the property is removed when the guard is dropped"]
    pub fn push(name: impl Into<String>, value: impl Into<RedactedValue>) -> Option<PropertyGuard> {
        let id = NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            id,
            name: name.into(),
            value: value.into(),
        };

        AMBIENT
            .try_with(|stack| stack.borrow_mut().push(entry))
            .ok()
            .map(|_| PropertyGuard { id })
    }

    /// Current properties, outermost first
    pub fn snapshot() -> Vec<(String, RedactedValue)> {
        AMBIENT
            .try_with(|stack| {
                stack
                    .borrow()
                    .iter()
                    .map(|entry| (entry.name.clone(), entry.value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Innermost value pushed under `name`
    pub fn get(name: &str) -> Option<RedactedValue> {
        AMBIENT
            .try_with(|stack| {
                stack
                    .borrow()
                    .iter()
                    .rev()
                    .find(|entry| entry.name == name)
                    .map(|entry| entry.value.clone())
            })
            .ok()
            .flatten()
    }
}

/// Removes its property from the ambient stack when dropped
#[derive(Debug)]
pub struct PropertyGuard {
    id: u64,
}

impl Drop for PropertyGuard {
    fn drop(&mut self) {
        let _ = AMBIENT.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(index) = stack.iter().rposition(|entry| entry.id == self.id) {
                stack.remove(index);
            }
        });
    }
}
