//! Change notification plumbing.
//!
//! The native layer delivers invalidation callbacks on its own threads. Each
//! feature keeps exactly one native subscription while it has at least one
//! host handler and fans the callback out to every handler in registration
//! order. A panicking handler is logged and skipped; it never unwinds into
//! the native caller and never stops its siblings from running.

use super::Feature;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Callable invoked with the feature whose value changed.
///
/// Identity is the allocation: clones of one `ChangeHandler` are the same
/// handler, two handlers built from identical closures are not.
#[derive(Clone)]
pub struct ChangeHandler {
    func: Arc<dyn Fn(&Feature) + Send + Sync>,
}

impl ChangeHandler {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Feature) + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }

    pub(crate) fn call(&self, feature: &Feature) {
        (self.func)(feature)
    }
}

impl PartialEq for ChangeHandler {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.func) as *const (),
            Arc::as_ptr(&other.func) as *const (),
        )
    }
}

impl Eq for ChangeHandler {}

impl fmt::Debug for ChangeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeHandler({:p})", Arc::as_ptr(&self.func) as *const ())
    }
}

/// Ordered handler set guarded by its own lock.
///
/// `add_with` and `remove_with` run their hook under the lock exactly on the
/// empty to non-empty and non-empty to empty edges, so a native subscription
/// tied to those edges can never race with another registration.
pub(crate) struct HandlerList<H> {
    handlers: Mutex<Vec<H>>,
}

impl<H: Clone + PartialEq> HandlerList<H> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<H>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `Ok(false)` when the handler was already present.
    pub fn add_with<E, F>(&self, handler: &H, on_first: F) -> Result<bool, E>
    where
        F: FnOnce() -> Result<(), E>,
    {
        let mut handlers = self.lock();
        if handlers.contains(handler) {
            return Ok(false);
        }
        if handlers.is_empty() {
            on_first()?;
        }
        handlers.push(handler.clone());
        Ok(true)
    }

    /// Returns `Ok(false)` when the handler was not registered. If `on_last`
    /// fails the handler stays registered.
    pub fn remove_with<E, F>(&self, handler: &H, on_last: F) -> Result<bool, E>
    where
        F: FnOnce() -> Result<(), E>,
    {
        let mut handlers = self.lock();
        let Some(pos) = handlers.iter().position(|h| h == handler) else {
            return Ok(false);
        };
        if handlers.len() == 1 {
            on_last()?;
        }
        handlers.remove(pos);
        Ok(true)
    }

    /// Drops every handler. The list is emptied even when `on_clear` fails.
    pub fn clear_with<E, F>(&self, on_clear: F) -> Result<bool, E>
    where
        F: FnOnce() -> Result<(), E>,
    {
        let mut handlers = self.lock();
        if handlers.is_empty() {
            return Ok(false);
        }
        let result = on_clear();
        handlers.clear();
        result.map(|_| true)
    }

    pub fn add(&self, handler: &H) -> bool {
        self.add_with(handler, || Ok::<(), std::convert::Infallible>(()))
            .unwrap_or(false)
    }

    pub fn remove(&self, handler: &H) -> bool {
        self.remove_with(handler, || Ok::<(), std::convert::Infallible>(()))
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn snapshot(&self) -> Vec<H> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

impl<H: Clone + PartialEq> Default for HandlerList<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one user handler, confining a panic to the handler itself.
pub(crate) fn invoke_isolated<F: FnOnce()>(origin: &str, f: F) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        log::error!(
            "Caught panic in change handler of {}: {}",
            origin,
            panic_message(payload.as_ref())
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, PartialEq, Debug)]
    struct Tag(u32);

    #[test]
    fn test_hooks_fire_only_on_edges() {
        let list = HandlerList::new();
        let subscribed = AtomicUsize::new(0);
        let unsubscribed = AtomicUsize::new(0);

        let first = || {
            subscribed.fetch_add(1, Ordering::SeqCst);
            Ok::<(), ()>(())
        };
        assert_eq!(list.add_with(&Tag(1), first), Ok(true));
        assert_eq!(list.add_with(&Tag(1), first), Ok(false));
        assert_eq!(list.add_with(&Tag(2), first), Ok(true));
        assert_eq!(subscribed.load(Ordering::SeqCst), 1);

        let last = || {
            unsubscribed.fetch_add(1, Ordering::SeqCst);
            Ok::<(), ()>(())
        };
        assert_eq!(list.remove_with(&Tag(1), last), Ok(true));
        assert_eq!(unsubscribed.load(Ordering::SeqCst), 0);
        assert_eq!(list.remove_with(&Tag(1), last), Ok(false));
        assert_eq!(list.remove_with(&Tag(2), last), Ok(true));
        assert_eq!(unsubscribed.load(Ordering::SeqCst), 1);
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_failed_subscribe_adds_nothing() {
        let list: HandlerList<Tag> = HandlerList::new();
        assert_eq!(list.add_with(&Tag(1), || Err("native failure")), Err("native failure"));
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_failed_unsubscribe_keeps_handler() {
        let list = HandlerList::new();
        list.add(&Tag(1));
        assert_eq!(list.remove_with(&Tag(1), || Err("busy")), Err("busy"));
        assert_eq!(list.snapshot(), vec![Tag(1)]);
    }

    #[test]
    fn test_clear_empties_even_on_failure() {
        let list = HandlerList::new();
        list.add(&Tag(1));
        list.add(&Tag(2));
        assert_eq!(list.clear_with(|| Err("gone")), Err("gone"));
        assert_eq!(list.len(), 0);
        assert_eq!(list.clear_with(|| Err("gone")), Ok(false));
    }

    #[test]
    fn test_snapshot_preserves_registration_order() {
        let list = HandlerList::new();
        for i in [3, 1, 2] {
            list.add(&Tag(i));
        }
        assert_eq!(list.snapshot(), vec![Tag(3), Tag(1), Tag(2)]);
    }

    #[test]
    fn test_change_handler_identity() {
        let a = ChangeHandler::new(|_| {});
        let b = ChangeHandler::new(|_| {});
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_invoke_isolated_swallows_panics() {
        let ran_after = AtomicUsize::new(0);
        invoke_isolated("test", || panic!("handler blew up"));
        invoke_isolated("test", || {
            ran_after.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran_after.load(Ordering::SeqCst), 1);
    }
}
