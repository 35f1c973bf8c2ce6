//! Copy-on-write listener lists and the close-once bookkeeping shared by
//! every connection type.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::MessageListener;

/// A list of listeners that is cheap to iterate while others register.
///
/// Readers take a snapshot (`Arc` clone) and iterate it without holding
/// the lock, so a listener may register another listener from inside a
/// callback without deadlocking. Writers replace the whole list.
pub(crate) struct ListenerSet<L: ?Sized> {
    inner: RwLock<Arc<Vec<Arc<L>>>>,
}

impl<L: ?Sized> ListenerSet<L> {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub(crate) fn add(&self, listener: Arc<L>) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::clone(&**guard);
        next.push(listener);
        *guard = Arc::new(next);
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<L>>> {
        Arc::clone(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Listener list plus the closed flag of one connection.
///
/// Guarantees that every listener sees `on_close` exactly once, including
/// listeners that register after the connection has already closed.
pub(crate) struct Listeners {
    closed: AtomicBool,
    set: RwLock<Option<Arc<Vec<Arc<dyn MessageListener>>>>>,
}

impl Listeners {
    pub(crate) fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            set: RwLock::new(Some(Arc::new(Vec::new()))),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn add(&self, listener: Arc<dyn MessageListener>) {
        let mut guard = self.set.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = guard.as_mut() {
            let mut next = Vec::clone(&**list);
            next.push(listener);
            *list = Arc::new(next);
            return;
        }
        // Already closed and drained: tell the newcomer right away.
        drop(guard);
        listener.on_close();
    }

    /// Hands `message` to every listener registered so far.
    pub(crate) fn deliver(&self, message: &str) {
        let snapshot = {
            let guard = self.set.read().unwrap_or_else(PoisonError::into_inner);
            match guard.as_ref() {
                Some(list) => Arc::clone(list),
                None => return,
            }
        };
        for listener in snapshot.iter() {
            listener.on_message(message);
        }
    }

    /// Marks the connection closed. Returns `true` only for the first
    /// caller, who is then responsible for [`notify_closed`](Self::notify_closed).
    pub(crate) fn begin_close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Drains the list and calls `on_close` on each listener.
    pub(crate) fn notify_closed(&self) {
        let drained = self
            .set
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        for listener in drained.iter().flat_map(|list| list.iter()) {
            listener.on_close();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.set
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |list| list.len())
    }
}
