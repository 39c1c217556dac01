//! Scopes
//!
//! A [`Scope`] is a cancellable ownership boundary. Bindings, wire
//! receivers and subscriptions register termination callbacks on the scope
//! they live in and are released when it terminates.
//!
//! # Termination
//!
//! Terminating a scope:
//!
//! 1. flips the cancelled flag so new work can be rejected,
//! 2. runs every registered callback once, in registration order,
//! 3. terminates nested scopes as part of that sequence (a nested scope
//!    is just another callback registered at creation time).
//!
//! Each callback runs under `catch_unwind`. A panicking callback is logged
//! and the remaining callbacks still run.
//!
//! Callbacks registered on an already terminated scope run immediately on
//! the registering thread.

use std::fmt;
use std::ops::AddAssign;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error};

type Callback = Box<dyn FnOnce() + Send>;

static SCOPE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Key returned when registering a termination callback, used to
/// deregister it before the scope ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TerminationKey(u64);

struct ScopeInner {
    id: u64,
    cancelled: AtomicBool,
    next_key: AtomicU64,
    callbacks: Mutex<Vec<(TerminationKey, Callback)>>,
}

/// A hierarchical, cancellable execution scope.
///
/// Cloning a `Scope` produces another handle to the same scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Create a new, live, top-level scope.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: SCOPE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
                cancelled: AtomicBool::new(false),
                next_key: AtomicU64::new(0),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a scope nested in this one.
    ///
    /// The child terminates when the parent does, or earlier on its own.
    /// A child created under a terminated parent starts terminated.
    pub fn child(&self) -> Scope {
        let child = Scope::new();
        let child_for_parent = child.clone();
        let key = self.on_termination(move || child_for_parent.terminate());

        // Forget the parent's callback once the child is gone so long-lived
        // parents do not accumulate dead children.
        let parent: Weak<ScopeInner> = Arc::downgrade(&self.inner);
        child.on_termination(move || {
            if let Some(parent) = parent.upgrade() {
                Scope { inner: parent }.remove_termination(key);
            }
        });
        child
    }

    /// Whether the scope has started terminating.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    pub fn is_alive(&self) -> bool {
        !self.is_cancelled()
    }

    /// Register a callback to run when the scope terminates.
    ///
    /// If the scope is already terminated the callback runs now.
    pub fn on_termination<F>(&self, callback: F) -> TerminationKey
    where
        F: FnOnce() + Send + 'static,
    {
        let key = TerminationKey(self.inner.next_key.fetch_add(1, Ordering::Relaxed));
        {
            let mut callbacks = self.inner.callbacks.lock();
            if !self.is_cancelled() {
                callbacks.push((key, Box::new(callback)));
                return key;
            }
        }
        run_isolated(self.inner.id, Box::new(callback));
        key
    }

    /// Deregister a callback that has not run yet.
    pub fn remove_termination(&self, key: TerminationKey) {
        self.inner.callbacks.lock().retain(|(k, _)| *k != key);
    }

    /// Terminate the scope, running callbacks in registration order.
    ///
    /// Idempotent: only the first call runs callbacks.
    pub fn terminate(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(scope = self.inner.id, "terminating scope");

        // Callbacks may register more callbacks (which run immediately since
        // the flag is set) or touch other scopes; never hold the lock here.
        let callbacks = std::mem::take(&mut *self.inner.callbacks.lock());
        for (_, callback) in callbacks {
            run_isolated(self.inner.id, callback);
        }
    }
}

fn run_isolated(scope_id: u64, callback: Callback) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "<non-string panic>".to_string());
        error!(scope = scope_id, %message, "termination callback panicked");
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> AddAssign<F> for Scope
where
    F: FnOnce() + Send + 'static,
{
    fn add_assign(&mut self, callback: F) {
        self.on_termination(callback);
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("cancelled", &self.is_cancelled())
            .field("callbacks", &self.inner.callbacks.lock().len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
