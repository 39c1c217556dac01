//! Signal Implementation
//!
//! A Signal is the value-less reactive primitive: an ordered list of
//! observers that [`Signal::fire`] invokes synchronously. Properties,
//! optional properties and triggers all compose a signal as their change
//! stream.
//!
//! # Ordering
//!
//! Observers are kept in an `IndexMap` keyed by [`SubscriberId`], so they
//! are called in subscription order and removing one keeps the order of
//! the rest.
//!
//! # Re-entrancy
//!
//! `fire` snapshots the observer list before calling anything, so an
//! observer may subscribe or unsubscribe (itself or others) while a fire
//! is in progress. Changes take effect from the next fire.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::subscriber::{SubscriberId, Subscription};
use crate::lifetime::Scope;

/// Counter for generating unique signal IDs.
static SIGNAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique signal ID.
fn next_signal_id() -> u64 {
    SIGNAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Shared observer callback.
pub type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct SignalInner<T> {
    id: u64,
    observers: RwLock<IndexMap<SubscriberId, Observer<T>>>,
}

impl<T> SignalInner<T> {
    fn remove(&self, id: SubscriberId) {
        self.observers.write().shift_remove(&id);
    }
}

/// An event source delivering values of type `T` to its observers.
///
/// # Example
///
/// ```rust
/// use rdlink_core::reactive::Signal;
///
/// let clicks = Signal::<u32>::new();
/// let subscription = clicks.subscribe(|n| println!("clicked {n} times"));
/// clicks.fire(&1);
/// subscription.unsubscribe();
/// ```
pub struct Signal<T> {
    inner: Arc<SignalInner<T>>,
}

impl<T> Signal<T>
where
    T: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                id: next_signal_id(),
                observers: RwLock::new(IndexMap::new()),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Deliver `value` to every observer, in subscription order.
    pub fn fire(&self, value: &T) {
        let observers: Vec<Observer<T>> = self.inner.observers.read().values().cloned().collect();
        for observer in observers {
            observer(value);
        }
    }

    /// Register an observer. Dropping the returned handle removes it.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe_observer(Arc::new(observer))
    }

    pub(crate) fn subscribe_observer(&self, observer: Observer<T>) -> Subscription {
        let id = SubscriberId::next();
        self.inner.observers.write().insert(id, observer);

        let weak: Weak<SignalInner<T>> = Arc::downgrade(&self.inner);
        Subscription::new(id, move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove(id);
            }
        })
    }

    /// Register an observer for as long as `scope` lives.
    ///
    /// Does nothing if the scope is already terminated.
    pub fn advise<F>(&self, scope: &Scope, observer: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        if scope.is_cancelled() {
            return;
        }
        let subscription = self.subscribe(observer);
        scope.on_termination(move || subscription.unsubscribe());
    }

    /// Get the number of observers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.observers.read().len()
    }
}

impl<T> Default for Signal<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("subscriber_count", &self.inner.observers.read().len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
