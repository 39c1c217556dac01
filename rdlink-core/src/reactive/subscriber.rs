//! Subscriber types for the reactive system.
//!
//! Every observer registered on a [`Signal`](super::Signal) gets a
//! [`SubscriberId`]. The returned [`Subscription`] removes the observer
//! again when dropped.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SUBSCRIBER: AtomicU64 = AtomicU64::new(1);

/// Key of an observer in a signal's ordered observer map. Removing one
/// observer never reorders the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Process-wide, increasing.
    pub(crate) fn next() -> Self {
        Self(NEXT_SUBSCRIBER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Handle to a registered observer.
///
/// Dropping the handle unsubscribes the observer. Use
/// [`Subscription::detach`] to keep the observer for the lifetime of the
/// source instead.
#[must_use = "dropping a Subscription unsubscribes the observer"]
pub struct Subscription {
    id: SubscriberId,
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn new<F>(id: SubscriberId, unsubscribe: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            id,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Remove the observer now.
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }

    /// Keep the observer registered for as long as the source lives.
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}
