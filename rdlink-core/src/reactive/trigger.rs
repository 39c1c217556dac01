//! Trigger: a write-once reactive holder.
//!
//! A trigger is an [`OptProperty`] that may be set only once. Setting it
//! again to an equal value is harmless and reported as
//! [`TriggerSet::AlreadySet`]; setting it to a different value fails with
//! [`RdError::TriggerConflict`] and leaves the stored value alone.
//!
//! # Waiting
//!
//! [`Trigger::wait`] is the only blocking operation in the crate. It
//! returns when a value is present, the timeout elapses, or the scope is
//! cancelled. Without a pump it parks on a condition variable. With a
//! [`Pump`] it blocks in short slices and drives the pump between them,
//! which lets a single-threaded host keep processing its own queue (and
//! eventually set the trigger) while someone waits on it.
//!
//! [`Trigger::wait_async`] provides the same contract for tokio hosts.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use super::opt_property::OptProperty;
use super::subscriber::Subscription;
use crate::error::{RdError, Result};
use crate::lifetime::Scope;

/// Outcome of a successful [`Trigger::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSet {
    /// The trigger was unset and now holds the value.
    Fired,
    /// The trigger already held an equal value; nothing changed.
    AlreadySet,
}

/// A step a cooperative host runs while a [`Trigger::wait`] blocks.
pub trait Pump {
    /// Process pending work. Called between wait slices, never from inside
    /// a notification.
    fn pump(&self);

    /// Length of one wait slice.
    fn pause(&self) -> Duration {
        Duration::from_millis(10)
    }
}

/// One-shot latch used by the blocking wait.
struct Latch {
    released: Mutex<bool>,
    condvar: Condvar,
}

impl Latch {
    fn new() -> Self {
        Self {
            released: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn release(&self) {
        *self.released.lock() = true;
        self.condvar.notify_all();
    }

    fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut released = self.released.lock();
        while !*released {
            if self.condvar.wait_until(&mut released, deadline).timed_out() {
                return *released;
            }
        }
        true
    }
}

/// A write-once reactive holder.
pub struct Trigger<T> {
    property: OptProperty<T>,
}

impl<T> Trigger<T>
where
    T: Clone + PartialEq + Debug + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            property: OptProperty::new(),
        }
    }

    pub fn has_value(&self) -> bool {
        self.property.has_value()
    }

    pub fn value_or_none(&self) -> Option<T> {
        self.property.value_or_none()
    }

    /// Set the trigger.
    pub fn set(&self, value: T) -> Result<TriggerSet> {
        let _dispatch = self.property.lock_dispatch();
        match self.property.value_or_none() {
            Some(existing) if existing == value => Ok(TriggerSet::AlreadySet),
            Some(existing) => Err(RdError::TriggerConflict {
                existing: format!("{existing:?}"),
                attempted: format!("{value:?}"),
            }),
            None => {
                self.property.set(value);
                Ok(TriggerSet::Fired)
            }
        }
    }

    /// Register an observer; replays the value if the trigger already fired.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.property.subscribe(observer)
    }

    pub fn advise<F>(&self, scope: &Scope, observer: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.property.advise(scope, observer);
    }

    /// Block until the trigger holds a value, `timeout` elapses, or `scope`
    /// is cancelled. Returns whether a value is present.
    pub fn wait(&self, scope: &Scope, timeout: Duration, pump: Option<&dyn Pump>) -> bool {
        if scope.is_cancelled() {
            return false;
        }
        if self.has_value() {
            return true;
        }

        let latch = Arc::new(Latch::new());
        let wait_scope = scope.child();
        {
            let latch = latch.clone();
            wait_scope.on_termination(move || latch.release());
        }
        {
            let latch = latch.clone();
            self.advise(&wait_scope, move |_| latch.release());
        }

        let present = match pump {
            None => latch.wait_for(timeout) && self.has_value(),
            Some(pump) => {
                let deadline = Instant::now() + timeout;
                loop {
                    let now = Instant::now();
                    if now >= deadline || scope.is_cancelled() {
                        break self.has_value();
                    }
                    pump.pump();
                    let slice = pump.pause().min(deadline.saturating_duration_since(Instant::now()));
                    if latch.wait_for(slice) && self.has_value() {
                        break true;
                    }
                }
            }
        };

        wait_scope.terminate();
        present
    }

    /// Async flavour of [`Trigger::wait`].
    pub async fn wait_async(&self, scope: &Scope, timeout: Duration) -> bool {
        if scope.is_cancelled() {
            return false;
        }
        if self.has_value() {
            return true;
        }

        let notify = Arc::new(Notify::new());
        let wait_scope = scope.child();
        {
            let notify = notify.clone();
            wait_scope.on_termination(move || notify.notify_one());
        }
        {
            let notify = notify.clone();
            self.advise(&wait_scope, move |_| notify.notify_one());
        }

        let woke = tokio::time::timeout(timeout, notify.notified()).await.is_ok();
        let present = woke && self.has_value();
        wait_scope.terminate();
        present
    }
}

impl<T> Default for Trigger<T>
where
    T: Clone + PartialEq + Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Trigger<T> {
    fn clone(&self) -> Self {
        Self {
            property: self.property.clone(),
        }
    }
}

impl<T: Debug> Debug for Trigger<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Trigger").field(&self.property).finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
