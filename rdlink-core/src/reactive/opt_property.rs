//! Optional property: a reactive holder that may be unset.
//!
//! `value_or_none` tells "never set" (`None`) apart from "set to the
//! default value" (`Some(default)`). Equality suppression only applies
//! once a value exists, so the first `set` always notifies, even with
//! `T::default()`.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};

use super::signal::{Observer, Signal};
use super::subscriber::Subscription;
use crate::lifetime::Scope;

struct OptInner<T> {
    value: RwLock<Option<T>>,
    change: Signal<T>,
    dispatch: ReentrantMutex<()>,
}

/// A reactive value holder that starts unset.
pub struct OptProperty<T> {
    inner: Arc<OptInner<T>>,
}

impl<T> OptProperty<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(OptInner {
                value: RwLock::new(None),
                change: Signal::new(),
                dispatch: ReentrantMutex::new(()),
            }),
        }
    }

    pub fn with_value(value: T) -> Self {
        let property = Self::new();
        *property.inner.value.write() = Some(value);
        property
    }

    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }

    /// The current value, or `None` if it was never set.
    pub fn value_or_none(&self) -> Option<T> {
        self.inner.value.read().clone()
    }

    /// Set the value; notifies unless it equals the existing value.
    pub fn set(&self, value: T) -> bool {
        let _dispatch = self.inner.dispatch.lock();
        {
            let mut current = self.inner.value.write();
            if current.as_ref() == Some(&value) {
                return false;
            }
            *current = Some(value.clone());
        }
        self.inner.change.fire(&value);
        true
    }

    /// Register an observer; replays the current value if there is one.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let observer: Observer<T> = Arc::new(observer);
        let _dispatch = self.inner.dispatch.lock();
        if let Some(current) = self.value_or_none() {
            observer(&current);
        }
        self.inner.change.subscribe_observer(observer)
    }

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

    pub fn change(&self) -> &Signal<T> {
        &self.inner.change
    }

    /// Hold the dispatch lock so a check-then-set sequence is atomic with
    /// respect to other writers.
    pub(crate) fn lock_dispatch(&self) -> ReentrantMutexGuard<'_, ()> {
        self.inner.dispatch.lock()
    }
}

impl<T> Clone for OptProperty<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for OptProperty<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for OptProperty<T>
where
    T: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptProperty")
            .field("value", &*self.inner.value.read())
            .finish()
    }
}
