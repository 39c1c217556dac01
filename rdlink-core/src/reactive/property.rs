//! Property Implementation
//!
//! A [`Property`] always holds a value. Setting an equal value is a no-op;
//! setting a different one stores it and then fires the change signal on
//! the calling thread.
//!
//! # Thread Safety
//!
//! The value sits behind an `RwLock`. Updates and their notifications are
//! serialized by a re-entrant dispatch lock, so observers of one property
//! never see interleaved notifications from two threads, while an observer
//! may still set the property it is observing.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};

use super::signal::{Observer, Signal};
use super::subscriber::Subscription;
use crate::lifetime::Scope;

struct PropertyInner<T> {
    value: RwLock<T>,
    change: Signal<T>,
    dispatch: ReentrantMutex<()>,
}

/// A reactive value holder that always has a value.
///
/// # Example
///
/// ```rust
/// use rdlink_core::reactive::Property;
///
/// let count = Property::new(0);
/// let subscription = count.subscribe(|v| println!("count = {v}"));
/// count.set(5); // prints "count = 5"
/// count.set(5); // no-op
/// drop(subscription);
/// ```
pub struct Property<T> {
    inner: Arc<PropertyInner<T>>,
}

impl<T> Property<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new property with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(PropertyInner {
                value: RwLock::new(value),
                change: Signal::new(),
                dispatch: ReentrantMutex::new(()),
            }),
        }
    }

    /// Get the current value.
    pub fn get(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Set a new value and notify observers if it differs from the current one.
    ///
    /// Returns whether the value changed.
    pub fn set(&self, value: T) -> bool {
        let _dispatch = self.inner.dispatch.lock();
        {
            let mut current = self.inner.value.write();
            if *current == value {
                return false;
            }
            *current = value.clone();
        }
        self.inner.change.fire(&value);
        true
    }

    /// Update the value using a function of the current one.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&T) -> T,
    {
        let _dispatch = self.inner.dispatch.lock();
        let new_value = f(&self.inner.value.read());
        self.set(new_value)
    }

    /// Register an observer. It receives the current value immediately,
    /// then every later change.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let observer: Observer<T> = Arc::new(observer);
        let _dispatch = self.inner.dispatch.lock();
        observer(&self.get());
        self.inner.change.subscribe_observer(observer)
    }

    /// Like [`Property::subscribe`], bounded by `scope`.
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

    /// Change stream without replay of the current value.
    pub fn change(&self) -> &Signal<T> {
        &self.inner.change
    }
}

impl Property<bool> {
    /// Run `action` every time the property becomes `true`, including now
    /// if it already is.
    pub fn when_true<F>(&self, scope: &Scope, action: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.advise(scope, move |value| {
            if *value {
                action();
            }
        });
    }
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Property<T>
where
    T: Clone + PartialEq + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Debug for Property<T>
where
    T: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("value", &*self.inner.value.read())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
