//! Ambient Protocol Contexts
//!
//! Context values are key/value pairs that are "in effect" while some code
//! runs, for example the id of the user action that caused a change. A
//! wire can read them at send time.
//!
//! # Implementation
//!
//! We use a thread-local stack. [`ContextKey::push`] appends an entry and
//! returns a guard; dropping the guard truncates the stack back to where
//! it was. The current value of a key is the topmost entry for it.
//!
//! A [`ProtocolContexts`] registry lists the keys one protocol cares
//! about. [`ProtocolContexts::snapshot`] captures their current values so
//! the extension wire can re-apply them when it replays a buffered
//! message later, possibly on another thread.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::RwLock;
use smallvec::SmallVec;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the context stack. `None` masks an outer value.
#[derive(Debug, Clone)]
struct ContextEntry {
    key: Arc<str>,
    value: Option<String>,
}

/// Name of an ambient context value.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContextKey(Arc<str>);

impl ContextKey {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Current value of this key on the calling thread.
    pub fn current(&self) -> Option<String> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .rev()
                .find(|entry| entry.key == self.0)
                .and_then(|entry| entry.value.clone())
        })
    }

    /// Make `value` current until the returned guard is dropped.
    pub fn push(&self, value: Option<String>) -> ContextGuard {
        let depth = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let depth = stack.len();
            stack.push(ContextEntry {
                key: self.0.clone(),
                value,
            });
            depth
        });
        ContextGuard { depth }
    }
}

impl fmt::Debug for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextKey({})", self.0)
    }
}

/// Guard that restores the context stack when dropped.
///
/// Truncating by depth keeps the stack consistent even if guards are
/// dropped out of order.
#[must_use = "the context is popped as soon as the guard is dropped"]
pub struct ContextGuard {
    depth: usize,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().truncate(self.depth));
    }
}

/// Captured values of every registered key at one point in time.
#[derive(Debug, Clone, Default)]
pub struct ContextSnapshot {
    values: SmallVec<[(ContextKey, Option<String>); 4]>,
}

impl ContextSnapshot {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, key: &ContextKey) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Push every captured value; they stay current until the guard drops.
    pub fn apply(&self) -> ContextGuard {
        let depth = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let depth = stack.len();
            stack.extend(self.values.iter().map(|(key, value)| ContextEntry {
                key: key.0.clone(),
                value: value.clone(),
            }));
            depth
        });
        ContextGuard { depth }
    }
}

/// The set of context keys a protocol propagates.
#[derive(Debug, Default)]
pub struct ProtocolContexts {
    keys: RwLock<IndexSet<ContextKey>>,
}

impl ProtocolContexts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key. Registering twice is a no-op.
    pub fn register(&self, key: ContextKey) {
        self.keys.write().insert(key);
    }

    pub fn registered(&self) -> Vec<ContextKey> {
        self.keys.read().iter().cloned().collect()
    }

    /// Capture the current value of every registered key.
    pub fn snapshot(&self) -> ContextSnapshot {
        let keys = self.keys.read();
        ContextSnapshot {
            values: keys.iter().map(|key| (key.clone(), key.current())).collect(),
        }
    }
}
