//! Reactive Primitives
//!
//! This module implements the value holders that feed the wire: every
//! synchronized node keeps its state in one of them and forwards their
//! change notifications.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A [`Signal`] is a value-less event source. Observers are called
//! synchronously, in subscription order, on the thread that fires.
//!
//! ## Properties
//!
//! A [`Property`] always holds a value; an [`OptProperty`] may be unset.
//! Setting an equal value is a no-op. Subscribing replays the current
//! value before any later change.
//!
//! ## Triggers
//!
//! A [`Trigger`] is write-once. Rewriting it with an equal value succeeds,
//! with a different value fails. Callers can wait for it to fire.
//!
//! ## Contexts
//!
//! [`ProtocolContexts`] tracks ambient key/value pairs on a thread-local
//! stack so buffered traffic can be replayed under the context it was
//! produced in.

mod signal;
mod context;
mod subscriber;
mod property;
mod opt_property;
mod trigger;

pub use signal::{Observer, Signal};
pub use context::{ContextGuard, ContextKey, ContextSnapshot, ProtocolContexts};
pub use subscriber::{SubscriberId, Subscription};
pub use property::Property;
pub use opt_property::OptProperty;
pub use trigger::{Pump, Trigger, TriggerSet};
