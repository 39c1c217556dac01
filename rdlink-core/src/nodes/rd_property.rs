//! Synchronized property.
//!
//! [`RdProperty<T>`] mirrors a [`Property<T>`] on both sides. Local changes
//! made after bind are written to the wire as `[value]`, or as an interned
//! field when the property has an intern key. A value set before bind is
//! sent when the property binds.
//!
//! Values from the counterpart are applied through the protocol's
//! scheduler. Only [`RdProperty::set`] sends, so applying a remote value
//! never sends it back.
//!
//! The send happens after the holder has notified its observers and
//! released its dispatch lock. An in-process wire applies the value on the
//! counterpart from the sending thread, so sending under that lock would let
//! two threads setting the two halves wait on each other. A per-node
//! `send_order` lock keeps local set-and-send pairs in order instead.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{ReentrantMutex, RwLock};
use tracing::{debug, trace, warn};

use super::{Bindable, Member, NodeBinding};
use crate::error::{RdError, Result};
use crate::graph::RdId;
use crate::lifetime::Scope;
use crate::protocol::Protocol;
use crate::reactive::{Property, Signal};
use crate::serialization::Marshaller;
use crate::wire::{Reader, WireExt, WireReceiver};

struct PropertyNode<T> {
    this: Weak<PropertyNode<T>>,
    value: Property<T>,
    marshaller: Arc<dyn Marshaller<T>>,
    intern_key: Option<String>,
    binding: RwLock<Option<NodeBinding>>,
    /// Held from a local change until its value is on the wire.
    send_order: ReentrantMutex<()>,
    /// Changed locally while unbound.
    dirty: AtomicBool,
}

impl<T> PropertyNode<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn set_local(&self, value: T) -> bool {
        let _order = self.send_order.lock();
        let outgoing = value.clone();
        if !self.value.set(value) {
            return false;
        }
        let binding = self.binding.read().clone();
        match binding {
            Some(binding) => self.send(&binding, &outgoing),
            None => self.dirty.store(true, Ordering::Release),
        }
        true
    }

    fn send(&self, binding: &NodeBinding, value: &T) {
        let ctx = binding.proto.serialization_ctx();
        let result = binding.proto.wire().send_with(binding.id, |writer| match &self.intern_key {
            Some(key) => ctx.write_interned(writer, value, key, &*self.marshaller),
            None => self.marshaller.write(ctx, writer, value),
        });
        if let Err(err) = result {
            warn!(id = %binding.id, %err, "failed to send property value");
        }
    }

    fn apply_remote(&self, value: T) {
        self.value.set(value);
    }
}

impl<T> Bindable for PropertyNode<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn bind(&self, scope: &Scope, proto: &Arc<Protocol>, id: RdId) -> Result<()> {
        if scope.is_cancelled() {
            return Err(RdError::ScopeTerminated);
        }
        let Some(this) = self.this.upgrade() else {
            return Err(RdError::ScopeTerminated);
        };

        let _order = self.send_order.lock();
        let binding = NodeBinding {
            proto: proto.clone(),
            id,
        };
        *self.binding.write() = Some(binding.clone());
        proto.wire().advise(scope, id, this);
        debug!(location = %proto.location(), %id, "bound property");

        let weak = self.this.clone();
        scope.on_termination(move || {
            if let Some(node) = weak.upgrade() {
                *node.binding.write() = None;
            }
        });

        if self.dirty.swap(false, Ordering::AcqRel) {
            self.send(&binding, &self.value.get());
        }
        Ok(())
    }

    fn rd_id(&self) -> RdId {
        self.binding.read().as_ref().map(|b| b.id).unwrap_or(RdId::NULL)
    }
}

impl<T> WireReceiver for PropertyNode<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn on_wire_received(&self, reader: &mut Reader<'_>) -> Result<()> {
        let binding = self.binding.read().clone();
        let Some(binding) = binding else {
            return Ok(());
        };
        let ctx = binding.proto.serialization_ctx();
        let value = match &self.intern_key {
            Some(key) => ctx.read_interned(reader, key, &*self.marshaller)?,
            None => self.marshaller.read(ctx, reader)?,
        };
        trace!(id = %binding.id, "received property value");

        let weak = self.this.clone();
        binding.proto.scheduler().queue(Box::new(move || {
            if let Some(node) = weak.upgrade() {
                node.apply_remote(value);
            }
        }));
        Ok(())
    }
}

/// A property synchronized with the counterpart.
pub struct RdProperty<T> {
    inner: Arc<PropertyNode<T>>,
}

impl<T> RdProperty<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(value: T, marshaller: Arc<dyn Marshaller<T>>) -> Self {
        Self::build(value, marshaller, None)
    }

    /// A property whose value is written as an interned field of the root
    /// registered under `intern_key`.
    pub fn interned(value: T, marshaller: Arc<dyn Marshaller<T>>, intern_key: impl Into<String>) -> Self {
        Self::build(value, marshaller, Some(intern_key.into()))
    }

    fn build(value: T, marshaller: Arc<dyn Marshaller<T>>, intern_key: Option<String>) -> Self {
        let inner = Arc::new_cyclic(|this| PropertyNode {
            this: this.clone(),
            value: Property::new(value),
            marshaller,
            intern_key,
            binding: RwLock::new(None),
            send_order: ReentrantMutex::new(()),
            dirty: AtomicBool::new(false),
        });
        Self { inner }
    }

    pub fn get(&self) -> T {
        self.inner.value.get()
    }

    /// Set the value locally; sends it when bound and changed.
    pub fn set(&self, value: T) -> bool {
        self.inner.set_local(value)
    }

    /// Fires on every change, local or remote, without replaying the
    /// current value.
    pub fn change(&self) -> &Signal<T> {
        self.inner.value.change()
    }

    pub fn advise<F>(&self, scope: &Scope, observer: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.value.advise(scope, observer);
    }

    pub fn is_bound(&self) -> bool {
        self.inner.binding.read().is_some()
    }

    pub fn rd_id(&self) -> RdId {
        self.inner.rd_id()
    }

    pub fn member(&self) -> Member {
        Member::Property(self.inner.clone())
    }
}

impl<T> Clone for RdProperty<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for RdProperty<T>
where
    T: Clone + PartialEq + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdProperty")
            .field("id", &self.rd_id())
            .field("value", &self.get())
            .field("intern_key", &self.inner.intern_key)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolConfig;
    use parking_lot::Mutex;

    use crate::graph::ManualScheduler;
    use crate::serialization::Builtin;
    use crate::wire::MemoryWire;

    struct Pair {
        client: Arc<Protocol>,
        server: Arc<Protocol>,
        client_wire: MemoryWire,
        server_wire: MemoryWire,
    }

    fn pair() -> Pair {
        let (client_wire, server_wire) = MemoryWire::pair();
        let scope = Scope::new();
        Pair {
            client: Protocol::new(ProtocolConfig::client("client"), Arc::new(client_wire.clone()), scope.clone()),
            server: Protocol::new(ProtocolConfig::server("server"), Arc::new(server_wire.clone()), scope),
            client_wire,
            server_wire,
        }
    }

    fn int_property(value: i32) -> RdProperty<i32> {
        RdProperty::new(value, Arc::new(Builtin))
    }

    #[test]
    fn changes_propagate_both_ways() {
        let p = pair();
        let on_client = int_property(0);
        let on_server = int_property(0);
        p.client.bind_static("count", &on_client.member()).unwrap();
        p.server.bind_static("count", &on_server.member()).unwrap();
        assert_eq!(on_client.rd_id(), RdId::NULL.mix("count"));

        on_client.set(5);
        assert_eq!(on_server.get(), 5);

        on_server.set(7);
        assert_eq!(on_client.get(), 7);
    }

    #[test]
    fn remote_value_is_not_echoed() {
        let p = pair();
        let on_client = int_property(0);
        let on_server = int_property(0);
        p.client.bind_static("count", &on_client.member()).unwrap();
        p.server.bind_static("count", &on_server.member()).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        on_server.advise(&Scope::new(), move |v| seen_clone.lock().push(*v));

        on_client.set(3);
        assert_eq!(p.client_wire.messages_written(), 1);
        assert_eq!(p.server_wire.messages_written(), 0);
        assert_eq!(*seen.lock(), vec![0, 3]);
    }

    #[test]
    fn value_set_before_bind_is_sent_on_bind() {
        let p = pair();
        let on_client = int_property(0);
        let on_server = int_property(0);
        p.server.bind_static("count", &on_server.member()).unwrap();

        on_client.set(9);
        assert_eq!(on_server.get(), 0);

        p.client.bind_static("count", &on_client.member()).unwrap();
        assert_eq!(on_server.get(), 9);
    }

    #[test]
    fn remote_values_wait_for_scheduler() {
        let (client_wire, server_wire) = MemoryWire::pair();
        let scheduler = Arc::new(ManualScheduler::default());
        let scope = Scope::new();
        let client = Protocol::new(ProtocolConfig::client("client"), Arc::new(client_wire), scope.clone());
        let server = Protocol::with_scheduler(
            ProtocolConfig::server("server"),
            Arc::new(server_wire),
            scope,
            scheduler.clone(),
        );
        let on_client = int_property(0);
        let on_server = int_property(0);
        client.bind_static("count", &on_client.member()).unwrap();
        server.bind_static("count", &on_server.member()).unwrap();

        on_client.set(1);
        on_client.set(2);
        assert_eq!(on_server.get(), 0);

        assert_eq!(scheduler.run_pending(), 2);
        assert_eq!(on_server.get(), 2);
    }

    #[test]
    fn unbinds_with_scope() {
        let (client_wire, server_wire) = MemoryWire::pair();
        let client_scope = Scope::new();
        let client = Protocol::new(ProtocolConfig::client("c"), Arc::new(client_wire.clone()), client_scope.clone());
        let server = Protocol::new(ProtocolConfig::server("s"), Arc::new(server_wire), Scope::new());
        let on_client = int_property(0);
        let on_server = int_property(0);
        client.bind_static("count", &on_client.member()).unwrap();
        server.bind_static("count", &on_server.member()).unwrap();

        client_scope.terminate();
        assert!(!on_client.is_bound());
        on_client.set(4);
        assert_eq!(client_wire.messages_written(), 0);
        assert_eq!(on_server.get(), 0);
    }
}
