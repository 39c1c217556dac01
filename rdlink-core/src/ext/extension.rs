//! Extensions
//!
//! An [`RdExtension`] is a subtree of the object graph with its own
//! handshake. Many extensions share one wire; each one holds back its
//! children's traffic until both halves know about each other.
//!
//! # Binding
//!
//! Binding an extension under a protocol:
//!
//! 1. opens a child scope for the subtree,
//! 2. creates an [`ExtWire`] and a child [`Protocol`] around it, with a
//!    serialization context that adds the extension's intern roots,
//! 3. advises the handshake receiver on the real wire,
//! 4. binds the intern roots and the declared members,
//! 5. sends `Ready` as soon as the link is up.
//!
//! Children are bound before `Ready` goes out, so anything the
//! counterpart sends in response finds its receiver.
//!
//! # Handshake
//!
//! | received              | reaction                                   |
//! |-----------------------|--------------------------------------------|
//! | `Ready`               | reply `ReceivedCounterpart`, connected     |
//! | `ReceivedCounterpart` | connected                                  |
//! | `Disconnected`        | not connected                              |
//! | anything else         | terminate the subtree                      |
//!
//! Each handshake message also carries the sender's serialization hash.
//! A mismatch is recorded in the protocol's out-of-sync set.
//!
//! When the link drops the extension counts as disconnected and buffers;
//! when it comes back `Ready` is sent again. Terminating the subtree
//! sends `Disconnected`.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::{debug, error, trace};

use super::{ExtState, ExtWire};
use crate::error::{RdError, Result};
use crate::graph::RdId;
use crate::intern::InternRoot;
use crate::lifetime::Scope;
use crate::nodes::{child_id, Member};
use crate::protocol::Protocol;
use crate::reactive::Property;
use crate::serialization::{InternRootOwner, Serializers};
use crate::wire::{Reader, WireExt, WireReceiver};

type Register = Arc<dyn Fn(&Serializers) + Send + Sync>;

/// State of a bound extension.
struct ExtBinding {
    scope: Scope,
    protocol: Arc<Protocol>,
    wire: Arc<ExtWire>,
    roots: IndexMap<String, Arc<InternRoot>>,
}

struct ExtInner {
    name: String,
    serialization_hash: i64,
    register: Option<Register>,
    intern_keys: Vec<String>,
    members: Vec<(String, Member)>,
    rd_id: AtomicI64,
    connected: Property<bool>,
    binding: RwLock<Option<ExtBinding>>,
}

/// Builder for [`RdExtension`].
pub struct RdExtensionBuilder {
    name: String,
    serialization_hash: i64,
    register: Option<Register>,
    intern_keys: Vec<String>,
    members: Vec<(String, Member)>,
}

impl RdExtensionBuilder {
    /// Hash of the schema the extension was generated from. Defaults to 0.
    pub fn serialization_hash(mut self, hash: i64) -> Self {
        self.serialization_hash = hash;
        self
    }

    /// Registers the extension's types the first time any instance binds.
    pub fn register<F>(mut self, register: F) -> Self
    where
        F: Fn(&Serializers) + Send + Sync + 'static,
    {
        self.register = Some(Arc::new(register));
        self
    }

    /// Add an intern root owned by this extension.
    pub fn intern_root(mut self, key: impl Into<String>) -> Self {
        self.intern_keys.push(key.into());
        self
    }

    /// Add a child, bound under `id.mix("." + name)`.
    pub fn member(mut self, name: impl Into<String>, member: impl Into<Member>) -> Self {
        self.members.push((name.into(), member.into()));
        self
    }

    pub fn build(self) -> RdExtension {
        RdExtension {
            inner: Arc::new(ExtInner {
                name: self.name,
                serialization_hash: self.serialization_hash,
                register: self.register,
                intern_keys: self.intern_keys,
                members: self.members,
                rd_id: AtomicI64::new(RdId::NULL.raw()),
                connected: Property::new(false),
                binding: RwLock::new(None),
            }),
        }
    }
}

/// A separately handshaked subtree.
#[derive(Clone)]
pub struct RdExtension {
    inner: Arc<ExtInner>,
}

impl RdExtension {
    pub fn builder(name: impl Into<String>) -> RdExtensionBuilder {
        RdExtensionBuilder {
            name: name.into(),
            serialization_hash: 0,
            register: None,
            intern_keys: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn serialization_hash(&self) -> i64 {
        self.inner.serialization_hash
    }

    pub fn rd_id(&self) -> RdId {
        RdId::new(self.inner.rd_id.load(Ordering::Acquire))
    }

    /// Whether both halves have completed the handshake.
    pub fn connected(&self) -> &Property<bool> {
        &self.inner.connected
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.get()
    }

    pub fn is_bound(&self) -> bool {
        self.inner.binding.read().is_some()
    }

    /// The protocol children of this extension are bound to.
    pub fn protocol(&self) -> Option<Arc<Protocol>> {
        self.inner.binding.read().as_ref().map(|b| b.protocol.clone())
    }

    /// The bound intern root registered under `key`.
    pub fn bound_intern_root(&self, key: &str) -> Option<Arc<InternRoot>> {
        self.inner
            .binding
            .read()
            .as_ref()
            .and_then(|b| b.roots.get(key).cloned())
    }

    /// Messages held back until the handshake completes.
    pub fn queued(&self) -> usize {
        self.inner
            .binding
            .read()
            .as_ref()
            .map(|b| b.wire.queued())
            .unwrap_or(0)
    }

    /// End the subtree: children unbind and the counterpart is told.
    pub fn terminate(&self) {
        let scope = self.inner.binding.read().as_ref().map(|b| b.scope.clone());
        if let Some(scope) = scope {
            scope.terminate();
        }
    }

    pub fn member(&self) -> Member {
        Member::Extension(self.clone())
    }

    pub(crate) fn bind(&self, scope: &Scope, parent: &Arc<Protocol>, id: RdId, name: &str) -> Result<()> {
        if scope.is_cancelled() {
            return Err(RdError::ScopeTerminated);
        }
        let inner = &self.inner;
        inner.rd_id.store(id.raw(), Ordering::Release);
        let location = format!("{}.{}", parent.location(), name);
        debug!(ext = %location, %id, "binding extension");

        if let Some(register) = &inner.register {
            parent
                .serializers()
                .register_toplevel_once(&inner.name, |serializers| register(serializers));
        }

        let ext_scope = scope.child();
        inner.connected.set(false);
        let wire = ExtWire::new(
            location.clone(),
            parent.wire().clone(),
            parent.contexts().clone(),
            ext_scope.clone(),
            inner.connected.clone(),
        );

        let keys: Vec<&str> = inner.intern_keys.iter().map(String::as_str).collect();
        let ctx = parent.serialization_ctx().with_intern_roots_here(self, &keys);
        let roots: IndexMap<String, Arc<InternRoot>> = inner
            .intern_keys
            .iter()
            .filter_map(|key| ctx.intern_root(key).map(|root| (key.clone(), root.clone())))
            .collect();
        let protocol = parent.derive(location.clone(), wire.clone(), ext_scope.clone(), ctx);

        let handshake = Arc::new(Handshake {
            location: location.clone(),
            id,
            hash: inner.serialization_hash,
            parent: parent.clone(),
            wire: wire.clone(),
            scope: ext_scope.clone(),
        });
        parent.wire().advise(&ext_scope, id, handshake.clone());

        for root in roots.values() {
            root.bind(&ext_scope, wire.clone());
        }
        for (child_name, member) in &inner.members {
            member.bind(&ext_scope, &protocol, child_id(id, child_name), child_name)?;
        }

        *inner.binding.write() = Some(ExtBinding {
            scope: ext_scope.clone(),
            protocol,
            wire,
            roots,
        });

        let weak = Arc::downgrade(inner);
        let on_end = handshake.clone();
        ext_scope.on_termination(move || {
            on_end.send_state(ExtState::Disconnected);
            if let Some(inner) = weak.upgrade() {
                inner.connected.set(false);
                *inner.binding.write() = None;
            }
            debug!(ext = %on_end.location, "extension unbound");
        });

        // Replays the current link state, so this sends `Ready` right away
        // when the link is up.
        parent.wire().connected().advise(&ext_scope, move |up| {
            if *up {
                handshake.send_state(ExtState::Ready);
            } else {
                handshake.wire.set_connected(false);
            }
        });
        Ok(())
    }
}

impl InternRootOwner for RdExtension {
    fn intern_root(&self, key: &str) -> Arc<InternRoot> {
        let id = child_id(self.rd_id(), &format!("InternRoot-{key}"));
        Arc::new(InternRoot::new(key, id))
    }
}

impl fmt::Debug for RdExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdExtension")
            .field("name", &self.inner.name)
            .field("id", &self.rd_id())
            .field("connected", &self.is_connected())
            .field("members", &self.inner.members.len())
            .finish()
    }
}

/// Handshake endpoint of one bound extension.
struct Handshake {
    location: String,
    id: RdId,
    hash: i64,
    parent: Arc<Protocol>,
    wire: Arc<ExtWire>,
    scope: Scope,
}

impl Handshake {
    fn send_state(&self, state: ExtState) {
        trace!(ext = %self.location, %state, "send state");
        let result = self.parent.wire().send_with(self.id, |writer| {
            writer.write_i32(state.code());
            writer.write_i64(self.hash);
            Ok(())
        });
        if let Err(err) = result {
            debug!(ext = %self.location, %state, %err, "could not send state");
        }
    }
}

impl WireReceiver for Handshake {
    fn on_wire_received(&self, reader: &mut Reader<'_>) -> Result<()> {
        let code = reader.read_i32()?;
        let Some(state) = ExtState::from_code(code) else {
            error!(ext = %self.location, code, "unsupported extension state, terminating extension");
            self.scope.terminate();
            return Err(RdError::UnknownExtState(code));
        };
        trace!(ext = %self.location, %state, "received state");

        match state {
            ExtState::Ready => {
                self.send_state(ExtState::ReceivedCounterpart);
                self.wire.set_connected(true);
            }
            ExtState::ReceivedCounterpart => self.wire.set_connected(true),
            ExtState::Disconnected => self.wire.set_connected(false),
        }

        let remote = reader.read_i64()?;
        if remote != self.hash {
            self.parent.report_out_of_sync(self.location.clone());
            if self.parent.config().throw_error_on_out_of_sync_models {
                return Err(RdError::SerializationHashMismatch {
                    location: self.location.clone(),
                    local: self.hash,
                    remote,
                });
            }
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolConfig;
    use crate::nodes::RdProperty;
    use crate::serialization::Builtin;
    use crate::wire::MemoryWire;

    struct Side {
        proto: Arc<Protocol>,
        wire: MemoryWire,
        scope: Scope,
    }

    fn sides() -> (Side, Side) {
        let (client_wire, server_wire) = MemoryWire::pair();
        let client_scope = Scope::new();
        let server_scope = Scope::new();
        let client = Side {
            proto: Protocol::new(ProtocolConfig::client("client"), Arc::new(client_wire.clone()), client_scope.clone()),
            wire: client_wire,
            scope: client_scope,
        };
        let server = Side {
            proto: Protocol::new(ProtocolConfig::server("server"), Arc::new(server_wire.clone()), server_scope.clone()),
            wire: server_wire,
            scope: server_scope,
        };
        (client, server)
    }

    #[test]
    fn handshake_connects_both_sides() {
        let (client, server) = sides();
        let on_client = RdExtension::builder("model").build();
        let on_server = RdExtension::builder("model").build();

        client.proto.bind_static("model", &on_client.member()).unwrap();
        assert!(!on_client.is_connected());

        server.proto.bind_static("model", &on_server.member()).unwrap();
        assert!(on_client.is_connected());
        assert!(on_server.is_connected());
    }

    #[test]
    fn children_are_bound_under_extension_id() {
        let (client, _server) = sides();
        let count = RdProperty::new(0i32, Arc::new(Builtin));
        let ext = RdExtension::builder("model").member("count", count.member()).build();
        client.proto.bind_static("model", &ext.member()).unwrap();

        assert_eq!(ext.rd_id(), RdId::NULL.mix("model"));
        assert_eq!(count.rd_id(), RdId::NULL.mix("model").mix(".count"));
        assert_eq!(ext.protocol().map(|p| p.location().to_string()), Some("client.model".into()));
    }

    #[test]
    fn unknown_state_terminates_subtree() {
        let (client, server) = sides();
        let on_client = RdExtension::builder("model").build();
        let on_server = RdExtension::builder("model").build();
        client.proto.bind_static("model", &on_client.member()).unwrap();
        server.proto.bind_static("model", &on_server.member()).unwrap();

        server
            .wire
            .send_with(on_client.rd_id(), |w| {
                w.write_i32(7);
                w.write_i64(0);
                Ok(())
            })
            .unwrap();

        assert!(!on_client.is_bound());
        assert!(!on_client.is_connected());
        // The counterpart was told.
        assert!(!on_server.is_connected());
        assert_eq!(client.wire.receive_errors().len(), 1);
    }

    #[test]
    fn terminating_parent_scope_sends_disconnected() {
        let (client, server) = sides();
        let on_client = RdExtension::builder("model").build();
        let on_server = RdExtension::builder("model").build();
        client.proto.bind_static("model", &on_client.member()).unwrap();
        server.proto.bind_static("model", &on_server.member()).unwrap();
        assert!(on_server.is_connected());

        client.scope.terminate();
        assert!(!on_server.is_connected());
        assert!(on_server.is_bound());
        assert!(server.scope.is_alive());
    }

    #[test]
    fn hash_mismatch_is_recorded() {
        let (client, server) = sides();
        let on_client = RdExtension::builder("model").serialization_hash(1).build();
        let on_server = RdExtension::builder("model").serialization_hash(2).build();
        client.proto.bind_static("model", &on_client.member()).unwrap();
        server.proto.bind_static("model", &on_server.member()).unwrap();

        assert_eq!(client.proto.out_of_sync_models(), vec!["client.model".to_string()]);
        assert_eq!(server.proto.out_of_sync_models(), vec!["server.model".to_string()]);
        // Still connected: a mismatch is reported, not fatal.
        assert!(on_client.is_connected());
    }

    #[test]
    fn register_runs_once_per_protocol() {
        let (client, _server) = sides();
        let first = RdExtension::builder("model")
            .register(|s| s.register::<u64>(Arc::new(crate::serialization::SerdeMarshaller::new())))
            .build();
        let second = RdExtension::builder("model").build();
        client.proto.bind_static("a", &first.member()).unwrap();
        client.proto.bind_static("b", &second.member()).unwrap();
        assert!(client.proto.serializers().contains::<u64>());
    }
}
