//! Intern Root
//!
//! An [`InternRoot`] lets a value cross the wire once and be referenced by
//! a small [`InternId`] afterwards. Both sides of a subtree hold a root
//! with the same [`RdId`]; a root message carries `[id: i32][value]`.
//!
//! Values are content-addressed by their encoded bytes, so any type with a
//! [`Marshaller`] can be interned and two values are "the same" exactly
//! when they encode the same.
//!
//! # Lifecycle
//!
//! - `intern` returns an existing id (local or counterpart-allocated)
//!   without traffic, or allocates one and sends the value.
//! - `remove` forgets a value locally and frees its slot for reuse. The
//!   counterpart is not told; both sides are expected to remove a value
//!   independently.
//! - Terminating the bind scope forgets everything.
//!
//! An unbound root returns [`InternId::INVALID`], which makes writers fall
//! back to inline encoding.
//!
//! # Locking
//!
//! Two locks guard a root:
//!
//! - `send_order` is held from the lookup through allocation and the send,
//!   so no other thread can reference an id before its value has been
//!   sent. It is re-entrant because an in-process wire may deliver the
//!   counterpart's traffic on the sending thread.
//! - `state` guards the tables and is only held around map access, never
//!   across a send. The receive path takes nothing else, so two roots
//!   interning towards each other from different threads cannot wait on
//!   one another.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, trace};

use super::InternId;
use crate::error::{RdError, Result};
use crate::graph::RdId;
use crate::lifetime::Scope;
use crate::serialization::{Marshaller, SerializationCtx};
use crate::wire::{Reader, Wire, WireReceiver, Writer};

#[derive(Default)]
struct InternState {
    /// Values this side allocated, by slot. `None` marks a freed slot.
    local: Vec<Option<Bytes>>,
    free: Vec<usize>,
    /// Values the counterpart allocated, keyed by id from our perspective.
    remote: HashMap<InternId, Bytes>,
    ids: HashMap<Bytes, InternId>,
}

impl InternState {
    fn allocate(&mut self, value: Bytes) -> InternId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.local.push(None);
                self.local.len() - 1
            }
        };
        let id = InternId::local(index);
        self.local[index] = Some(value.clone());
        self.ids.insert(value, id);
        id
    }

    fn get(&self, id: InternId) -> Option<Bytes> {
        match id.local_index() {
            Some(index) => self.local.get(index).cloned().flatten(),
            None => self.remote.get(&id).cloned(),
        }
    }

    fn forget(&mut self, id: InternId) {
        let old = match id.local_index() {
            Some(index) => {
                let old = self.local.get_mut(index).and_then(Option::take);
                if old.is_some() {
                    self.free.push(index);
                }
                old
            }
            None => self.remote.remove(&id),
        };
        if let Some(old) = old {
            if self.ids.get(&old) == Some(&id) {
                self.ids.remove(&old);
            }
        }
    }

    fn store_remote(&mut self, id: InternId, value: Bytes) {
        // A slot the counterpart reuses replaces whatever it held before.
        self.forget(id);
        self.ids.entry(value.clone()).or_insert(id);
        self.remote.insert(id, value);
    }

    fn len(&self) -> usize {
        self.local.iter().filter(|v| v.is_some()).count() + self.remote.len()
    }
}

/// Content-addressed value cache shared with the counterpart.
pub struct InternRoot {
    key: String,
    rd_id: AtomicI64,
    send_order: ReentrantMutex<()>,
    state: Mutex<InternState>,
    wire: RwLock<Option<Arc<dyn Wire>>>,
}

impl InternRoot {
    pub fn new(key: impl Into<String>, rd_id: RdId) -> Self {
        Self {
            key: key.into(),
            rd_id: AtomicI64::new(rd_id.raw()),
            send_order: ReentrantMutex::new(()),
            state: Mutex::new(InternState::default()),
            wire: RwLock::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn rd_id(&self) -> RdId {
        RdId::new(self.rd_id.load(Ordering::Acquire))
    }

    /// Re-identify the root before it is bound.
    pub fn identify(&self, id: RdId) {
        self.rd_id.store(id.raw(), Ordering::Release);
    }

    pub fn is_bound(&self) -> bool {
        self.wire.read().is_some()
    }

    /// Start exchanging values over `wire` until `scope` terminates.
    pub fn bind(self: &Arc<Self>, scope: &Scope, wire: Arc<dyn Wire>) {
        if scope.is_cancelled() {
            return;
        }
        let id = self.rd_id();
        debug!(root = %self.key, %id, "binding intern root");
        *self.wire.write() = Some(wire.clone());
        wire.advise(scope, id, self.clone());

        let weak: Weak<InternRoot> = Arc::downgrade(self);
        scope.on_termination(move || {
            if let Some(root) = weak.upgrade() {
                root.unbind();
            }
        });
    }

    fn unbind(&self) {
        debug!(root = %self.key, id = %self.rd_id(), "unbinding intern root");
        *self.wire.write() = None;
        *self.state.lock() = InternState::default();
    }

    /// Intern an encoded value.
    ///
    /// Returns [`InternId::INVALID`] when the root is unbound or the wire
    /// refused the value; the caller then writes it inline.
    pub fn intern_bytes(&self, value: Bytes) -> Result<InternId> {
        let _order = self.send_order.lock();
        let Some(wire) = self.wire.read().clone() else {
            return Ok(InternId::INVALID);
        };

        let id = {
            let mut state = self.state.lock();
            if let Some(id) = state.ids.get(&value) {
                return Ok(*id);
            }
            state.allocate(value.clone())
        };

        let mut writer = Writer::with_capacity(4 + value.len());
        writer.write_i32(id.raw());
        writer.write_raw(&value);
        trace!(root = %self.key, %id, len = value.len(), "interning value");

        if let Err(err) = wire.send(self.rd_id(), writer.freeze()) {
            debug!(root = %self.key, %id, error = %err, "intern send failed, falling back to inline");
            self.state.lock().forget(id);
            return Ok(InternId::INVALID);
        }
        Ok(id)
    }

    /// Encoded value stored under `id`.
    pub fn unintern(&self, id: InternId) -> Result<Bytes> {
        let value = self.state.lock().get(id);
        value.ok_or(RdError::UnknownInternId(id.raw()))
    }

    /// Forget an encoded value locally. Returns whether it was known.
    pub fn remove_bytes(&self, value: &[u8]) -> bool {
        let mut state = self.state.lock();
        let Some(id) = state.ids.get(value).copied() else {
            return false;
        };
        state.forget(id);
        true
    }

    /// Intern a typed value.
    pub fn intern<T, M>(&self, ctx: &SerializationCtx, marshaller: &M, value: &T) -> Result<InternId>
    where
        M: Marshaller<T> + ?Sized,
    {
        self.intern_bytes(encode(ctx, marshaller, value)?)
    }

    /// Typed value stored under `id`.
    pub fn unintern_value<T, M>(&self, ctx: &SerializationCtx, marshaller: &M, id: InternId) -> Result<T>
    where
        M: Marshaller<T> + ?Sized,
    {
        let bytes = self.unintern(id)?;
        marshaller.read(ctx, &mut Reader::new(&bytes))
    }

    /// Forget a typed value locally.
    pub fn remove<T, M>(&self, ctx: &SerializationCtx, marshaller: &M, value: &T) -> Result<bool>
    where
        M: Marshaller<T> + ?Sized,
    {
        Ok(self.remove_bytes(&encode(ctx, marshaller, value)?))
    }

    /// Number of values currently known, from either side.
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn encode<T, M>(ctx: &SerializationCtx, marshaller: &M, value: &T) -> Result<Bytes>
where
    M: Marshaller<T> + ?Sized,
{
    let mut writer = Writer::new();
    marshaller.write(ctx, &mut writer, value)?;
    Ok(writer.freeze())
}

impl WireReceiver for InternRoot {
    fn on_wire_received(&self, reader: &mut Reader<'_>) -> Result<()> {
        let id = InternId::new(reader.read_i32()?).flip();
        if !id.is_valid() || id.is_local() {
            return Err(RdError::Codec(format!(
                "intern root `{}` received id {} that the counterpart cannot own",
                self.key,
                id.flip()
            )));
        }
        let value = Bytes::copy_from_slice(reader.rest());
        trace!(root = %self.key, %id, len = value.len(), "received interned value");

        self.state.lock().store_remote(id, value);
        Ok(())
    }
}

impl fmt::Debug for InternRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternRoot")
            .field("key", &self.key)
            .field("rd_id", &self.rd_id())
            .field("bound", &self.is_bound())
            .field("len", &self.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
