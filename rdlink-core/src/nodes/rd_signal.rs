//! Synchronized signal.
//!
//! [`RdSignal<T>`] fires on both sides. A local `fire` sends `[value]` to
//! the counterpart and then notifies local observers; a fire received from
//! the counterpart notifies local observers only, through the protocol's
//! scheduler.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use super::{Bindable, Member, NodeBinding};
use crate::error::{RdError, Result};
use crate::graph::RdId;
use crate::lifetime::Scope;
use crate::protocol::Protocol;
use crate::reactive::{Signal, Subscription};
use crate::serialization::Marshaller;
use crate::wire::{Reader, WireExt, WireReceiver};

struct SignalNode<T> {
    this: Weak<SignalNode<T>>,
    signal: Signal<T>,
    marshaller: Arc<dyn Marshaller<T>>,
    binding: RwLock<Option<NodeBinding>>,
}

impl<T> Bindable for SignalNode<T>
where
    T: Send + Sync + 'static,
{
    fn bind(&self, scope: &Scope, proto: &Arc<Protocol>, id: RdId) -> Result<()> {
        if scope.is_cancelled() {
            return Err(RdError::ScopeTerminated);
        }
        let Some(this) = self.this.upgrade() else {
            return Err(RdError::ScopeTerminated);
        };

        *self.binding.write() = Some(NodeBinding {
            proto: proto.clone(),
            id,
        });
        proto.wire().advise(scope, id, this);
        debug!(location = %proto.location(), %id, "bound signal");

        let weak = self.this.clone();
        scope.on_termination(move || {
            if let Some(node) = weak.upgrade() {
                *node.binding.write() = None;
            }
        });
        Ok(())
    }

    fn rd_id(&self) -> RdId {
        self.binding.read().as_ref().map(|b| b.id).unwrap_or(RdId::NULL)
    }
}

impl<T> WireReceiver for SignalNode<T>
where
    T: Send + Sync + 'static,
{
    fn on_wire_received(&self, reader: &mut Reader<'_>) -> Result<()> {
        let binding = self.binding.read().clone();
        let Some(binding) = binding else {
            return Ok(());
        };
        let value = self.marshaller.read(binding.proto.serialization_ctx(), reader)?;
        trace!(id = %binding.id, "received signal");

        let weak = self.this.clone();
        binding.proto.scheduler().queue(Box::new(move || {
            if let Some(node) = weak.upgrade() {
                node.signal.fire(&value);
            }
        }));
        Ok(())
    }
}

/// An event stream synchronized with the counterpart.
pub struct RdSignal<T> {
    inner: Arc<SignalNode<T>>,
}

impl<T> RdSignal<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(marshaller: Arc<dyn Marshaller<T>>) -> Self {
        Self {
            inner: Arc::new_cyclic(|this| SignalNode {
                this: this.clone(),
                signal: Signal::new(),
                marshaller,
                binding: RwLock::new(None),
            }),
        }
    }

    /// Send `value` to the counterpart, then notify local observers.
    ///
    /// An unbound signal only notifies locally.
    pub fn fire(&self, value: &T) {
        let binding = self.inner.binding.read().clone();
        match binding {
            Some(binding) => {
                let ctx = binding.proto.serialization_ctx();
                let result = binding
                    .proto
                    .wire()
                    .send_with(binding.id, |writer| self.inner.marshaller.write(ctx, writer, value));
                if let Err(err) = result {
                    warn!(id = %binding.id, %err, "failed to send signal");
                }
            }
            None => debug!("signal fired before bind, not sent"),
        }
        self.inner.signal.fire(value);
    }

    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.signal.subscribe(observer)
    }

    pub fn advise<F>(&self, scope: &Scope, observer: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.signal.advise(scope, observer);
    }

    pub fn is_bound(&self) -> bool {
        self.inner.binding.read().is_some()
    }

    pub fn rd_id(&self) -> RdId {
        self.inner.rd_id()
    }

    pub fn member(&self) -> Member {
        Member::Signal(self.inner.clone())
    }
}

impl<T> Clone for RdSignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for RdSignal<T>
where
    T: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdSignal").field("id", &self.rd_id()).finish()
    }
}
