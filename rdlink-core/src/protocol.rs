//! Protocol
//!
//! A [`Protocol`] is one side of a connection. It owns everything a bound
//! node needs to reach the counterpart:
//!
//! - the [`Wire`] (the real one at the top, an extension wire inside an
//!   extension)
//! - the [`Identities`] allocator and the [`Serializers`] registry
//! - the [`Scheduler`] remote updates are applied on
//! - the [`SerializationCtx`] with the intern roots active at this level
//! - the [`ProtocolContexts`] propagated with buffered messages
//! - the set of out-of-sync extension locations
//!
//! Extensions derive a child protocol that shares all of the above except
//! the wire, the scope, the serialization context and the location.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::ProtocolConfig;
use crate::error::Result;
use crate::graph::{Identities, RdId, Scheduler, SynchronousScheduler};
use crate::lifetime::Scope;
use crate::nodes::Member;
use crate::reactive::ProtocolContexts;
use crate::serialization::{SerializationCtx, Serializers};
use crate::wire::Wire;

/// One side of a protocol connection.
pub struct Protocol {
    location: String,
    config: Arc<ProtocolConfig>,
    serializers: Arc<Serializers>,
    identities: Arc<Identities>,
    scheduler: Arc<dyn Scheduler>,
    wire: Arc<dyn Wire>,
    scope: Scope,
    ser_ctx: SerializationCtx,
    contexts: Arc<ProtocolContexts>,
    out_of_sync: Arc<Mutex<IndexSet<String>>>,
}

impl Protocol {
    /// A protocol that applies remote updates on the delivering thread.
    pub fn new(config: ProtocolConfig, wire: Arc<dyn Wire>, scope: Scope) -> Arc<Self> {
        Self::with_scheduler(config, wire, scope, Arc::new(SynchronousScheduler))
    }

    pub fn with_scheduler(
        config: ProtocolConfig,
        wire: Arc<dyn Wire>,
        scope: Scope,
        scheduler: Arc<dyn Scheduler>,
    ) -> Arc<Self> {
        Self::with_parts(
            config,
            Arc::new(Serializers::with_builtins()),
            scheduler,
            wire,
            scope,
        )
    }

    pub fn with_parts(
        config: ProtocolConfig,
        serializers: Arc<Serializers>,
        scheduler: Arc<dyn Scheduler>,
        wire: Arc<dyn Wire>,
        scope: Scope,
    ) -> Arc<Self> {
        debug!(protocol = %config.name, kind = ?config.id_kind, "creating protocol");
        Arc::new(Self {
            location: config.name.clone(),
            identities: Arc::new(Identities::new(config.id_kind)),
            ser_ctx: SerializationCtx::new(serializers.clone()),
            config: Arc::new(config),
            serializers,
            scheduler,
            wire,
            scope,
            contexts: Arc::new(ProtocolContexts::new()),
            out_of_sync: Arc::new(Mutex::new(IndexSet::new())),
        })
    }

    /// Child protocol for an extension subtree.
    pub(crate) fn derive(
        &self,
        location: String,
        wire: Arc<dyn Wire>,
        scope: Scope,
        ser_ctx: SerializationCtx,
    ) -> Arc<Self> {
        Arc::new(Self {
            location,
            config: self.config.clone(),
            serializers: self.serializers.clone(),
            identities: self.identities.clone(),
            scheduler: self.scheduler.clone(),
            wire,
            scope,
            ser_ctx,
            contexts: self.contexts.clone(),
            out_of_sync: self.out_of_sync.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Dotted path of this protocol level, used in logs and out-of-sync
    /// reports.
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn serializers(&self) -> &Arc<Serializers> {
        &self.serializers
    }

    pub fn identities(&self) -> &Identities {
        &self.identities
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn wire(&self) -> &Arc<dyn Wire> {
        &self.wire
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn serialization_ctx(&self) -> &SerializationCtx {
        &self.ser_ctx
    }

    pub fn contexts(&self) -> &Arc<ProtocolContexts> {
        &self.contexts
    }

    /// Bind a top-level member under `RdId::NULL.mix(name)` for the
    /// lifetime of the protocol scope.
    pub fn bind_static(self: &Arc<Self>, name: &str, member: &Member) -> Result<()> {
        member.bind(&self.scope, self, RdId::NULL.mix(name), name)
    }

    /// Locations of extensions whose serialization hash differs from the
    /// counterpart's, in the order they were detected.
    pub fn out_of_sync_models(&self) -> Vec<String> {
        self.out_of_sync.lock().iter().cloned().collect()
    }

    pub(crate) fn report_out_of_sync(&self, location: String) {
        let out_of_sync = self.out_of_sync.clone();
        self.scheduler.queue(Box::new(move || {
            warn!(ext = %location, "serialization hash differs from counterpart");
            out_of_sync.lock().insert(location);
        }));
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol")
            .field("location", &self.location)
            .field("kind", &self.identities.kind())
            .field("ser_ctx", &self.ser_ctx)
            .finish()
    }
}
