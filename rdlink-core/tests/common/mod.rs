//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use rdlink_core::config::ProtocolConfig;
use rdlink_core::graph::RdId;
use rdlink_core::lifetime::Scope;
use rdlink_core::protocol::Protocol;
use rdlink_core::reactive::Property;
use rdlink_core::wire::{MemoryWire, Wire, WireReceiver};
use rdlink_core::Result;

/// Log output for a failing test: `RUST_LOG=rdlink_core=trace cargo test`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Wire that records the id of every message that made it to the transport.
pub struct Tap {
    inner: MemoryWire,
    sent: Mutex<Vec<RdId>>,
}

impl Tap {
    pub fn new(inner: MemoryWire) -> Arc<Self> {
        Arc::new(Self {
            inner,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<RdId> {
        self.sent.lock().clone()
    }
}

impl Wire for Tap {
    fn send(&self, id: RdId, payload: Bytes) -> Result<()> {
        self.inner.send(id, payload)?;
        self.sent.lock().push(id);
        Ok(())
    }

    fn advise(&self, scope: &Scope, id: RdId, receiver: Arc<dyn WireReceiver>) {
        self.inner.advise(scope, id, receiver);
    }

    fn connected(&self) -> Property<bool> {
        self.inner.connected()
    }
}

/// One side of a connection over an in-memory wire.
pub struct Side {
    pub proto: Arc<Protocol>,
    pub wire: MemoryWire,
    pub tap: Arc<Tap>,
    pub scope: Scope,
}

impl Side {
    fn new(config: ProtocolConfig, wire: MemoryWire) -> Self {
        let scope = Scope::new();
        let tap = Tap::new(wire.clone());
        Side {
            proto: Protocol::new(config, tap.clone(), scope.clone()),
            wire,
            tap,
            scope,
        }
    }
}

/// A client and a server, each with its own scope.
pub fn sides() -> (Side, Side) {
    sides_with(ProtocolConfig::client("client"), ProtocolConfig::server("server"))
}

pub fn sides_with(client: ProtocolConfig, server: ProtocolConfig) -> (Side, Side) {
    init_tracing();
    let (client_wire, server_wire) = MemoryWire::pair_for(&client, &server);
    (Side::new(client, client_wire), Side::new(server, server_wire))
}
