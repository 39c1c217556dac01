//! Wire Abstraction
//!
//! A [`Wire`] moves `(identifier, payload)` messages to the counterpart
//! and dispatches inbound messages to the [`WireReceiver`] advised for
//! their identifier. Nothing above this module knows about sockets or
//! pipes.
//!
//! # Modules
//!
//! - `buffer`: payload [`Writer`] / [`Reader`]
//! - `frame`: `[id][len][payload]` framing for byte-stream transports
//! - `memory`: an in-process [`MemoryWire`] pair

pub mod buffer;
pub mod frame;
pub mod memory;

use std::sync::Arc;

use bytes::Bytes;

pub use buffer::{Reader, Writer};
pub use frame::{encode_frame, Frame, FrameDecoder, MAX_FRAME_SIZE};
pub use memory::MemoryWire;

use crate::error::Result;
use crate::graph::RdId;
use crate::lifetime::Scope;
use crate::reactive::Property;

/// Handler for messages addressed to one identifier.
pub trait WireReceiver: Send + Sync {
    fn on_wire_received(&self, reader: &mut Reader<'_>) -> Result<()>;
}

/// Transport-agnostic message channel.
pub trait Wire: Send + Sync {
    /// Send one message. Fails with [`RdError::Transport`](crate::RdError::Transport)
    /// when the transport cannot take it.
    fn send(&self, id: RdId, payload: Bytes) -> Result<()>;

    /// Route messages for `id` to `receiver` until `scope` terminates.
    fn advise(&self, scope: &Scope, id: RdId, receiver: Arc<dyn WireReceiver>);

    /// Link-level connectivity of the transport.
    fn connected(&self) -> Property<bool>;
}

/// Writer-callback form of [`Wire::send`].
pub trait WireExt {
    fn send_with<F>(&self, id: RdId, write: F) -> Result<()>
    where
        F: FnOnce(&mut Writer) -> Result<()>;
}

impl<W: Wire + ?Sized> WireExt for W {
    fn send_with<F>(&self, id: RdId, write: F) -> Result<()>
    where
        F: FnOnce(&mut Writer) -> Result<()>,
    {
        let mut writer = Writer::new();
        write(&mut writer)?;
        self.send(id, writer.freeze())
    }
}
