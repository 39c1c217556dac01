//! In-memory wire pair.
//!
//! [`MemoryWire::pair`] returns two ends connected back to back. Sending on
//! one end frames the message, counts its bytes, and pushes the bytes into
//! the other end's [`FrameDecoder`], which is then drained on the sending
//! thread.
//!
//! Delivery is trampolined: if a receiver sends while a delivery is already
//! running on the destination end, the new frame is queued and dispatched
//! by the outer delivery loop once the current receiver returns. Frames for
//! one end are therefore always dispatched in the order they were sent.
//!
//! Test hooks:
//!
//! - [`MemoryWire::set_auto_flush`] holds outgoing frames until
//!   [`MemoryWire::flush`]
//! - [`MemoryWire::set_link_up`] simulates a dropped link: sends fail and
//!   both ends report `connected() == false`
//! - [`MemoryWire::bytes_written`] counts framed bytes sent by this end

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{error, trace, warn};

use super::frame::{encode_frame, FrameDecoder, MAX_FRAME_SIZE};
use super::{Reader, Wire, WireReceiver};
use crate::config::ProtocolConfig;
use crate::error::{RdError, Result};
use crate::graph::RdId;
use crate::lifetime::Scope;
use crate::reactive::Property;

struct MemoryEnd {
    name: String,
    receivers: DashMap<RdId, Arc<dyn WireReceiver>>,
    inbox: Mutex<FrameDecoder>,
    held: Mutex<VecDeque<Bytes>>,
    delivering: AtomicBool,
    auto_flush: AtomicBool,
    bytes_written: AtomicU64,
    messages_written: AtomicU64,
    link: Property<bool>,
    counterpart: OnceLock<Weak<MemoryEnd>>,
    receive_errors: Mutex<Vec<String>>,
}

impl MemoryEnd {
    fn new(name: &str, link: Property<bool>, max_frame_size: usize) -> Self {
        Self {
            name: name.to_string(),
            receivers: DashMap::new(),
            inbox: Mutex::new(FrameDecoder::new(max_frame_size)),
            held: Mutex::new(VecDeque::new()),
            delivering: AtomicBool::new(false),
            auto_flush: AtomicBool::new(true),
            bytes_written: AtomicU64::new(0),
            messages_written: AtomicU64::new(0),
            link,
            counterpart: OnceLock::new(),
            receive_errors: Mutex::new(Vec::new()),
        }
    }

    fn counterpart(&self) -> Option<Arc<MemoryEnd>> {
        self.counterpart.get().and_then(Weak::upgrade)
    }

    /// Accept raw bytes from the counterpart and dispatch what is complete.
    fn receive(&self, bytes: &[u8]) {
        self.inbox.lock().push(bytes);
        self.deliver();
    }

    fn deliver(&self) {
        loop {
            if self
                .delivering
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // The running delivery loop will pick the frame up.
                return;
            }

            loop {
                let next = self.inbox.lock().next_frame();
                match next {
                    Ok(Some(frame)) => self.dispatch(frame.id, &frame.payload),
                    Ok(None) => break,
                    Err(err) => {
                        error!(wire = %self.name, %err, "framing error, dropping inbox");
                        self.receive_errors.lock().push(err.to_string());
                        self.inbox.lock().clear();
                        break;
                    }
                }
            }

            self.delivering.store(false, Ordering::Release);
            if !self.inbox.lock().has_complete_frame() {
                return;
            }
        }
    }

    fn dispatch(&self, id: RdId, payload: &[u8]) {
        let receiver = self.receivers.get(&id).map(|entry| entry.value().clone());
        match receiver {
            Some(receiver) => {
                trace!(wire = %self.name, %id, len = payload.len(), "recv");
                let mut reader = Reader::new(payload);
                if let Err(err) = receiver.on_wire_received(&mut reader) {
                    error!(wire = %self.name, %id, %err, "receiver failed");
                    self.receive_errors.lock().push(err.to_string());
                }
            }
            None => {
                warn!(wire = %self.name, %id, "no receiver for message, dropped");
            }
        }
    }
}

/// One end of an in-process wire pair.
#[derive(Clone)]
pub struct MemoryWire {
    inner: Arc<MemoryEnd>,
}

impl MemoryWire {
    /// Two connected ends.
    pub fn pair() -> (MemoryWire, MemoryWire) {
        Self::pair_named("client", "server")
    }

    pub fn pair_named(first: &str, second: &str) -> (MemoryWire, MemoryWire) {
        Self::pair_with_limit(first, second, MAX_FRAME_SIZE)
    }

    /// Two connected ends whose decoders reject payloads above `max_frame_size`.
    pub fn pair_with_limit(first: &str, second: &str, max_frame_size: usize) -> (MemoryWire, MemoryWire) {
        let link = Property::new(true);
        let a = Arc::new(MemoryEnd::new(first, link.clone(), max_frame_size));
        let b = Arc::new(MemoryEnd::new(second, link, max_frame_size));
        let _ = a.counterpart.set(Arc::downgrade(&b));
        let _ = b.counterpart.set(Arc::downgrade(&a));
        (MemoryWire { inner: a }, MemoryWire { inner: b })
    }

    /// Two connected ends named after `first` and `second`, framing limited
    /// by the smaller of their `max_frame_size`.
    pub fn pair_for(first: &ProtocolConfig, second: &ProtocolConfig) -> (MemoryWire, MemoryWire) {
        let limit = first.max_frame_size.min(second.max_frame_size);
        Self::pair_with_limit(&first.name, &second.name, limit)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Framed bytes this end has sent, including held ones.
    pub fn bytes_written(&self) -> u64 {
        self.inner.bytes_written.load(Ordering::SeqCst)
    }

    pub fn messages_written(&self) -> u64 {
        self.inner.messages_written.load(Ordering::SeqCst)
    }

    /// Errors raised by receivers on this end.
    pub fn receive_errors(&self) -> Vec<String> {
        self.inner.receive_errors.lock().clone()
    }

    /// When off, sent frames are held until [`MemoryWire::flush`].
    pub fn set_auto_flush(&self, auto_flush: bool) {
        self.inner.auto_flush.store(auto_flush, Ordering::SeqCst);
        if auto_flush {
            self.flush();
        }
    }

    /// Deliver every held frame to the counterpart, in send order.
    pub fn flush(&self) {
        let Some(counterpart) = self.inner.counterpart() else {
            return;
        };
        loop {
            let next = self.inner.held.lock().pop_front();
            match next {
                Some(bytes) => counterpart.receive(&bytes),
                None => return,
            }
        }
    }

    /// Bring the shared link up or down.
    pub fn set_link_up(&self, up: bool) {
        self.inner.link.set(up);
    }
}

impl Wire for MemoryWire {
    fn send(&self, id: RdId, payload: Bytes) -> Result<()> {
        if !self.inner.link.get() {
            return Err(RdError::Transport(format!("{}: link is down", self.inner.name)));
        }
        let counterpart = self
            .inner
            .counterpart()
            .ok_or_else(|| RdError::Transport(format!("{}: counterpart is gone", self.inner.name)))?;

        let mut frame = BytesMut::new();
        encode_frame(&mut frame, id, &payload)?;
        let frame = frame.freeze();
        trace!(wire = %self.inner.name, %id, len = payload.len(), "send");

        self.inner.bytes_written.fetch_add(frame.len() as u64, Ordering::SeqCst);
        self.inner.messages_written.fetch_add(1, Ordering::SeqCst);

        if self.inner.auto_flush.load(Ordering::SeqCst) {
            counterpart.receive(&frame);
        } else {
            self.inner.held.lock().push_back(frame);
        }
        Ok(())
    }

    fn advise(&self, scope: &Scope, id: RdId, receiver: Arc<dyn WireReceiver>) {
        if scope.is_cancelled() {
            return;
        }
        let registered = Arc::as_ptr(&receiver) as *const ();
        if self.inner.receivers.insert(id, receiver).is_some() {
            warn!(wire = %self.inner.name, %id, "receiver replaced");
        }

        let end = Arc::downgrade(&self.inner);
        let registered = registered as usize;
        scope.on_termination(move || {
            if let Some(end) = end.upgrade() {
                end.receivers
                    .remove_if(&id, |_, current| Arc::as_ptr(current) as *const () as usize == registered);
            }
        });
    }

    fn connected(&self) -> Property<bool> {
        self.inner.link.clone()
    }
}

impl std::fmt::Debug for MemoryWire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryWire")
            .field("name", &self.inner.name)
            .field("receivers", &self.inner.receivers.len())
            .field("bytes_written", &self.bytes_written())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
