//! Extension Wire
//!
//! An [`ExtWire`] sits between an extension's children and the real wire.
//! Until the handshake completes it queues outgoing messages; once
//! `connected` turns true it drains the queue in FIFO order and then lets
//! sends through directly.
//!
//! # Ordering
//!
//! The queue and the `draining` flag share one lock. A send goes direct
//! only when the extension is connected, nothing is queued and no drain is
//! running; otherwise it is appended. The drain pops one message at a time
//! and releases the lock around the real send, so producers are never
//! blocked behind the transport, and re-checks the queue before finishing.
//!
//! Every queued message carries a [`ContextSnapshot`] taken at enqueue
//! time. The drain applies it around that message's send only.
//!
//! # Failure
//!
//! A transport failure puts the message back at the head of the queue and
//! marks the extension disconnected. It is re-sent after the next
//! handshake. Sends after the extension's scope has terminated are
//! dropped.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::Result;
use crate::graph::RdId;
use crate::lifetime::Scope;
use crate::reactive::{ContextSnapshot, Property, ProtocolContexts};
use crate::wire::{Wire, WireReceiver};

struct QueuedMessage {
    id: RdId,
    payload: Bytes,
    context: ContextSnapshot,
}

#[derive(Default)]
struct SendQueue {
    messages: VecDeque<QueuedMessage>,
    draining: bool,
}

/// Buffering wire used by everything inside an extension.
pub struct ExtWire {
    location: String,
    real: Arc<dyn Wire>,
    contexts: Arc<ProtocolContexts>,
    scope: Scope,
    connected: Property<bool>,
    queue: Mutex<SendQueue>,
}

impl ExtWire {
    pub(crate) fn new(
        location: impl Into<String>,
        real: Arc<dyn Wire>,
        contexts: Arc<ProtocolContexts>,
        scope: Scope,
        connected: Property<bool>,
    ) -> Arc<Self> {
        let wire = Arc::new(Self {
            location: location.into(),
            real,
            contexts,
            scope: scope.clone(),
            connected,
            queue: Mutex::new(SendQueue::default()),
        });

        let weak: Weak<ExtWire> = Arc::downgrade(&wire);
        wire.connected.when_true(&scope, move || {
            if let Some(wire) = weak.upgrade() {
                wire.drain();
            }
        });

        let weak: Weak<ExtWire> = Arc::downgrade(&wire);
        scope.on_termination(move || {
            if let Some(wire) = weak.upgrade() {
                let dropped = std::mem::take(&mut wire.queue.lock().messages).len();
                if dropped > 0 {
                    debug!(ext = %wire.location, dropped, "scope terminated with queued messages");
                }
            }
        });
        wire
    }

    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    /// Messages waiting for the handshake.
    pub fn queued(&self) -> usize {
        self.queue.lock().messages.len()
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.set(connected);
    }

    fn drain(&self) {
        {
            let mut queue = self.queue.lock();
            if queue.draining || queue.messages.is_empty() {
                return;
            }
            queue.draining = true;
            debug!(ext = %self.location, queued = queue.messages.len(), "draining send queue");
        }

        loop {
            let message = {
                let mut queue = self.queue.lock();
                if !self.connected.get() || self.scope.is_cancelled() {
                    queue.draining = false;
                    return;
                }
                match queue.messages.pop_front() {
                    Some(message) => message,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };

            let result = {
                let _context = message.context.apply();
                self.real.send(message.id, message.payload.clone())
            };

            if let Err(err) = result {
                debug!(ext = %self.location, id = %message.id, %err, "send failed, requeueing");
                {
                    let mut queue = self.queue.lock();
                    queue.messages.push_front(message);
                    queue.draining = false;
                }
                self.connected.set(false);
                return;
            }
        }
    }
}

impl Wire for ExtWire {
    fn send(&self, id: RdId, payload: Bytes) -> Result<()> {
        if self.scope.is_cancelled() {
            debug!(ext = %self.location, %id, "extension terminated, send dropped");
            return Ok(());
        }

        {
            let mut queue = self.queue.lock();
            if queue.draining || !queue.messages.is_empty() || !self.connected.get() {
                queue.messages.push_back(QueuedMessage {
                    id,
                    payload,
                    context: self.contexts.snapshot(),
                });
                debug!(ext = %self.location, %id, queued = queue.messages.len(), "buffered");
                return Ok(());
            }
        }

        trace!(ext = %self.location, %id, len = payload.len(), "send");
        if let Err(err) = self.real.send(id, payload.clone()) {
            debug!(ext = %self.location, %id, %err, "send failed, requeueing");
            self.queue.lock().messages.push_front(QueuedMessage {
                id,
                payload,
                context: self.contexts.snapshot(),
            });
            self.connected.set(false);
        }
        Ok(())
    }

    fn advise(&self, scope: &Scope, id: RdId, receiver: Arc<dyn WireReceiver>) {
        self.real.advise(scope, id, receiver);
    }

    fn connected(&self) -> Property<bool> {
        self.connected.clone()
    }
}

impl fmt::Debug for ExtWire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtWire")
            .field("location", &self.location)
            .field("connected", &self.is_connected())
            .field("queued", &self.queued())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::thread;

    use parking_lot::Condvar;

    use super::*;
    use crate::error::RdError;
    use crate::reactive::ContextKey;
    use crate::wire::{MemoryWire, Reader, WireExt};

    /// Records each payload's first i32 and the `origin` context value seen
    /// while it was delivered.
    struct Recorder {
        origin: ContextKey,
        seen: Mutex<Vec<(i32, Option<String>)>>,
    }

    impl WireReceiver for Recorder {
        fn on_wire_received(&self, reader: &mut Reader<'_>) -> Result<()> {
            let value = reader.read_i32()?;
            self.seen.lock().push((value, self.origin.current()));
            Ok(())
        }
    }

    struct Fixture {
        scope: Scope,
        client: MemoryWire,
        ext: Arc<ExtWire>,
        recorder: Arc<Recorder>,
        origin: ContextKey,
    }

    const TARGET: RdId = RdId::new(42);

    fn fixture() -> Fixture {
        let (client, server) = MemoryWire::pair();
        let scope = Scope::new();
        let origin = ContextKey::new("origin");
        let contexts = Arc::new(ProtocolContexts::new());
        contexts.register(origin.clone());

        let recorder = Arc::new(Recorder {
            origin: origin.clone(),
            seen: Mutex::new(Vec::new()),
        });
        server.advise(&scope, TARGET, recorder.clone());

        let ext = ExtWire::new(
            "test",
            Arc::new(client.clone()),
            contexts,
            scope.child(),
            Property::new(false),
        );
        Fixture {
            scope,
            client,
            ext,
            recorder,
            origin,
        }
    }

    fn send(ext: &ExtWire, value: i32) {
        ext.send_with(TARGET, |w| {
            w.write_i32(value);
            Ok(())
        })
        .unwrap();
    }

    fn values(recorder: &Recorder) -> Vec<i32> {
        recorder.seen.lock().iter().map(|(v, _)| *v).collect()
    }

    #[test]
    fn buffers_until_connected_then_drains_in_order() {
        let f = fixture();
        for value in 1..=3 {
            send(&f.ext, value);
        }
        assert_eq!(f.ext.queued(), 3);
        assert_eq!(f.client.messages_written(), 0);

        f.ext.set_connected(true);
        assert_eq!(values(&f.recorder), vec![1, 2, 3]);
        assert_eq!(f.ext.queued(), 0);

        send(&f.ext, 4);
        assert_eq!(values(&f.recorder), vec![1, 2, 3, 4]);
    }

    #[test]
    fn reconnect_does_not_resend() {
        let f = fixture();
        send(&f.ext, 1);
        f.ext.set_connected(true);
        f.ext.set_connected(false);
        f.ext.set_connected(true);
        assert_eq!(values(&f.recorder), vec![1]);
    }

    #[test]
    fn replays_context_captured_at_send_time() {
        let f = fixture();
        {
            let _origin = f.origin.push(Some("typing".into()));
            send(&f.ext, 1);
        }
        send(&f.ext, 2);

        f.ext.set_connected(true);
        let seen = f.recorder.seen.lock().clone();
        assert_eq!(seen, vec![(1, Some("typing".to_string())), (2, None)]);
    }

    #[test]
    fn transport_failure_requeues_at_head() {
        let f = fixture();
        f.ext.set_connected(true);
        f.client.set_link_up(false);

        send(&f.ext, 1);
        assert!(!f.ext.is_connected());
        send(&f.ext, 2);
        assert_eq!(f.ext.queued(), 2);

        f.client.set_link_up(true);
        f.ext.set_connected(true);
        assert_eq!(values(&f.recorder), vec![1, 2]);
    }

    #[test]
    fn sends_after_termination_are_dropped() {
        let f = fixture();
        send(&f.ext, 1);
        f.scope.terminate();
        assert_eq!(f.ext.queued(), 0);

        send(&f.ext, 2);
        assert_eq!(f.ext.queued(), 0);
        assert_eq!(f.client.messages_written(), 0);
    }

    #[derive(Default)]
    struct GateState {
        /// Value whose send blocks until released.
        hold: Option<i32>,
        holding: bool,
        /// Value whose next send fails.
        refuse: Option<i32>,
        accepted: Vec<i32>,
    }

    /// Transport that records the first i32 of every accepted payload and
    /// can hold or refuse a chosen one.
    #[derive(Default)]
    struct Gate {
        state: Mutex<GateState>,
        changed: Condvar,
    }

    impl Gate {
        fn wait_until_holding(&self) {
            let mut state = self.state.lock();
            while !state.holding {
                self.changed.wait(&mut state);
            }
        }

        fn release(&self) {
            self.state.lock().hold = None;
            self.changed.notify_all();
        }

        fn accepted(&self) -> Vec<i32> {
            self.state.lock().accepted.clone()
        }
    }

    impl Wire for Gate {
        fn send(&self, _id: RdId, payload: Bytes) -> Result<()> {
            let value = Reader::new(&payload).read_i32()?;
            let mut state = self.state.lock();
            if state.refuse == Some(value) {
                state.refuse = None;
                return Err(RdError::Transport(format!("refused {value}")));
            }
            if state.hold == Some(value) {
                state.holding = true;
                self.changed.notify_all();
                while state.hold == Some(value) {
                    self.changed.wait(&mut state);
                }
            }
            state.accepted.push(value);
            Ok(())
        }

        fn advise(&self, _scope: &Scope, _id: RdId, _receiver: Arc<dyn WireReceiver>) {}

        fn connected(&self) -> Property<bool> {
            Property::new(true)
        }
    }

    fn gated(gate: &Arc<Gate>, scope: &Scope) -> Arc<ExtWire> {
        ExtWire::new(
            "gated",
            gate.clone(),
            Arc::new(ProtocolContexts::new()),
            scope.clone(),
            Property::new(false),
        )
    }

    #[test]
    fn send_during_drain_queues_behind_backlog() {
        let gate = Arc::new(Gate::default());
        gate.state.lock().hold = Some(1);
        let scope = Scope::new();
        let ext = gated(&gate, &scope);
        for value in 1..=3 {
            send(&ext, value);
        }

        let drainer = {
            let ext = ext.clone();
            thread::spawn(move || ext.set_connected(true))
        };
        gate.wait_until_holding();

        // The drain is parked inside the transport with 2 and 3 still queued.
        send(&ext, 4);
        assert_eq!(ext.queued(), 3);
        assert!(gate.accepted().is_empty());

        gate.release();
        drainer.join().unwrap();
        assert_eq!(gate.accepted(), vec![1, 2, 3, 4]);
        assert_eq!(ext.queued(), 0);
        assert!(ext.is_connected());
    }

    #[test]
    fn failure_during_drain_keeps_order_without_duplicates() {
        let gate = Arc::new(Gate::default());
        gate.state.lock().refuse = Some(2);
        let scope = Scope::new();
        let ext = gated(&gate, &scope);
        for value in 1..=3 {
            send(&ext, value);
        }

        ext.set_connected(true);
        assert!(!ext.is_connected());
        assert_eq!(gate.accepted(), vec![1]);
        assert_eq!(ext.queued(), 2);

        send(&ext, 4);
        assert_eq!(ext.queued(), 3);

        ext.set_connected(true);
        assert_eq!(gate.accepted(), vec![1, 2, 3, 4]);
        assert_eq!(ext.queued(), 0);
    }
}
