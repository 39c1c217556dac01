//! Dynamic identity allocation.
//!
//! Nodes created at runtime (not declared in a schema) get ids from an
//! [`Identities`] allocator. Each side of a connection owns one: the
//! client counts `1_000_000, 1_000_002, ...` and the server
//! `1_000_001, 1_000_003, ...`, so both can allocate concurrently without
//! ever producing the same id for the same parent.

use std::sync::atomic::{AtomicI32, Ordering};

use serde::{Deserialize, Serialize};

use super::id::{RdId, MAX_STATIC_ID};

/// Which side of the protocol an allocator serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdKind {
    Client,
    Server,
}

impl IdKind {
    fn base(self) -> i32 {
        match self {
            IdKind::Client => MAX_STATIC_ID,
            IdKind::Server => MAX_STATIC_ID + 1,
        }
    }
}

/// Allocator of dynamic child identifiers.
#[derive(Debug)]
pub struct Identities {
    kind: IdKind,
    counter: AtomicI32,
}

impl Identities {
    pub fn new(kind: IdKind) -> Self {
        Self {
            kind,
            counter: AtomicI32::new(kind.base()),
        }
    }

    pub fn kind(&self) -> IdKind {
        self.kind
    }

    /// Derive the next dynamic child id of `parent`.
    pub fn next(&self, parent: RdId) -> RdId {
        let id = parent.mix_int(self.counter.fetch_add(2, Ordering::Relaxed));
        #[cfg(debug_assertions)]
        collisions::record(id);
        id
    }
}

#[cfg(debug_assertions)]
mod collisions {
    use std::sync::OnceLock;

    use dashmap::DashSet;
    use tracing::warn;

    use super::RdId;

    static ALLOCATED: OnceLock<DashSet<RdId>> = OnceLock::new();

    pub(super) fn record(id: RdId) {
        let allocated = ALLOCATED.get_or_init(DashSet::new);
        if !allocated.insert(id) {
            warn!(%id, "dynamic id allocated twice in this process");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn client_and_server_ranges_are_disjoint() {
        let parent = RdId::NULL.mix("disjoint");
        let client = Identities::new(IdKind::Client);
        let server = Identities::new(IdKind::Server);

        let client_ids: HashSet<_> = (0..500).map(|_| client.next(parent)).collect();
        let server_ids: HashSet<_> = (0..500).map(|_| server.next(parent)).collect();

        assert_eq!(client_ids.len(), 500);
        assert_eq!(server_ids.len(), 500);
        assert!(client_ids.is_disjoint(&server_ids));
    }

    #[test]
    fn allocation_is_deterministic() {
        let parent = RdId::NULL.mix("deterministic");
        let first = Identities::new(IdKind::Server);
        let second = Identities::new(IdKind::Server);

        for _ in 0..10 {
            assert_eq!(first.next(parent), second.next(parent));
        }
    }

    #[test]
    fn first_ids_match_counter_bases() {
        let client = Identities::new(IdKind::Client);
        let server = Identities::new(IdKind::Server);
        assert_eq!(client.next(RdId::new(5)), RdId::new(5).mix_int(MAX_STATIC_ID));
        assert_eq!(server.next(RdId::new(5)), RdId::new(5).mix_int(MAX_STATIC_ID + 1));
        assert_eq!(client.next(RdId::new(5)), RdId::new(5).mix_int(MAX_STATIC_ID + 2));
    }

    #[test]
    fn id_kind_from_json() {
        let kind: IdKind = serde_json::from_str("\"server\"").unwrap();
        assert_eq!(kind, IdKind::Server);
    }
}
