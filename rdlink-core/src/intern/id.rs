//! Intern ids.
//!
//! An id is a fixed-width `i32`. Zero means "not interned, value follows
//! inline". For every other id the low bit says who allocated it, seen
//! from the holder's side: `0` for this side, `1` for the counterpart.
//! Locally allocated ids are `(index + 1) << 1`.
//!
//! Ids travel from the sender's point of view and are flipped on receipt,
//! so both sides can allocate concurrently without colliding.

use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InternId(i32);

impl InternId {
    /// "Send inline".
    pub const INVALID: InternId = InternId(0);

    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub(crate) fn local(index: usize) -> Self {
        Self(((index as i32) + 1) << 1)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Allocated by this side.
    pub const fn is_local(self) -> bool {
        self.is_valid() && self.0 & 1 == 0
    }

    /// The same id as the counterpart sees it.
    pub const fn flip(self) -> Self {
        if self.is_valid() {
            Self(self.0 ^ 1)
        } else {
            self
        }
    }

    /// Slot of a locally allocated id.
    pub(crate) fn local_index(self) -> Option<usize> {
        if self.is_local() && self.0 > 0 {
            Some(((self.0 >> 1) - 1) as usize)
        } else {
            None
        }
    }
}

impl fmt::Debug for InternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            let owner = if self.is_local() { "local" } else { "remote" };
            write!(f, "InternId({}, {owner})", self.0)
        } else {
            f.write_str("InternId(INVALID)")
        }
    }
}

impl fmt::Display for InternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
