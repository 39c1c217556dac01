//! Graph node identifiers.
//!
//! An [`RdId`] names one node of the shared object graph. Both processes
//! must compute identical ids for identical `(parent, discriminator)`
//! pairs without talking to each other, so derivation uses a fixed
//! polynomial hash instead of `std::hash`:
//!
//! - strings fold over their UTF-16 code units: `acc = acc * 31 + unit`
//! - integers mix as `acc * 31 + (value + 1)`
//!
//! All arithmetic wraps on `i64`. The seed for a bare string hash is 19.
//! Changing any of this silently desynchronizes every peer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RdError, Result};

/// Ids below this counter value are reserved for statically declared nodes.
pub const MAX_STATIC_ID: i32 = 1_000_000;

/// Seed used when hashing a string that has no parent id.
pub const HASH_SEED: i64 = 19;

/// Platform independent string hash.
pub fn hash_str(value: &str, initial: i64) -> i64 {
    value
        .encode_utf16()
        .fold(initial, |acc, unit| acc.wrapping_mul(31).wrapping_add(unit as i64))
}

/// Platform independent hash of a 32-bit integer.
pub fn hash_int(value: i32, initial: i64) -> i64 {
    initial.wrapping_mul(31).wrapping_add(value.wrapping_add(1) as i64)
}

/// Platform independent hash of a 64-bit integer.
pub fn hash_long(value: i64, initial: i64) -> i64 {
    initial.wrapping_mul(31).wrapping_add(value.wrapping_add(1))
}

/// Identifier of a node in the object graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct RdId(i64);

impl RdId {
    /// The null id. Never assigned to a real node.
    pub const NULL: RdId = RdId(0);

    pub const fn new(hash: i64) -> Self {
        Self(hash)
    }

    /// Get the raw hash value.
    pub fn raw(&self) -> i64 {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// This id, or [`RdError::NullId`] if it is the null id.
    pub fn not_null(self) -> Result<Self> {
        if self.is_null() {
            Err(RdError::NullId)
        } else {
            Ok(self)
        }
    }

    /// Derive a child id from a name.
    pub fn mix(&self, tail: &str) -> RdId {
        RdId(hash_str(tail, self.0))
    }

    pub fn mix_int(&self, tail: i32) -> RdId {
        RdId(hash_int(tail, self.0))
    }

    pub fn mix_long(&self, tail: i64) -> RdId {
        RdId(hash_long(tail, self.0))
    }
}

impl From<i64> for RdId {
    fn from(hash: i64) -> Self {
        Self(hash)
    }
}

/// Ids render as unsigned decimal.
impl fmt::Display for RdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0 as u64)
    }
}

impl fmt::Debug for RdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RdId({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_hash_reference_values() {
        assert_eq!(hash_str("", HASH_SEED), 19);
        assert_eq!(hash_str("a", HASH_SEED), 19 * 31 + 97);
        assert_eq!(RdId::NULL.mix("top").raw(), 115_029);
    }

    #[test]
    fn string_hash_uses_utf16_units() {
        // U+1F600 is a surrogate pair: 0xD83D 0xDE00.
        let expected = (0xD83Di64).wrapping_mul(31).wrapping_add(0xDE00);
        assert_eq!(hash_str("\u{1F600}", 0), expected);
    }

    #[test]
    fn int_hash_adds_one() {
        assert_eq!(RdId::NULL.mix_int(MAX_STATIC_ID).raw(), 1_000_001);
        assert_eq!(RdId::new(2).mix_int(0).raw(), 63);
        assert_eq!(RdId::new(2).mix_long(-1).raw(), 62);
    }

    #[test]
    fn hash_wraps_instead_of_overflowing() {
        let id = RdId::new(i64::MAX).mix("overflow");
        assert_eq!(id, RdId::new(i64::MAX).mix("overflow"));
        assert_eq!(hash_int(i32::MAX, 0), i32::MIN as i64);
    }

    #[test]
    fn different_names_give_different_ids() {
        let parent = RdId::NULL.mix("protocol");
        let names = ["a", "b", "top", "Top", "InternRoot-x", ".InternRoot-x", "value", "values"];
        let ids: std::collections::HashSet<_> = names.iter().map(|n| parent.mix(n)).collect();
        assert_eq!(ids.len(), names.len());
    }

    #[test]
    fn null_id_is_rejected_as_real_id() {
        assert!(matches!(RdId::NULL.not_null(), Err(RdError::NullId)));
        assert!(RdId::NULL.mix("root").not_null().is_ok());
    }

    #[test]
    fn display_is_unsigned() {
        assert_eq!(RdId::new(-1).to_string(), u64::MAX.to_string());
        assert_eq!(RdId::new(42).to_string(), "42");
    }
}
