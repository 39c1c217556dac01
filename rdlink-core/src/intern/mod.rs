//! Interning
//!
//! - `id`: [`InternId`] and its ownership bit
//! - `root`: [`InternRoot`], the per-subtree value cache

pub mod id;
pub mod root;

pub use id::InternId;
pub use root::InternRoot;
