//! Extensions
//!
//! - `state`: the handshake states and their wire codes
//! - `ext_wire`: [`ExtWire`], the buffering wire inside an extension
//! - `extension`: [`RdExtension`] and its handshake

pub mod ext_wire;
pub mod extension;
pub mod state;

pub use ext_wire::ExtWire;
pub use extension::{RdExtension, RdExtensionBuilder};
pub use state::ExtState;
