//! Serialization
//!
//! - `marshaller`: the [`Marshaller`] trait, the [`Serializers`] registry
//!   and the built-in codecs
//! - `ctx`: [`SerializationCtx`], the per-call context that knows which
//!   intern roots are active

pub mod ctx;
pub mod marshaller;

pub use ctx::{InternRootOwner, SerializationCtx};
pub use marshaller::{schema_hash, Builtin, Marshaller, SerdeMarshaller, Serializers};
