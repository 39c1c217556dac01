//! Serialization Context
//!
//! A [`SerializationCtx`] travels with every read and write. It carries
//! the marshaller registry and the intern roots that are active for the
//! subtree being serialized.
//!
//! Contexts are immutable. Deriving one for a subtree
//! ([`SerializationCtx::with_intern_roots_here`]) copies the root table
//! and leaves the parent untouched, so sibling subtrees never see each
//! other's roots.
//!
//! # Interned fields
//!
//! ```text
//! no root under key:   [value]
//! root, value interned: [id: i32]
//! root, not interned:  [0: i32][value]
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{Marshaller, Serializers};
use crate::error::Result;
use crate::intern::{InternId, InternRoot};
use crate::wire::{Reader, Writer};

/// Something intern roots can be created under, typically an extension.
pub trait InternRootOwner {
    /// The root for `key`, created on first request.
    fn intern_root(&self, key: &str) -> Arc<InternRoot>;
}

/// Per-call serialization state.
#[derive(Clone)]
pub struct SerializationCtx {
    serializers: Arc<Serializers>,
    intern_roots: Arc<HashMap<String, Arc<InternRoot>>>,
}

impl SerializationCtx {
    pub fn new(serializers: Arc<Serializers>) -> Self {
        Self {
            serializers,
            intern_roots: Arc::new(HashMap::new()),
        }
    }

    pub fn serializers(&self) -> &Arc<Serializers> {
        &self.serializers
    }

    pub fn intern_root(&self, key: &str) -> Option<&Arc<InternRoot>> {
        self.intern_roots.get(key)
    }

    /// A derived context with `root` registered under `key`.
    pub fn with_intern_root(&self, key: impl Into<String>, root: Arc<InternRoot>) -> Self {
        let mut roots = (*self.intern_roots).clone();
        roots.insert(key.into(), root);
        Self {
            serializers: self.serializers.clone(),
            intern_roots: Arc::new(roots),
        }
    }

    /// A derived context with one root per key, each owned by `owner`.
    ///
    /// Keys already present are overridden for the derived context only.
    pub fn with_intern_roots_here<O>(&self, owner: &O, keys: &[&str]) -> Self
    where
        O: InternRootOwner + ?Sized,
    {
        if keys.is_empty() {
            return self.clone();
        }
        let mut roots = (*self.intern_roots).clone();
        for key in keys {
            roots.insert(key.to_string(), owner.intern_root(key));
        }
        Self {
            serializers: self.serializers.clone(),
            intern_roots: Arc::new(roots),
        }
    }

    /// Write `value` as an interned field of the root under `key`.
    pub fn write_interned<T, M>(&self, writer: &mut Writer, value: &T, key: &str, marshaller: &M) -> Result<()>
    where
        M: Marshaller<T> + ?Sized,
    {
        let Some(root) = self.intern_roots.get(key) else {
            return marshaller.write(self, writer, value);
        };

        let mut encoded = Writer::new();
        marshaller.write(self, &mut encoded, value)?;
        let encoded = encoded.freeze();

        let id = root.intern_bytes(encoded.clone())?;
        writer.write_i32(id.raw());
        if !id.is_valid() {
            writer.write_raw(&encoded);
        }
        Ok(())
    }

    /// Read an interned field written by [`SerializationCtx::write_interned`].
    pub fn read_interned<T, M>(&self, reader: &mut Reader<'_>, key: &str, marshaller: &M) -> Result<T>
    where
        M: Marshaller<T> + ?Sized,
    {
        let Some(root) = self.intern_roots.get(key) else {
            return marshaller.read(self, reader);
        };

        let id = InternId::new(reader.read_i32()?);
        if !id.is_valid() {
            return marshaller.read(self, reader);
        }
        let encoded = root.unintern(id)?;
        marshaller.read(self, &mut Reader::new(&encoded))
    }
}

impl fmt::Debug for SerializationCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.intern_roots.keys().collect();
        keys.sort();
        f.debug_struct("SerializationCtx")
            .field("intern_roots", &keys)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
