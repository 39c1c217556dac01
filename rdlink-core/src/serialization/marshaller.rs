//! Marshallers and the marshaller registry.
//!
//! A [`Marshaller<T>`] encodes and decodes one type. Generated model code
//! registers marshallers for its types in a [`Serializers`] registry; the
//! registry hands them back by type.
//!
//! Two implementations ship with the crate:
//!
//! - [`Builtin`]: `bool`, `i32`, `i64`, `String`, `Vec<u8>`
//! - [`SerdeMarshaller<T>`]: any serde type, MessagePack-encoded as a
//!   length-prefixed blob

use std::any::{type_name, Any, TypeId};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::SerializationCtx;
use crate::error::{RdError, Result};
use crate::graph::{hash_str, HASH_SEED};
use crate::wire::{Reader, Writer};

/// Encoder/decoder for values of type `T`.
pub trait Marshaller<T>: Send + Sync {
    fn read(&self, ctx: &SerializationCtx, reader: &mut Reader<'_>) -> Result<T>;
    fn write(&self, ctx: &SerializationCtx, writer: &mut Writer, value: &T) -> Result<()>;
}

/// Marshaller for the primitive types every protocol understands.
#[derive(Debug, Default, Clone, Copy)]
pub struct Builtin;

impl Marshaller<bool> for Builtin {
    fn read(&self, _: &SerializationCtx, reader: &mut Reader<'_>) -> Result<bool> {
        reader.read_bool()
    }

    fn write(&self, _: &SerializationCtx, writer: &mut Writer, value: &bool) -> Result<()> {
        writer.write_bool(*value);
        Ok(())
    }
}

impl Marshaller<i32> for Builtin {
    fn read(&self, _: &SerializationCtx, reader: &mut Reader<'_>) -> Result<i32> {
        reader.read_i32()
    }

    fn write(&self, _: &SerializationCtx, writer: &mut Writer, value: &i32) -> Result<()> {
        writer.write_i32(*value);
        Ok(())
    }
}

impl Marshaller<i64> for Builtin {
    fn read(&self, _: &SerializationCtx, reader: &mut Reader<'_>) -> Result<i64> {
        reader.read_i64()
    }

    fn write(&self, _: &SerializationCtx, writer: &mut Writer, value: &i64) -> Result<()> {
        writer.write_i64(*value);
        Ok(())
    }
}

impl Marshaller<String> for Builtin {
    fn read(&self, _: &SerializationCtx, reader: &mut Reader<'_>) -> Result<String> {
        reader.read_string()
    }

    fn write(&self, _: &SerializationCtx, writer: &mut Writer, value: &String) -> Result<()> {
        writer.write_string(value);
        Ok(())
    }
}

impl Marshaller<Vec<u8>> for Builtin {
    fn read(&self, _: &SerializationCtx, reader: &mut Reader<'_>) -> Result<Vec<u8>> {
        Ok(reader.read_bytes()?.to_vec())
    }

    fn write(&self, _: &SerializationCtx, writer: &mut Writer, value: &Vec<u8>) -> Result<()> {
        writer.write_bytes(value);
        Ok(())
    }
}

/// MessagePack marshaller for serde types.
pub struct SerdeMarshaller<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeMarshaller<T> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T> Default for SerdeMarshaller<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Marshaller<T> for SerdeMarshaller<T>
where
    T: Serialize + DeserializeOwned,
{
    fn read(&self, _: &SerializationCtx, reader: &mut Reader<'_>) -> Result<T> {
        let blob = reader.read_bytes()?;
        Ok(rmp_serde::from_slice(blob)?)
    }

    fn write(&self, _: &SerializationCtx, writer: &mut Writer, value: &T) -> Result<()> {
        let blob = rmp_serde::to_vec(value)?;
        writer.write_bytes(&blob);
        Ok(())
    }
}

/// Registry of marshallers, keyed by type.
#[derive(Default)]
pub struct Serializers {
    marshallers: DashMap<TypeId, (&'static str, Arc<dyn Any + Send + Sync>)>,
    toplevels: Mutex<HashSet<String>>,
}

impl Serializers {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the [`Builtin`] marshallers.
    pub fn with_builtins() -> Self {
        let serializers = Self::new();
        serializers.register::<bool>(Arc::new(Builtin));
        serializers.register::<i32>(Arc::new(Builtin));
        serializers.register::<i64>(Arc::new(Builtin));
        serializers.register::<String>(Arc::new(Builtin));
        serializers.register::<Vec<u8>>(Arc::new(Builtin));
        serializers
    }

    /// Register (or replace) the marshaller for `T`.
    pub fn register<T: 'static>(&self, marshaller: Arc<dyn Marshaller<T>>) {
        self.marshallers
            .insert(TypeId::of::<T>(), (type_name::<T>(), Arc::new(marshaller)));
    }

    /// The marshaller registered for `T`.
    pub fn get<T: 'static>(&self) -> Result<Arc<dyn Marshaller<T>>> {
        self.marshallers
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value().1.downcast_ref::<Arc<dyn Marshaller<T>>>().cloned())
            .ok_or(RdError::NoMarshaller(type_name::<T>()))
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.marshallers.contains_key(&TypeId::of::<T>())
    }

    /// Run `register` the first time `key` is seen. Toplevel models call
    /// this when they bind so their types are registered exactly once.
    pub fn register_toplevel_once<F>(&self, key: &str, register: F)
    where
        F: FnOnce(&Serializers),
    {
        let first = self.toplevels.lock().insert(key.to_string());
        if first {
            register(self);
        }
    }

    /// Names of every registered type, sorted.
    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.marshallers.iter().map(|entry| entry.value().0).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for Serializers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Serializers")
            .field("types", &self.registered_types())
            .finish()
    }
}

/// Serialization compatibility hash of a schema, from its type names in
/// declaration order.
pub fn schema_hash(type_names: &[&str]) -> i64 {
    type_names
        .iter()
        .fold(HASH_SEED, |acc, name| hash_str(name, acc))
}
