//! rdlink Core
//!
//! This crate implements the synchronization layer of the rdlink protocol:
//! two processes share a live object graph and changes on either side
//! reach the other over a byte-oriented wire.
//!
//! It provides:
//!
//! - Deterministic identities for graph nodes
//! - Reactive value holders (properties, optional properties, triggers)
//! - A per-subtree extension handshake that buffers traffic until both
//!   sides are ready
//! - Interning, so repeated values cross the wire once
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `lifetime`: hierarchical cancellable scopes
//! - `graph`: identifiers, identity allocation and schedulers
//! - `reactive`: signals, properties, triggers and ambient contexts
//! - `wire`: the wire abstraction, framing and an in-memory wire pair
//! - `serialization`: marshallers and the serialization context
//! - `intern`: intern roots
//! - `ext`: extensions and their buffering wire
//! - `nodes`: synchronized properties and signals
//! - `protocol`: the object tying one side of a connection together
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use rdlink_core::config::ProtocolConfig;
//! use rdlink_core::ext::RdExtension;
//! use rdlink_core::lifetime::Scope;
//! use rdlink_core::nodes::RdProperty;
//! use rdlink_core::protocol::Protocol;
//! use rdlink_core::serialization::Builtin;
//! use rdlink_core::wire::MemoryWire;
//!
//! let (client_wire, server_wire) = MemoryWire::pair();
//! let scope = Scope::new();
//! let client = Protocol::new(ProtocolConfig::client("ide"), Arc::new(client_wire), scope.clone());
//! let server = Protocol::new(ProtocolConfig::server("backend"), Arc::new(server_wire), scope.clone());
//!
//! let title = RdProperty::new(String::new(), Arc::new(Builtin));
//! let mirror = RdProperty::new(String::new(), Arc::new(Builtin));
//! let ext = RdExtension::builder("editor").member("title", title.member()).build();
//! let remote = RdExtension::builder("editor").member("title", mirror.member()).build();
//!
//! client.bind_static("editor", &ext.member()).unwrap();
//! title.set("main.rs".to_string()); // buffered until the handshake completes
//! server.bind_static("editor", &remote.member()).unwrap();
//!
//! assert_eq!(mirror.get(), "main.rs");
//! scope.terminate();
//! ```

pub mod config;
pub mod error;
pub mod ext;
pub mod graph;
pub mod intern;
pub mod lifetime;
pub mod nodes;
pub mod protocol;
pub mod reactive;
pub mod serialization;
pub mod wire;

pub use error::{RdError, Result};
