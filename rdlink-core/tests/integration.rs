//! Integration Tests for the Synchronization Layer
//!
//! These tests verify that identities, reactive holders, extensions and
//! interning work together across two protocols over an in-memory wire.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use rdlink_core::ext::RdExtension;
use rdlink_core::graph::{IdKind, Identities, RdId};
use rdlink_core::lifetime::Scope;
use rdlink_core::nodes::{RdProperty, RdSignal};
use rdlink_core::reactive::{OptProperty, Property, Trigger, TriggerSet};
use rdlink_core::serialization::{Builtin, SerdeMarshaller};
use rdlink_core::RdError;

use common::sides;

/// Test that derived ids match the reference values and stay distinct.
#[test]
fn identities_are_stable_and_distinct() {
    assert_eq!(RdId::NULL.mix("top").raw(), 115029);

    let parent = RdId::NULL.mix("top");
    let names = ["a", "b", "ab", "ba", "model", "Model", "", "top"];
    let mut ids: Vec<_> = names.iter().map(|n| parent.mix(n)).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), names.len());

    let client = Identities::new(IdKind::Client);
    let server = Identities::new(IdKind::Server);
    let from_client: Vec<_> = (0..100).map(|_| client.next(parent)).collect();
    let from_server: Vec<_> = (0..100).map(|_| server.next(parent)).collect();
    assert!(from_client.iter().all(|id| !from_server.contains(id)));
}

/// Test the notification contract shared by every holder.
#[test]
fn holders_notify_once_per_change_and_replay() {
    let property = Property::new(0);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let _sub = property.change().subscribe(move |v: &i32| seen_clone.lock().push(*v));

    property.set(1);
    property.set(1);
    property.set(2);
    assert_eq!(*seen.lock(), vec![1, 2]);

    let late = Arc::new(Mutex::new(Vec::new()));
    let late_clone = late.clone();
    let _late = property.subscribe(move |v| late_clone.lock().push(*v));
    property.set(3);
    assert_eq!(*late.lock(), vec![2, 3]);

    let optional: OptProperty<i32> = OptProperty::new();
    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = count.clone();
    let _opt = optional.subscribe(move |_| {
        count_clone.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(count.load(Ordering::SeqCst), 0);
    optional.set(0);
    optional.set(0);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

/// Test that a trigger accepts an equal rewrite and rejects a different one.
#[test]
fn trigger_is_write_once() {
    let trigger = Trigger::new();
    assert_eq!(trigger.set("A".to_string()).unwrap(), TriggerSet::Fired);
    assert_eq!(trigger.set("A".to_string()).unwrap(), TriggerSet::AlreadySet);

    let err = trigger.set("B".to_string()).unwrap_err();
    assert!(matches!(err, RdError::TriggerConflict { .. }));
    assert_eq!(trigger.value_or_none().as_deref(), Some("A"));
}

/// Test that properties inside an extension sync after the handshake.
#[test]
fn extension_properties_sync_after_handshake() {
    let (client, server) = sides();

    let client_title = RdProperty::new(String::new(), Arc::new(Builtin));
    let server_title = RdProperty::new(String::new(), Arc::new(Builtin));
    let client_ext = RdExtension::builder("editor")
        .member("title", client_title.member())
        .build();
    let server_ext = RdExtension::builder("editor")
        .member("title", server_title.member())
        .build();

    client.proto.bind_static("editor", &client_ext.member()).unwrap();
    client_title.set("draft".into());
    assert_eq!(client_ext.queued(), 1);

    server.proto.bind_static("editor", &server_ext.member()).unwrap();
    assert!(client_ext.is_connected());
    assert_eq!(server_title.get(), "draft");

    server_title.set("final".into());
    assert_eq!(client_title.get(), "final");
}

/// Test that serde types travel through signals.
#[test]
fn serde_values_travel_through_signals() {
    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Caret {
        line: u32,
        column: u32,
    }

    let (client, server) = sides();
    let on_client: RdSignal<Caret> = RdSignal::new(Arc::new(SerdeMarshaller::new()));
    let on_server: RdSignal<Caret> = RdSignal::new(Arc::new(SerdeMarshaller::new()));
    client.proto.bind_static("caret", &on_client.member()).unwrap();
    server.proto.bind_static("caret", &on_server.member()).unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let received_clone = received.clone();
    on_server.advise(&server.scope, move |c: &Caret| received_clone.lock().push(c.clone()));

    on_client.fire(&Caret { line: 1, column: 2 });
    on_client.fire(&Caret { line: 3, column: 4 });
    assert_eq!(
        *received.lock(),
        vec![Caret { line: 1, column: 2 }, Caret { line: 3, column: 4 }]
    );
}

/// Test the full "intern before connect" scenario: nothing reaches the
/// transport while the link is down, then the interned value goes first,
/// followed by the rest of the buffered traffic in submission order.
#[test]
fn intern_before_connect() {
    let (a, b) = sides();
    a.wire.set_link_up(false);

    let a_label = RdProperty::interned(String::new(), Arc::new(Builtin), "Protocol");
    let a_count = RdProperty::new(0i32, Arc::new(Builtin));
    let a_top = RdExtension::builder("top")
        .intern_root("Protocol")
        .member("label", a_label.member())
        .member("count", a_count.member())
        .build();

    let b_label = RdProperty::interned(String::new(), Arc::new(Builtin), "Protocol");
    let b_count = RdProperty::new(0i32, Arc::new(Builtin));
    let b_top = RdExtension::builder("top")
        .intern_root("Protocol")
        .member("label", b_label.member())
        .member("count", b_count.member())
        .build();

    a.proto.bind_static("top", &a_top.member()).unwrap();
    b.proto.bind_static("top", &b_top.member()).unwrap();

    let root = a_top.bound_intern_root("Protocol").unwrap();
    let ctx = a_top.protocol().unwrap().serialization_ctx().clone();
    let id = root.intern(&ctx, &Builtin, &"hello".to_string()).unwrap();
    assert!(id.is_valid());
    a_label.set("hello".into());
    a_count.set(1);
    a_count.set(2);

    assert_eq!(a.wire.bytes_written(), 0);
    assert_eq!(a_top.queued(), 4);

    a.wire.set_link_up(true);
    assert!(a_top.is_connected());
    assert!(b_top.is_connected());
    assert_eq!(b_label.get(), "hello");
    assert_eq!(b_count.get(), 2);

    let top = a_top.rd_id();
    let traffic: Vec<_> = a.tap.sent().into_iter().filter(|id| *id != top).collect();
    assert_eq!(
        traffic,
        vec![root.rd_id(), a_label.rd_id(), a_count.rd_id(), a_count.rd_id()]
    );
}

/// Test that a trigger wait observes an extension handshake completing on
/// another thread.
#[test]
fn trigger_wait_sees_handshake() {
    let (client, server) = sides();
    let client_ext = RdExtension::builder("model").build();
    let server_ext = RdExtension::builder("model").build();
    client.proto.bind_static("model", &client_ext.member()).unwrap();

    let connected = Trigger::new();
    let connected_clone = connected.clone();
    client_ext.connected().when_true(&client.scope, move || {
        let _ = connected_clone.set(true);
    });

    let server_proto = server.proto.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        server_proto.bind_static("model", &server_ext.member()).unwrap();
        server_ext
    });

    assert!(connected.wait(&Scope::new(), Duration::from_secs(5), None));
    let server_ext = handle.join().unwrap();
    assert!(server_ext.is_connected());
}

/// Test that both halves of a property can be set from their own threads
/// at the same time and still sync afterwards.
#[test]
fn concurrent_sets_on_both_halves() {
    let (client, server) = sides();
    let on_client = RdProperty::new(0i32, Arc::new(Builtin));
    let on_server = RdProperty::new(0i32, Arc::new(Builtin));
    client.proto.bind_static("count", &on_client.member()).unwrap();
    server.proto.bind_static("count", &on_server.member()).unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let workers: Vec<_> = [on_client.clone(), on_server.clone()]
        .into_iter()
        .map(|property| {
            let done = done_tx.clone();
            thread::spawn(move || {
                for v in 1..=2000 {
                    property.set(v);
                }
                done.send(()).unwrap();
            })
        })
        .collect();

    for _ in 0..workers.len() {
        done_rx
            .recv_timeout(Duration::from_secs(30))
            .expect("property setters are stuck");
    }
    for worker in workers {
        worker.join().unwrap();
    }

    on_client.set(-1);
    assert_eq!(on_server.get(), -1);
    on_server.set(-2);
    assert_eq!(on_client.get(), -2);
}
