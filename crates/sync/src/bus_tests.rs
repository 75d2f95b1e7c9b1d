// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for the message bus.

#![allow(clippy::unwrap_used)]

use super::*;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tm_core::{NaturalKey, Role};

fn sync_done(delivered: usize) -> BusEvent {
    BusEvent::SyncCompleted {
        delivered,
        remaining: 0,
    }
}

fn bus_on(path: &Path, writer: &str, channel: Option<EphemeralChannel>) -> MessageBus {
    let store = LocalStore::open(path, writer).unwrap();
    MessageBus::open(store, BusConfig::default(), channel).unwrap()
}

/// Collects every delivered message.
fn recorder(bus: &MessageBus) -> Arc<Mutex<Vec<BusMessage>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.on_message(move |msg| sink.lock().unwrap().push(msg.clone()));
    seen
}

#[test]
fn publish_delivers_to_own_handlers_once() {
    let bus = MessageBus::open(
        LocalStore::open_in_memory("a").unwrap(),
        BusConfig::default(),
        None,
    )
    .unwrap();
    let got = recorder(&bus);

    let msg = bus.publish(sync_done(1), Recipient::All).unwrap();
    assert_eq!(got.lock().unwrap().len(), 1);
    assert_eq!(got.lock().unwrap()[0].id, msg.id);

    // Our own signal is not redelivered.
    assert_eq!(bus.pump().unwrap(), 0);
    assert_eq!(got.lock().unwrap().len(), 1);
}

#[test]
fn fallback_signal_reaches_other_context() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("local.db");
    let a = bus_on(&path, "a", None);
    let b = bus_on(&path, "b", None);
    let got = recorder(&b);

    let msg = a
        .publish(
            BusEvent::ProviderUpdate {
                consultation_code: NaturalKey::parse("C1A2B3").unwrap(),
                patient_name: Some("Amina".into()),
                notes: Some("rest".into()),
                contact: None,
            },
            Recipient::Role(Role::Pharmacist),
        )
        .unwrap();

    assert_eq!(b.pump().unwrap(), 1);
    assert_eq!(got.lock().unwrap()[0], msg);
    assert_eq!(b.pump().unwrap(), 0);
}

#[test]
fn dual_transport_delivery_is_deduplicated() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("local.db");
    let channel = EphemeralChannel::default();
    let a = bus_on(&path, "a", Some(channel.clone()));
    let b = bus_on(&path, "b", Some(channel));
    let got_a = recorder(&a);
    let got_b = recorder(&b);

    a.publish(sync_done(1), Recipient::All).unwrap();

    assert_eq!(b.pump().unwrap(), 1);
    assert_eq!(got_b.lock().unwrap().len(), 1);
    // The publisher's own channel echo is dropped as a duplicate.
    assert_eq!(a.pump().unwrap(), 0);
    assert_eq!(got_a.lock().unwrap().len(), 1);

    let log = b.messages(|_| true).unwrap();
    assert_eq!(log.len(), 1);
}

#[test]
fn overwritten_signal_is_recovered_from_log() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("local.db");
    let a = bus_on(&path, "a", None);
    let b = bus_on(&path, "b", None);
    let got = recorder(&b);

    a.publish(sync_done(1), Recipient::All).unwrap();
    a.publish(sync_done(2), Recipient::All).unwrap();

    assert_eq!(b.pump().unwrap(), 2);
    assert_eq!(got.lock().unwrap().len(), 2);
}

#[test]
fn own_later_signal_does_not_hide_foreign_message() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("local.db");
    let a = bus_on(&path, "a", None);
    let b = bus_on(&path, "b", None);
    let got = recorder(&b);

    a.publish(sync_done(1), Recipient::All).unwrap();
    b.publish(sync_done(2), Recipient::All).unwrap();

    assert_eq!(b.pump().unwrap(), 1);
    assert_eq!(got.lock().unwrap().len(), 2);
}

#[test]
fn signals_from_before_open_are_not_replayed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("local.db");
    let a = bus_on(&path, "a", None);
    a.publish(sync_done(1), Recipient::All).unwrap();

    let late = bus_on(&path, "late", None);
    let got = recorder(&late);
    assert_eq!(late.pump().unwrap(), 0);
    assert!(got.lock().unwrap().is_empty());
}

#[test]
fn publish_stamps_sender_role_from_session() {
    let store = LocalStore::open_in_memory("a").unwrap();
    store
        .set(
            keys::SESSION,
            &Session {
                email: "p@clinic.org".into(),
                role: Role::Provider,
                name: "P".into(),
            },
        )
        .unwrap();
    let bus = MessageBus::open(store, BusConfig::default(), None).unwrap();

    let msg = bus.publish(sync_done(0), Recipient::All).unwrap();
    assert_eq!(msg.from_role, Some(Role::Provider));
}

#[test]
fn log_is_capped_oldest_first() {
    let config = BusConfig {
        log_capacity: 3,
        ..BusConfig::default()
    };
    let bus = MessageBus::open(LocalStore::open_in_memory("a").unwrap(), config, None).unwrap();
    for n in 0..5 {
        bus.publish(sync_done(n), Recipient::All).unwrap();
    }

    let kept: Vec<_> = bus
        .messages(|_| true)
        .unwrap()
        .into_iter()
        .map(|m| match m.event {
            BusEvent::SyncCompleted { delivered, .. } => delivered,
            _ => usize::MAX,
        })
        .collect();
    assert_eq!(kept, vec![2, 3, 4]);
}

#[test]
fn messages_filter_by_recipient() {
    let bus = MessageBus::open(
        LocalStore::open_in_memory("a").unwrap(),
        BusConfig::default(),
        None,
    )
    .unwrap();
    bus.publish(sync_done(0), Recipient::Role(Role::Admin)).unwrap();
    bus.publish(sync_done(0), Recipient::All).unwrap();

    let for_cashier = bus.messages(|m| m.is_for(Role::Cashier)).unwrap();
    assert_eq!(for_cashier.len(), 1);
}

#[test]
fn seen_set_forgets_oldest_beyond_capacity() {
    let mut seen = SeenSet::new(2);
    assert!(seen.insert("a"));
    assert!(seen.insert("b"));
    assert!(!seen.insert("a"));
    assert!(seen.insert("c"));
    // "a" fell out of the window.
    assert!(seen.insert("a"));
    assert!(!seen.insert("c"));
}

#[tokio::test]
async fn listen_delivers_foreign_messages() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("local.db");
    let a = bus_on(&path, "a", None);
    let config = BusConfig {
        poll_interval_ms: 10,
        ..BusConfig::default()
    };
    let b = Arc::new(MessageBus::open(LocalStore::open(&path, "b").unwrap(), config, None).unwrap());

    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    b.on_message(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let listener = {
        let b = Arc::clone(&b);
        tokio::spawn(async move { b.listen().await })
    };

    a.publish(sync_done(1), Recipient::All).unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while count.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    listener.abort();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn small_dedupe_window_does_not_redeliver_logged_messages() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("local.db");
    let a = bus_on(&path, "a", None);
    let config = BusConfig {
        dedupe_window: 2,
        ..BusConfig::default()
    };
    let b = MessageBus::open(LocalStore::open(&path, "b").unwrap(), config, None).unwrap();
    let got = recorder(&b);

    for n in 0..3 {
        a.publish(sync_done(n), Recipient::All).unwrap();
        assert_eq!(b.pump().unwrap(), 1);
    }
    assert_eq!(b.pump().unwrap(), 0);

    let ids: Vec<_> = got.lock().unwrap().iter().map(|m| m.id.clone()).collect();
    assert_eq!(ids.len(), 3);
    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), 3);
}

/// Makes every write to the message log fail.
fn break_message_log(path: &Path) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(&format!(
        "CREATE TRIGGER no_log_insert BEFORE INSERT ON kv WHEN NEW.key = '{key}'
         BEGIN SELECT RAISE(ABORT, 'log unavailable'); END;
         CREATE TRIGGER no_log_update BEFORE UPDATE ON kv WHEN NEW.key = '{key}'
         BEGIN SELECT RAISE(ABORT, 'log unavailable'); END;",
        key = keys::MESSAGES,
    ))
    .unwrap();
}

#[test]
fn publish_delivers_locally_when_log_write_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("local.db");
    let a = bus_on(&path, "a", None);
    let got = recorder(&a);
    break_message_log(&path);

    let msg = a.publish(sync_done(1), Recipient::All).unwrap();
    assert_eq!(got.lock().unwrap().len(), 1);
    assert_eq!(got.lock().unwrap()[0].id, msg.id);
    assert!(a.messages(|_| true).unwrap().is_empty());
}

#[test]
fn pump_keeps_channel_messages_when_log_write_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("local.db");
    let channel = EphemeralChannel::default();
    let a = bus_on(&path, "a", Some(channel.clone()));
    let b = bus_on(&path, "b", Some(channel));
    let got = recorder(&b);
    break_message_log(&path);

    let msg = a.publish(sync_done(1), Recipient::All).unwrap();
    assert_eq!(b.pump().unwrap(), 1);
    assert_eq!(got.lock().unwrap()[0].id, msg.id);
    assert_eq!(b.pump().unwrap(), 0);
}
