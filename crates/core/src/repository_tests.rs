// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::key::NaturalKey;
use crate::model::{Consultation, ConsultationStatus, NewPatient, Role, User};
use chrono::Utc;
use tempfile::TempDir;

fn consultation(code: &str, fee: i64) -> Consultation {
    Consultation::register(
        NaturalKey::parse(code).unwrap(),
        NewPatient {
            name: format!("patient {code}"),
            fee,
            ..NewPatient::default()
        },
        Utc::now(),
    )
}

fn repo() -> Repository {
    Repository::new(LocalStore::open_in_memory("ctx").unwrap())
}

#[test]
fn insert_and_find_by_key() {
    let repo = repo();
    repo.insert(consultation("C1A2B3", 500)).unwrap();
    repo.insert(consultation("C4D5E6", 200)).unwrap();

    let found: Consultation = repo.find_by_key("C1A2B3").unwrap().unwrap();
    assert_eq!(found.fee, 500);
    assert!(repo.find_by_key::<Consultation>("CZZZZZ").unwrap().is_none());

    let all: Vec<Consultation> = repo.get().unwrap();
    let codes: Vec<_> = all.iter().map(|c| c.natural_key()).collect();
    assert_eq!(codes, vec!["C1A2B3", "C4D5E6"]);
}

#[test]
fn insert_rejects_duplicate_key() {
    let repo = repo();
    repo.insert(consultation("C1A2B3", 500)).unwrap();
    let err = repo.insert(consultation("C1A2B3", 900)).unwrap_err();
    assert!(matches!(err, Error::DuplicateKey { .. }));
    assert_eq!(repo.get::<Consultation>().unwrap().len(), 1);
}

#[test]
fn update_by_key_returns_new_value() {
    let repo = repo();
    repo.insert(consultation("C1A2B3", 500)).unwrap();

    let updated: Consultation = repo
        .update_by_key("C1A2B3", |c: &mut Consultation| {
            c.status = ConsultationStatus::ProviderUpdated
        })
        .unwrap();
    assert_eq!(updated.status, ConsultationStatus::ProviderUpdated);

    let stored: Consultation = repo.find_by_key("C1A2B3").unwrap().unwrap();
    assert_eq!(stored.status, ConsultationStatus::ProviderUpdated);
}

#[test]
fn update_unknown_key_is_not_found() {
    let repo = repo();
    let err = repo
        .update_by_key("C0FFEE", |_: &mut Consultation| {})
        .unwrap_err();
    assert!(matches!(err, Error::RecordNotFound { .. }));
}

#[test]
fn put_replaces_snapshot_with_cas() {
    let repo = repo();
    repo.insert(consultation("C1A2B3", 500)).unwrap();

    let snap = repo.snapshot::<Consultation>().unwrap();
    let mut records = snap.value.clone();
    records.push(consultation("C4D5E6", 1));
    repo.put(&records, snap.version).unwrap();

    // Writing against the old version again conflicts.
    let err = repo.put(&records, snap.version).unwrap_err();
    assert!(matches!(err, Error::VersionConflict { .. }));
}

#[test]
fn concurrent_inserts_from_two_contexts_both_survive() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("local.db");
    let a = Repository::new(LocalStore::open(&path, "a").unwrap());
    let b = Repository::new(LocalStore::open(&path, "b").unwrap());

    let handles: Vec<_> = [(a, "CAAA"), (b, "CBBB")]
        .into_iter()
        .map(|(repo, prefix)| {
            std::thread::spawn(move || {
                for i in 0..20 {
                    repo.insert(consultation(&format!("{prefix}{i}"), i)).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let reader = Repository::new(LocalStore::open(&path, "reader").unwrap());
    assert_eq!(reader.get::<Consultation>().unwrap().len(), 40);
}

#[test]
fn merge_upserts_by_key() {
    let repo = repo();
    repo.insert(consultation("C1A2B3", 500)).unwrap();

    let mut changed = consultation("C1A2B3", 750);
    changed.remote_id = Some(9);
    repo.merge(&[changed, consultation("C4D5E6", 100)]).unwrap();

    let all: Vec<Consultation> = repo.get().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].fee, 750);
    assert_eq!(all[0].remote_id, Some(9));
}

#[test]
fn users_are_keyed_by_email() {
    let repo = repo();
    repo.insert(User::new("Jo", "jo@clinic.org", "pw", Role::Cashier, Utc::now()))
        .unwrap();
    let user: User = repo.find_by_key("jo@clinic.org").unwrap().unwrap();
    assert_eq!(user.role, Role::Cashier);
}

#[test]
fn session_lifecycle() {
    let repo = repo();
    assert!(repo.session().unwrap().is_none());

    let user = User::new("Jo", "jo@clinic.org", "pw", Role::Admin, Utc::now());
    repo.set_session(&user.session()).unwrap();
    assert_eq!(repo.session().unwrap().unwrap().role, Role::Admin);

    repo.clear_session().unwrap();
    assert!(repo.session().unwrap().is_none());
}
