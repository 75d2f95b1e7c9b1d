// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for the in-memory remote store.

#![allow(clippy::unwrap_used)]

use super::*;
use serde_json::json;

fn row(code: &str, fee: i64) -> Value {
    json!({"consultation_code": code, "patient_name": "Amina", "fee": fee})
}

#[tokio::test]
async fn upsert_inserts_once_per_key() {
    let remote = MemoryRemoteStore::new();
    remote
        .upsert_by_natural_key("consultations", "consultation_code", row("C1A2B3", 500))
        .await
        .unwrap();
    remote
        .upsert_by_natural_key("consultations", "consultation_code", row("C1A2B3", 999))
        .await
        .unwrap();

    let rows = remote.rows("consultations");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["fee"], 500);
    assert!(rows[0]["id"].is_i64());
    assert_eq!(remote.upsert_calls(), 2);
}

#[tokio::test]
async fn unreachable_remote_is_transient() {
    let remote = MemoryRemoteStore::new();
    remote.set_reachable(false);
    let err = remote
        .upsert_by_natural_key("consultations", "consultation_code", row("C1A2B3", 500))
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert!(remote.rows("consultations").is_empty());

    remote.set_reachable(true);
    remote
        .upsert_by_natural_key("consultations", "consultation_code", row("C1A2B3", 500))
        .await
        .unwrap();
    assert_eq!(remote.rows("consultations").len(), 1);
}

#[tokio::test]
async fn rejected_key_is_not_transient() {
    let remote = MemoryRemoteStore::new();
    remote.reject_key("C1A2B3");
    let err = remote
        .upsert_by_natural_key("consultations", "consultation_code", row("C1A2B3", 500))
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Rejected(_)));
    assert!(!err.is_transient());

    remote.accept_key("C1A2B3");
    remote
        .upsert_by_natural_key("consultations", "consultation_code", row("C1A2B3", 500))
        .await
        .unwrap();
}

#[tokio::test]
async fn update_merges_fields_or_reports_not_found() {
    let remote = MemoryRemoteStore::new();
    remote
        .upsert_by_natural_key("consultations", "consultation_code", row("C1A2B3", 500))
        .await
        .unwrap();

    let mut patch = Map::new();
    patch.insert("provider_notes".into(), json!("rest"));
    remote
        .update_by_natural_key("consultations", "consultation_code", "C1A2B3", patch.clone())
        .await
        .unwrap();
    assert_eq!(remote.rows("consultations")[0]["provider_notes"], "rest");
    assert_eq!(remote.rows("consultations")[0]["fee"], 500);

    let err = remote
        .update_by_natural_key("consultations", "consultation_code", "CNOPE", patch)
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::NotFound { .. }));
}

#[tokio::test]
async fn list_all_orders_descending() {
    let remote = MemoryRemoteStore::new();
    for (code, at) in [("CAAA", "2026-03-01"), ("CBBB", "2026-03-03"), ("CCCC", "2026-03-02")] {
        remote
            .upsert_by_natural_key(
                "consultations",
                "consultation_code",
                json!({"consultation_code": code, "cashier_registered_at": at}),
            )
            .await
            .unwrap();
    }

    let rows = remote
        .list_all("consultations", "cashier_registered_at")
        .await
        .unwrap();
    let codes: Vec<_> = rows
        .iter()
        .map(|r| r["consultation_code"].as_str().unwrap())
        .collect();
    assert_eq!(codes, vec!["CBBB", "CCCC", "CAAA"]);
}

#[tokio::test]
async fn list_all_orders_numbers_numerically() {
    let remote = MemoryRemoteStore::new();
    for (code, fee) in [("CAAA", 9), ("CBBB", 10), ("CCCC", 100)] {
        remote
            .upsert_by_natural_key("consultations", "consultation_code", row(code, fee))
            .await
            .unwrap();
    }

    let rows = remote.list_all("consultations", "fee").await.unwrap();
    let fees: Vec<_> = rows.iter().map(|r| r["fee"].as_i64().unwrap()).collect();
    assert_eq!(fees, vec![100, 10, 9]);
}

#[test]
fn update_response_decoding() {
    let key = || ("consultations".to_string(), "C1A2B3".to_string());

    let (table, code) = key();
    assert!(updated_rows(br#"[{"consultation_code":"C1A2B3"}]"#, table, code).is_ok());

    let (table, code) = key();
    let err = updated_rows(b"[]", table, code).unwrap_err();
    assert!(matches!(err, RemoteError::NotFound { .. }));

    // A garbled body must not park a delivered item as rejected.
    let (table, code) = key();
    let err = updated_rows(b"<html>gateway</html>", table, code).unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn upsert_requires_key_column() {
    let remote = MemoryRemoteStore::new();
    let err = remote
        .upsert_by_natural_key("consultations", "consultation_code", json!({"fee": 1}))
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Rejected(_)));
}

#[test]
fn rest_store_rejects_bad_url() {
    let config = RemoteConfig {
        url: "not a url".into(),
        api_key: "k".into(),
        timeout_secs: 1,
    };
    assert!(RestRemoteStore::new(&config).is_err());
}

#[tokio::test]
async fn rest_store_unreachable_host_is_transient() {
    // Port 9 (discard) is closed on test machines; the connect fails fast.
    let config = RemoteConfig {
        url: "http://127.0.0.1:9".into(),
        api_key: "k".into(),
        timeout_secs: 2,
    };
    let remote = RestRemoteStore::new(&config).unwrap();
    let err = remote
        .upsert_by_natural_key("consultations", "consultation_code", row("C1A2B3", 1))
        .await
        .unwrap_err();
    assert!(err.is_transient());
}
