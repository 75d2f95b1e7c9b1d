// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Route tests against a relay running on a random port.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use super::*;
use chrono::Utc;
use serde_json::Value;
use tm_core::config::RelayConfig;
use tm_core::protocol::{ChatMessage, NotificationRecord};
use tm_core::{Consultation, Mutation, NaturalKey, NewPatient, OutboxItem};
use tm_sync::{HttpRelay, Relay};
use tokio::sync::oneshot;

/// A relay on a random port, stopped on drop.
struct TestServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    _temp_dir: tempfile::TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let temp_dir = tempfile::tempdir().unwrap();
        let state = RelayState::new(temp_dir.path()).unwrap();

        // Bind to port 0 to get a random available port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::select! {
                result = serve(listener, state) => {
                    if let Err(e) = result {
                        eprintln!("Test server error: {}", e);
                    }
                }
                _ = shutdown_rx => {}
            }
        });

        TestServer {
            addr,
            shutdown_tx: Some(shutdown_tx),
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, route: &str) -> String {
        format!("http://{}/{}", self.addr, route)
    }

    fn relay(&self) -> HttpRelay {
        HttpRelay::new(&RelayConfig {
            url: format!("http://{}", self.addr),
            timeout_secs: 5,
        })
        .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn item(code: &str, fee: i64) -> OutboxItem {
    OutboxItem::new(Mutation::from(Consultation::register(
        NaturalKey::parse(code).unwrap(),
        NewPatient {
            name: "Amina".into(),
            fee,
            ..NewPatient::default()
        },
        Utc::now(),
    )))
}

async fn get_json(url: &str) -> Value {
    reqwest::get(url).await.unwrap().json().await.unwrap()
}

#[tokio::test]
async fn healthz_is_ok() {
    let server = TestServer::start().await;
    let body = get_json(&server.url("healthz")).await;
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn queue_round_trip_through_http_relay() {
    let server = TestServer::start().await;
    let relay = server.relay();

    let accepted = relay
        .post_queue(vec![item("C1A2B3", 500), item("C4D5E6", 300)])
        .await
        .unwrap();
    assert!(accepted.ok);
    assert_eq!(accepted.accepted, 2);

    let listed = relay.get_queue().await.unwrap();
    assert_eq!(listed.len(), 2);
    let amina = listed
        .iter()
        .find(|c| c.consultation_code == NaturalKey::parse("C1A2B3").unwrap())
        .expect("posted consultation listed");
    assert_eq!(amina.fee, 500);
}

#[tokio::test]
async fn notify_sms_and_login_are_recorded() {
    let server = TestServer::start().await;
    let relay = server.relay();

    relay
        .notify(tm_core::protocol::NotifyRequest {
            role: Role::Pharmacist,
            payload: serde_json::json!({ "type": "provider_update" }),
            ts: Utc::now(),
        })
        .await
        .unwrap();
    relay
        .sms(SmsRequest {
            to: "+254700000001".into(),
            message: "Provider update for Amina: rest".into(),
            consultation_code: Some("C1A2B3".into()),
            patient_name: Some("Amina".into()),
            sender: Some("provider".into()),
        })
        .await
        .unwrap();
    relay
        .login(LoginRequest {
            name: "Grace".into(),
            email: "grace@clinic.org".into(),
            role: Role::Cashier,
        })
        .await
        .unwrap();

    let notes: DataList<NotificationRecord> =
        reqwest::get(server.url("notifications?role=pharmacist"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(notes.data.len(), 1);
    assert_eq!(notes.data[0].payload["type"], "provider_update");

    let thread: DataList<ChatMessage> = reqwest::get(server.url("messages?consultation_code=C1A2B3"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(thread.data[0].sender, "provider");

    let logins: LoginList = reqwest::get(server.url("admin/logins"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(logins.rows[0].email, "grace@clinic.org");
}

#[tokio::test]
async fn consultation_form_post_and_list() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let created: Created = client
        .post(server.url("consultation"))
        .json(&serde_json::json!({ "name": "Amina", "contact1": "+254700000001", "fee": 500 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(created.ok);
    let code = created.consultation_code.expect("code generated");

    let resp = client
        .post(server.url("consultation"))
        .json(&serde_json::json!({ "consultation_code": code, "name": "Again" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let err: ErrorBody = resp.json().await.unwrap();
    assert!(!err.ok);

    let list: DataList<tm_core::Consultation> = reqwest::get(server.url("consultations"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.data.len(), 1);
    assert_eq!(list.data[0].consultation_code.as_str(), code);
    assert_eq!(list.data[0].contact(), Some("+254700000001"));
}

#[tokio::test]
async fn message_post_returns_timestamp() {
    let server = TestServer::start().await;
    let created: Created = reqwest::Client::new()
        .post(server.url("message"))
        .json(&serde_json::json!({ "patient_name": "Amina", "message": "hello" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(created.ts.is_some());

    let thread = get_json(&server.url("messages?patient_name=Amina")).await;
    assert_eq!(thread["data"][0]["message"], "hello");
    assert_eq!(thread["data"][0]["sender"], "cashier");
}

#[tokio::test]
async fn schedule_fans_out_notifications() {
    let server = TestServer::start().await;
    let created: Created = reqwest::Client::new()
        .post(server.url("schedule"))
        .json(&serde_json::json!({
            "date": "2026-03-02",
            "message": "Clinic closed",
            "targets": ["cashier", "provider", "pharmacist"],
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let notes = get_json(&server.url("notifications")).await;
    let data = notes["data"].as_array().unwrap();
    assert_eq!(data.len(), 3);
    assert!(data
        .iter()
        .all(|n| n["payload"]["scheduleId"] == created.id && n["payload"]["type"] == "schedule"));
}

#[tokio::test]
async fn unreachable_relay_is_reported() {
    let server = TestServer::start().await;
    let relay = server.relay();
    drop(server);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let err = relay.get_queue().await.unwrap_err();
    assert!(matches!(err, tm_sync::RelayError::Unreachable(_)));
}
