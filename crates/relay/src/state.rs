// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Relay state.
//!
//! Wraps the relay's SQLite database for shared access from request handlers.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tokio::sync::Mutex;

use tm_core::protocol::{
    ChatMessage, ConsultationRequest, LoginRecord, LoginRequest, MessageRequest,
    NotificationRecord, NotifyRequest, ScheduleRequest, SmsRequest,
};
use tm_core::{Consultation, KeyGenerator, Mutation, OutboxItem, RecordSnapshot, Role, Schedule};

use crate::error::{Error, Result};

/// Database file name inside the data directory.
pub const DB_NAME: &str = "telemed.db";

const LOGIN_LIMIT: usize = 1000;
const LIST_LIMIT: usize = 2000;

/// Sender recorded for an SMS that does not name one.
const SMS_SENDER: &str = "admin-sms";
/// Sender recorded for a chat message that does not name one.
const MESSAGE_SENDER: &str = "cashier";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS logins (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT,
    email TEXT,
    role TEXT,
    ts TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS consultations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    consultation_code TEXT NOT NULL UNIQUE,
    patient_name TEXT,
    fee INTEGER NOT NULL DEFAULT 0,
    created_by TEXT,
    cashier_registered_at TEXT NOT NULL,
    record TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    consultation_code TEXT,
    patient_name TEXT,
    sender TEXT NOT NULL,
    message TEXT NOT NULL,
    ts TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    role TEXT,
    payload TEXT NOT NULL,
    ts TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS schedules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    schedule_code TEXT UNIQUE,
    date TEXT,
    message TEXT,
    targets TEXT,
    created_by TEXT,
    ts TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS sms (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    to_number TEXT NOT NULL,
    message TEXT NOT NULL,
    ts TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_consultations_registered ON consultations(cashier_registered_at);
CREATE INDEX IF NOT EXISTS idx_messages_ts ON messages(ts);
"#;

/// Shared relay state backed by one SQLite database.
#[derive(Clone)]
pub struct RelayState {
    inner: Arc<RelayStateInner>,
}

struct RelayStateInner {
    db: Mutex<Connection>,
    keys: KeyGenerator,
}

/// Filter for `GET /messages`; the consultation code wins when both are set.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct MessageFilter {
    pub consultation_code: Option<String>,
    pub patient_name: Option<String>,
}

impl RelayState {
    /// Opens (or creates) the database in `data_dir`.
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let conn = Connection::open(data_dir.join(DB_NAME))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(RelayState {
            inner: Arc::new(RelayStateInner {
                db: Mutex::new(conn),
                keys: KeyGenerator::new(),
            }),
        })
    }

    /// Applies queued outbox items in one transaction.
    ///
    /// Creates are idempotent by natural key. A patch for a consultation the
    /// relay has never seen is skipped. Returns the number of items applied.
    pub async fn apply_queue(&self, items: Vec<OutboxItem>) -> Result<usize> {
        let mut db = self.inner.db.lock().await;
        let tx = db.transaction()?;
        let mut applied = 0;
        for item in items {
            let done = match item.mutation {
                Mutation::Create {
                    record: RecordSnapshot::Consultations(c),
                } => {
                    insert_consultation(&tx, &c)?;
                    true
                }
                Mutation::Create {
                    record: RecordSnapshot::Schedules(s),
                } => {
                    insert_schedule(&tx, &s)?;
                    true
                }
                Mutation::UpdateConsultation { key, patch } => {
                    match load_consultation(&tx, key.as_str())? {
                        Some(mut c) => {
                            patch.apply(&mut c);
                            tx.execute(
                                "UPDATE consultations SET record = ?1 WHERE consultation_code = ?2",
                                params![serde_json::to_string(&c)?, key.as_str()],
                            )?;
                            true
                        }
                        None => {
                            tracing::warn!(id = %item.id, %key, "patch for unknown consultation skipped");
                            false
                        }
                    }
                }
            };
            if done {
                applied += 1;
            }
        }
        tx.commit()?;
        Ok(applied)
    }

    /// Consultations, newest registration first.
    pub async fn consultations(&self) -> Result<Vec<Consultation>> {
        let db = self.inner.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, record FROM consultations ORDER BY cashier_registered_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([LIST_LIMIT], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(id, record)| {
                let mut c: Consultation = serde_json::from_str(&record)?;
                c.remote_id = Some(id);
                Ok(c)
            })
            .collect()
    }

    /// Stores a consultation posted by a form, generating a code if missing.
    pub async fn create_consultation(&self, req: ConsultationRequest) -> Result<(i64, Consultation)> {
        let code = match req.consultation_code.clone() {
            Some(code) => code,
            None => self.inner.keys.consultation(),
        };
        let c = req.into_consultation(code, Utc::now());
        let db = self.inner.db.lock().await;
        let id = insert_consultation(&db, &c)?
            .ok_or_else(|| Error::Conflict(format!("consultation {}", c.consultation_code)))?;
        Ok((id, c))
    }

    pub async fn record_login(&self, req: LoginRequest) -> Result<i64> {
        let db = self.inner.db.lock().await;
        db.execute(
            "INSERT INTO logins (name, email, role, ts) VALUES (?1, ?2, ?3, ?4)",
            params![req.name, req.email, req.role.as_str(), stamp(Utc::now())],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Recorded sign-ins, newest first.
    pub async fn logins(&self) -> Result<Vec<LoginRecord>> {
        let db = self.inner.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, name, email, role, ts FROM logins ORDER BY ts DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([LOGIN_LIMIT], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(id, name, email, role, ts)| {
                Ok(LoginRecord {
                    id,
                    name: name.unwrap_or_default(),
                    email: email.unwrap_or_default(),
                    role: role.unwrap_or_default(),
                    ts: parse_ts(&ts)?,
                })
            })
            .collect()
    }

    pub async fn notify(&self, req: NotifyRequest) -> Result<i64> {
        let db = self.inner.db.lock().await;
        insert_notification(
            &db,
            req.role.as_str(),
            &serde_json::to_string(&req.payload)?,
            req.ts,
        )
    }

    /// Stored notifications, oldest first, optionally for one role.
    pub async fn notifications(&self, role: Option<Role>) -> Result<Vec<NotificationRecord>> {
        let db = self.inner.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, role, payload, ts FROM notifications
             WHERE ?1 IS NULL OR role = ?1 ORDER BY id ASC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![role.map(|r| r.as_str()), LIST_LIMIT], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(id, role, payload, ts)| {
                Ok(NotificationRecord {
                    id,
                    role: role.unwrap_or_default(),
                    payload: serde_json::from_str(&payload)?,
                    ts: parse_ts(&ts)?,
                })
            })
            .collect()
    }

    /// Records an outgoing SMS, also as a chat message so the thread for the
    /// consultation stays complete.
    pub async fn sms(&self, req: SmsRequest) -> Result<i64> {
        let ts = Utc::now();
        let mut db = self.inner.db.lock().await;
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO sms (to_number, message, ts) VALUES (?1, ?2, ?3)",
            params![req.to, req.message, stamp(ts)],
        )?;
        let id = tx.last_insert_rowid();
        let message = MessageRequest {
            consultation_code: req.consultation_code,
            patient_name: req.patient_name,
            sender: Some(req.sender.unwrap_or_else(|| SMS_SENDER.to_string())),
            message: req.message,
        };
        insert_message(&tx, message, ts)?;
        tx.commit()?;
        Ok(id)
    }

    pub async fn post_message(&self, req: MessageRequest) -> Result<(i64, DateTime<Utc>)> {
        let ts = Utc::now();
        let db = self.inner.db.lock().await;
        let id = insert_message(&db, req, ts)?;
        Ok((id, ts))
    }

    /// Chat messages matching `filter`, oldest first.
    pub async fn messages(&self, filter: MessageFilter) -> Result<Vec<ChatMessage>> {
        let (clause, arg) = match (filter.consultation_code, filter.patient_name) {
            (Some(code), _) => ("WHERE consultation_code = ?1", Some(code)),
            (None, Some(name)) => ("WHERE patient_name = ?1", Some(name)),
            (None, None) => ("WHERE ?1 IS NULL", None),
        };
        let sql = format!(
            "SELECT id, consultation_code, patient_name, sender, message, ts FROM messages
             {clause} ORDER BY ts ASC, id ASC LIMIT ?2"
        );
        let db = self.inner.db.lock().await;
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt
            .query_map(params![arg, LIST_LIMIT], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(id, consultation_code, patient_name, sender, message, ts)| {
                Ok(ChatMessage {
                    id,
                    consultation_code,
                    patient_name,
                    sender,
                    message,
                    ts: parse_ts(&ts)?,
                })
            })
            .collect()
    }

    /// Stores an admin schedule and a notification row for each target.
    pub async fn schedule(&self, req: ScheduleRequest) -> Result<i64> {
        let ts = Utc::now();
        let mut db = self.inner.db.lock().await;
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO schedules (date, message, targets, created_by, ts)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                req.date.to_string(),
                req.message,
                join_roles(&req.targets),
                req.created_by,
                stamp(ts)
            ],
        )?;
        let id = tx.last_insert_rowid();
        let payload = serde_json::json!({
            "type": "schedule",
            "scheduleId": id,
            "date": req.date,
            "message": req.message,
        })
        .to_string();
        for role in &req.targets {
            insert_notification(&tx, role.as_str(), &payload, ts)?;
        }
        tx.commit()?;
        Ok(id)
    }
}

/// Inserts a consultation unless its code is taken; returns the new row id.
fn insert_consultation(conn: &Connection, c: &Consultation) -> Result<Option<i64>> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO consultations
             (consultation_code, patient_name, fee, created_by, cashier_registered_at, record)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            c.consultation_code.as_str(),
            c.patient_name,
            c.fee,
            c.created_by,
            stamp(c.cashier_registered_at),
            serde_json::to_string(c)?
        ],
    )?;
    Ok((inserted > 0).then(|| conn.last_insert_rowid()))
}

fn load_consultation(tx: &Transaction<'_>, code: &str) -> Result<Option<Consultation>> {
    let record: Option<String> = tx
        .query_row(
            "SELECT record FROM consultations WHERE consultation_code = ?1",
            [code],
            |row| row.get(0),
        )
        .optional()?;
    Ok(record.map(|r| serde_json::from_str(&r)).transpose()?)
}

fn insert_schedule(conn: &Connection, s: &Schedule) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schedules (schedule_code, date, message, targets, created_by, ts)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            s.schedule_code.as_str(),
            s.date.to_string(),
            s.message,
            join_roles(&s.targets),
            s.created_by,
            stamp(s.ts)
        ],
    )?;
    Ok(())
}

fn insert_notification(conn: &Connection, role: &str, payload: &str, ts: DateTime<Utc>) -> Result<i64> {
    conn.execute(
        "INSERT INTO notifications (role, payload, ts) VALUES (?1, ?2, ?3)",
        params![role, payload, stamp(ts)],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_message(conn: &Connection, req: MessageRequest, ts: DateTime<Utc>) -> Result<i64> {
    conn.execute(
        "INSERT INTO messages (consultation_code, patient_name, sender, message, ts)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            req.consultation_code,
            req.patient_name,
            req.sender.unwrap_or_else(|| MESSAGE_SENDER.to_string()),
            req.message,
            stamp(ts)
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn join_roles(roles: &[Role]) -> String {
    roles.iter().map(Role::as_str).collect::<Vec<_>>().join(",")
}

/// Fixed-width RFC 3339, so text order matches time order.
fn stamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| Error::Timestamp(s.to_string()))
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
