// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! JSON bodies exchanged with the local relay service.
//!
//! Every response carries `ok`; failures are `{"ok": false, "error": "..."}`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::key::NaturalKey;
use crate::model::{Consultation, NewPatient, Role};
use crate::outbox::OutboxItem;

/// Body of `POST /queue`: pending outbox items, oldest first.
pub type QueueRequest = Vec<OutboxItem>;

/// Body of `POST /notify`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyRequest {
    pub role: Role,
    #[serde(default)]
    pub payload: Value,
    pub ts: DateTime<Utc>,
}

/// Body of `POST /sms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmsRequest {
    pub to: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consultation_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

/// Body of `POST /login`, recorded for the admin audit list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub name: String,
    pub email: String,
    pub role: Role,
}

/// Body of `POST /message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRequest {
    #[serde(default)]
    pub consultation_code: Option<String>,
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Body of `POST /schedule`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub date: NaiveDate,
    pub message: String,
    #[serde(default)]
    pub targets: Vec<Role>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Body of `POST /consultation`.
///
/// Accepts the short field names of the registration form as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsultationRequest {
    #[serde(default)]
    pub consultation_code: Option<NaturalKey>,
    #[serde(alias = "name")]
    pub patient_name: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub village: Option<String>,
    #[serde(default, alias = "contact1")]
    pub contact_primary: Option<String>,
    #[serde(default, alias = "contact2")]
    pub contact_secondary: Option<String>,
    #[serde(default)]
    pub fee: i64,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub provider_notes: Option<String>,
}

impl ConsultationRequest {
    /// Builds the consultation under the given code.
    pub fn into_consultation(self, code: NaturalKey, at: DateTime<Utc>) -> Consultation {
        let mut consultation = Consultation::register(
            code,
            NewPatient {
                name: self.patient_name,
                age: self.age,
                sex: self.sex,
                village: self.village,
                contact_primary: self.contact_primary,
                contact_secondary: self.contact_secondary,
                hiv_status: false,
                fee: self.fee,
                created_by: self.created_by,
            },
            at,
        );
        consultation.provider_notes = self.provider_notes;
        consultation
    }
}

/// Response to a request that created a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Created {
    pub ok: bool,
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consultation_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime<Utc>>,
}

impl Created {
    pub fn new(id: i64) -> Self {
        Created {
            ok: true,
            id,
            consultation_code: None,
            ts: None,
        }
    }
}

/// Response to `POST /queue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueAccepted {
    pub ok: bool,
    /// Items stored.
    pub accepted: usize,
}

/// Response to `GET /queue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueListing {
    pub ok: bool,
    pub items: Vec<Consultation>,
}

/// Response carrying a list under `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataList<T> {
    pub ok: bool,
    pub data: Vec<T>,
}

/// Response to `GET /admin/logins`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginList {
    pub ok: bool,
    pub rows: Vec<LoginRecord>,
}

/// One recorded sign-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginRecord {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: String,
    pub ts: DateTime<Utc>,
}

/// One stored chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub consultation_code: Option<String>,
    pub patient_name: Option<String>,
    pub sender: String,
    pub message: String,
    pub ts: DateTime<Utc>,
}

/// One stored role notification, as listed by `GET /notifications`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: i64,
    pub role: String,
    pub payload: Value,
    pub ts: DateTime<Utc>,
}

/// Failure response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        ErrorBody {
            ok: false,
            error: error.into(),
        }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
