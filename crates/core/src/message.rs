// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Message bus envelope and events.
//!
//! On the wire a message is a flat JSON object:
//!
//! ```json
//! {"id": "...", "ts": "2026-03-01T09:00:00Z", "type": "provider_update",
//!  "payload": {...}, "fromRole": "provider", "to": "pharmacist"}
//! ```
//!
//! In memory the `type`/`payload` pair is the closed [`BusEvent`] enum, so
//! handlers match on variants instead of probing optional fields.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::key::NaturalKey;
use crate::model::{ConsultationStatus, Role};

/// Addressee of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Recipient {
    #[default]
    All,
    Role(Role),
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::All => f.write_str("all"),
            Recipient::Role(role) => write!(f, "{role}"),
        }
    }
}

impl FromStr for Recipient {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("all") {
            Ok(Recipient::All)
        } else {
            s.parse().map(Recipient::Role)
        }
    }
}

impl TryFrom<String> for Recipient {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Recipient> for String {
    fn from(r: Recipient) -> Self {
        r.to_string()
    }
}

impl From<Role> for Recipient {
    fn from(role: Role) -> Self {
        Recipient::Role(role)
    }
}

/// Event carried by a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum BusEvent {
    /// A cashier registered a patient.
    ConsultationCreated {
        consultation_code: NaturalKey,
        patient_name: String,
        fee: i64,
    },
    /// A consultation changed; views should refresh it.
    ConsultationUpdate {
        consultation_code: NaturalKey,
        status: ConsultationStatus,
    },
    /// A provider recorded notes.
    ProviderUpdate {
        consultation_code: NaturalKey,
        #[serde(default)]
        patient_name: Option<String>,
        #[serde(default)]
        notes: Option<String>,
        #[serde(default)]
        contact: Option<String>,
    },
    /// The pharmacy handled a consultation.
    PharmacyUpdate {
        consultation_code: NaturalKey,
        #[serde(default)]
        patient_name: Option<String>,
        dispensed: bool,
    },
    /// An admin broadcast.
    Schedule {
        schedule_code: NaturalKey,
        date: NaiveDate,
        message: String,
        #[serde(default)]
        targets: Vec<Role>,
    },
    /// The sync engine delivered queued mutations.
    SyncCompleted { delivered: usize, remaining: usize },
}

impl BusEvent {
    /// The wire `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            BusEvent::ConsultationCreated { .. } => "consultation_created",
            BusEvent::ConsultationUpdate { .. } => "consultation_update",
            BusEvent::ProviderUpdate { .. } => "provider_update",
            BusEvent::PharmacyUpdate { .. } => "pharmacy_update",
            BusEvent::Schedule { .. } => "schedule",
            BusEvent::SyncCompleted { .. } => "sync_completed",
        }
    }

    /// The record the event is about, if any.
    pub fn natural_key(&self) -> Option<&NaturalKey> {
        match self {
            BusEvent::ConsultationCreated {
                consultation_code, ..
            }
            | BusEvent::ConsultationUpdate {
                consultation_code, ..
            }
            | BusEvent::ProviderUpdate {
                consultation_code, ..
            }
            | BusEvent::PharmacyUpdate {
                consultation_code, ..
            } => Some(consultation_code),
            BusEvent::Schedule { schedule_code, .. } => Some(schedule_code),
            BusEvent::SyncCompleted { .. } => None,
        }
    }

    /// Roles the event is meant for when no explicit recipient is given.
    pub fn implied_targets(&self) -> Vec<Role> {
        match self {
            BusEvent::ProviderUpdate { .. } => vec![Role::Pharmacist],
            BusEvent::PharmacyUpdate { .. } => vec![Role::Cashier, Role::Admin],
            BusEvent::Schedule { targets, .. } => targets.clone(),
            _ => Vec::new(),
        }
    }

    /// The event's `payload` object.
    pub fn payload(&self) -> Result<Value> {
        let mut tagged = serde_json::to_value(self)?;
        Ok(tagged
            .get_mut("payload")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    /// Rebuilds an event from its wire `type` and `payload`.
    pub fn from_parts(type_name: &str, payload: Value) -> Result<Self> {
        let tagged = serde_json::json!({ "type": type_name, "payload": payload });
        Ok(serde_json::from_value(tagged)?)
    }
}

/// A published message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub struct BusMessage {
    pub id: String,
    pub ts: DateTime<Utc>,
    pub from_role: Option<Role>,
    pub to: Recipient,
    pub event: BusEvent,
}

impl BusMessage {
    /// Wraps an event in a fresh envelope.
    pub fn new(event: BusEvent, from_role: Option<Role>, to: Recipient) -> Self {
        BusMessage {
            id: uuid::Uuid::new_v4().to_string(),
            ts: Utc::now(),
            from_role,
            to,
            event,
        }
    }

    /// Roles the message is directed at: the explicit recipient if it names a
    /// role, else whatever the event implies.
    pub fn targets(&self) -> Vec<Role> {
        match self.to {
            Recipient::Role(role) => vec![role],
            Recipient::All => self.event.implied_targets(),
        }
    }

    /// True if a context signed in as `role` should act on this message.
    pub fn is_for(&self, role: Role) -> bool {
        match self.to {
            Recipient::All => true,
            Recipient::Role(r) => r == role,
        }
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    id: String,
    ts: DateTime<Utc>,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "fromRole", default, skip_serializing_if = "Option::is_none")]
    from_role: Option<Role>,
    #[serde(default)]
    to: Recipient,
}

impl TryFrom<WireMessage> for BusMessage {
    type Error = Error;

    fn try_from(wire: WireMessage) -> Result<Self> {
        Ok(BusMessage {
            event: BusEvent::from_parts(&wire.type_name, wire.payload)?,
            id: wire.id,
            ts: wire.ts,
            from_role: wire.from_role,
            to: wire.to,
        })
    }
}

impl From<BusMessage> for WireMessage {
    fn from(msg: BusMessage) -> Self {
        WireMessage {
            type_name: msg.event.type_name().to_string(),
            payload: msg.event.payload().unwrap_or(Value::Null),
            id: msg.id,
            ts: msg.ts,
            from_role: msg.from_role,
            to: msg.to,
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
