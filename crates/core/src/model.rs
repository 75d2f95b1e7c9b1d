// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Domain records shared by every context.
//!
//! This module contains the record types persisted in the local store and
//! mirrored in the remote store: [`Consultation`], [`Schedule`], [`User`],
//! plus the [`Session`] of the signed-in user and the role-scoped
//! [`ConsultationPatch`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::key::NaturalKey;
use crate::repository::Record;

/// Staff role of a context's signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Registers patients and collects fees.
    Cashier,
    /// Records clinical notes and refill decisions.
    Provider,
    /// Dispenses medication.
    Pharmacist,
    /// Oversees the clinic and broadcasts schedules.
    Admin,
}

impl Role {
    /// Every role, in workflow order.
    pub const ALL: [Role; 4] = [Role::Cashier, Role::Provider, Role::Pharmacist, Role::Admin];

    /// Returns the string representation used in storage and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Cashier => "cashier",
            Role::Provider => "provider",
            Role::Pharmacist => "pharmacist",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cashier" => Ok(Role::Cashier),
            "provider" => Ok(Role::Provider),
            "pharmacist" => Ok(Role::Pharmacist),
            "admin" => Ok(Role::Admin),
            _ => Err(Error::InvalidRole(s.to_string())),
        }
    }
}

/// Workflow status of a consultation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsultationStatus {
    /// Registered by the cashier.
    #[default]
    Registered,
    /// Seen by a provider.
    ProviderUpdated,
    /// Touched by the pharmacy without dispensing.
    PharmacyUpdated,
    /// Medication handed over.
    MedDispensed,
    /// Closed by an admin.
    Finalized,
}

impl ConsultationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsultationStatus::Registered => "registered",
            ConsultationStatus::ProviderUpdated => "provider-updated",
            ConsultationStatus::PharmacyUpdated => "pharmacy-updated",
            ConsultationStatus::MedDispensed => "med-dispensed",
            ConsultationStatus::Finalized => "finalized",
        }
    }
}

impl fmt::Display for ConsultationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConsultationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "registered" => Ok(ConsultationStatus::Registered),
            "provider-updated" => Ok(ConsultationStatus::ProviderUpdated),
            "pharmacy-updated" => Ok(ConsultationStatus::PharmacyUpdated),
            "med-dispensed" => Ok(ConsultationStatus::MedDispensed),
            "finalized" => Ok(ConsultationStatus::Finalized),
            _ => Err(Error::InvalidStatus(s.to_string())),
        }
    }
}

/// Cashier input for a new consultation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewPatient {
    pub name: String,
    pub age: Option<u32>,
    pub sex: Option<String>,
    pub village: Option<String>,
    pub contact_primary: Option<String>,
    pub contact_secondary: Option<String>,
    pub hiv_status: bool,
    pub fee: i64,
    pub created_by: Option<String>,
}

impl NewPatient {
    /// Checks the fields a consultation cannot be created without.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("patient name is required".into()));
        }
        if self.fee < 0 {
            return Err(Error::InvalidInput(format!(
                "fee must not be negative, got {}",
                self.fee
            )));
        }
        Ok(())
    }
}

/// A patient consultation, the main synced record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consultation {
    pub consultation_code: NaturalKey,
    /// Identifier assigned by the remote store, if known.
    #[serde(default, rename = "id", skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<i64>,
    pub patient_name: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub village: Option<String>,
    #[serde(default)]
    pub contact_primary: Option<String>,
    #[serde(default)]
    pub contact_secondary: Option<String>,
    #[serde(default)]
    pub hiv_status: bool,
    #[serde(default)]
    pub fee: i64,
    #[serde(default)]
    pub created_by: Option<String>,
    pub cashier_registered_at: DateTime<Utc>,
    #[serde(default)]
    pub provider_notes: Option<String>,
    #[serde(default)]
    pub medication_refill: bool,
    #[serde(default)]
    pub provider_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pharmacy_dispensed: bool,
    #[serde(default)]
    pub pharmacy_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub admin_finalized: bool,
    #[serde(default)]
    pub status: ConsultationStatus,
}

impl Consultation {
    /// Builds a freshly registered consultation.
    pub fn register(code: NaturalKey, patient: NewPatient, at: DateTime<Utc>) -> Self {
        Consultation {
            consultation_code: code,
            remote_id: None,
            patient_name: patient.name.trim().to_string(),
            age: patient.age,
            sex: patient.sex,
            village: patient.village,
            contact_primary: patient.contact_primary,
            contact_secondary: patient.contact_secondary,
            hiv_status: patient.hiv_status,
            fee: patient.fee,
            created_by: patient.created_by,
            cashier_registered_at: at,
            provider_notes: None,
            medication_refill: false,
            provider_updated_at: None,
            pharmacy_dispensed: false,
            pharmacy_updated_at: None,
            admin_finalized: false,
            status: ConsultationStatus::Registered,
        }
    }

    /// First reachable phone number for the patient.
    pub fn contact(&self) -> Option<&str> {
        let usable = |c: &&str| !c.trim().is_empty();
        self.contact_primary
            .as_deref()
            .filter(usable)
            .or_else(|| self.contact_secondary.as_deref().filter(usable))
    }
}

impl Record for Consultation {
    const COLLECTION: &'static str = "consultations";
    const KEY_FIELD: &'static str = "consultation_code";

    fn natural_key(&self) -> &str {
        self.consultation_code.as_str()
    }
}

/// A role-scoped partial update of a consultation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ConsultationPatch {
    /// Provider notes and refill decision.
    Provider {
        notes: Option<String>,
        medication_refill: bool,
        at: DateTime<Utc>,
    },
    /// Pharmacy dispensing.
    Pharmacy { dispensed: bool, at: DateTime<Utc> },
    /// Admin sign-off.
    Finalize { at: DateTime<Utc> },
}

impl ConsultationPatch {
    /// Applies the patch to a local copy.
    ///
    /// Provider notes of `None` keep whatever notes were already recorded.
    pub fn apply(&self, c: &mut Consultation) {
        match self {
            ConsultationPatch::Provider {
                notes,
                medication_refill,
                at,
            } => {
                if let Some(notes) = notes {
                    c.provider_notes = Some(notes.clone());
                }
                c.medication_refill = *medication_refill;
                c.provider_updated_at = Some(*at);
                c.status = ConsultationStatus::ProviderUpdated;
            }
            ConsultationPatch::Pharmacy { dispensed, at } => {
                c.pharmacy_dispensed = *dispensed;
                c.pharmacy_updated_at = Some(*at);
                c.status = if *dispensed {
                    ConsultationStatus::MedDispensed
                } else {
                    ConsultationStatus::PharmacyUpdated
                };
            }
            ConsultationPatch::Finalize { .. } => {
                c.admin_finalized = true;
                c.status = ConsultationStatus::Finalized;
            }
        }
    }

    /// Column values this patch writes, for remote partial updates.
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        match self {
            ConsultationPatch::Provider {
                notes,
                medication_refill,
                at,
            } => {
                if let Some(notes) = notes {
                    fields.insert("provider_notes".into(), Value::from(notes.clone()));
                }
                fields.insert("medication_refill".into(), Value::from(*medication_refill));
                fields.insert("provider_updated_at".into(), Value::from(at.to_rfc3339()));
                fields.insert(
                    "status".into(),
                    Value::from(ConsultationStatus::ProviderUpdated.as_str()),
                );
            }
            ConsultationPatch::Pharmacy { dispensed, at } => {
                let status = if *dispensed {
                    ConsultationStatus::MedDispensed
                } else {
                    ConsultationStatus::PharmacyUpdated
                };
                fields.insert("pharmacy_dispensed".into(), Value::from(*dispensed));
                fields.insert("pharmacy_updated_at".into(), Value::from(at.to_rfc3339()));
                fields.insert("status".into(), Value::from(status.as_str()));
            }
            ConsultationPatch::Finalize { .. } => {
                fields.insert("admin_finalized".into(), Value::from(true));
                fields.insert(
                    "status".into(),
                    Value::from(ConsultationStatus::Finalized.as_str()),
                );
            }
        }
        fields
    }
}

/// An admin broadcast to the staff roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub schedule_code: NaturalKey,
    pub date: NaiveDate,
    pub message: String,
    #[serde(default)]
    pub targets: Vec<Role>,
    #[serde(default)]
    pub created_by: Option<String>,
    pub ts: DateTime<Utc>,
}

impl Record for Schedule {
    const COLLECTION: &'static str = "schedules";
    const KEY_FIELD: &'static str = "schedule_code";

    fn natural_key(&self) -> &str {
        self.schedule_code.as_str()
    }
}

/// A locally registered staff account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    pub name: String,
    pub role: Role,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Creates an account, normalizing the email and hashing the password.
    pub fn new(name: &str, email: &str, password: &str, role: Role, at: DateTime<Utc>) -> Self {
        User {
            email: normalize_email(email),
            name: name.trim().to_string(),
            role,
            password_hash: hash_password(password),
            created_at: at,
        }
    }

    pub fn verify_password(&self, password: &str) -> bool {
        self.password_hash == hash_password(password)
    }

    pub fn session(&self) -> Session {
        Session {
            email: self.email.clone(),
            role: self.role,
            name: self.name.clone(),
        }
    }
}

impl Record for User {
    const COLLECTION: &'static str = "users";
    const KEY_FIELD: &'static str = "email";

    fn natural_key(&self) -> &str {
        &self.email
    }
}

/// The signed-in identity of the local origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub email: String,
    pub role: Role,
    pub name: String,
}

impl Session {
    /// Name to greet the user with.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.email
        } else {
            &self.name
        }
    }
}

/// Lower-cases and trims an email address.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// SHA-256 of the password, hex encoded.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
