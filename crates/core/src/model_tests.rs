// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use chrono::TimeZone;
use yare::parameterized;

fn sample(code: &str) -> Consultation {
    let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
    Consultation::register(
        NaturalKey::parse(code).unwrap(),
        NewPatient {
            name: "  Amina  ".into(),
            contact_primary: Some("+255700000001".into()),
            fee: 500,
            ..NewPatient::default()
        },
        at,
    )
}

#[parameterized(
    cashier = { "cashier", Role::Cashier },
    provider = { "provider", Role::Provider },
    pharmacist_upper = { "PHARMACIST", Role::Pharmacist },
    admin_padded = { " admin ", Role::Admin },
)]
fn role_from_str_valid(input: &str, expected: Role) {
    assert_eq!(input.parse::<Role>().unwrap(), expected);
}

#[parameterized(
    nurse = { "nurse" },
    empty = { "" },
)]
fn role_from_str_invalid(input: &str) {
    assert!(matches!(input.parse::<Role>(), Err(Error::InvalidRole(_))));
}

#[parameterized(
    registered = { ConsultationStatus::Registered, "registered" },
    provider = { ConsultationStatus::ProviderUpdated, "provider-updated" },
    pharmacy = { ConsultationStatus::PharmacyUpdated, "pharmacy-updated" },
    dispensed = { ConsultationStatus::MedDispensed, "med-dispensed" },
    finalized = { ConsultationStatus::Finalized, "finalized" },
)]
fn status_strings_match_serde(status: ConsultationStatus, expected: &str) {
    assert_eq!(status.as_str(), expected);
    assert_eq!(
        serde_json::to_value(status).unwrap(),
        Value::from(expected)
    );
    assert_eq!(expected.parse::<ConsultationStatus>().unwrap(), status);
}

#[test]
fn register_trims_name_and_starts_registered() {
    let c = sample("C1A2B3");
    assert_eq!(c.patient_name, "Amina");
    assert_eq!(c.fee, 500);
    assert_eq!(c.status, ConsultationStatus::Registered);
    assert!(c.remote_id.is_none());
}

#[test]
fn new_patient_validation() {
    assert!(NewPatient::default().validate().is_err());
    let negative = NewPatient {
        name: "x".into(),
        fee: -1,
        ..NewPatient::default()
    };
    assert!(negative.validate().is_err());
    let ok = NewPatient {
        name: "x".into(),
        ..NewPatient::default()
    };
    assert!(ok.validate().is_ok());
}

#[test]
fn remote_id_maps_to_id_column() {
    let mut c = sample("C1A2B3");
    let json = serde_json::to_value(&c).unwrap();
    assert!(json.get("id").is_none());

    c.remote_id = Some(42);
    let json = serde_json::to_value(&c).unwrap();
    assert_eq!(json["id"], 42);
    assert_eq!(json["consultation_code"], "C1A2B3");
}

#[test]
fn remote_row_with_missing_flags_parses() {
    let row = serde_json::json!({
        "id": 7,
        "consultation_code": "C1A2B3",
        "patient_name": "Amina",
        "cashier_registered_at": "2026-03-01T09:00:00Z",
        "fee": 500
    });
    let c: Consultation = serde_json::from_value(row).unwrap();
    assert_eq!(c.remote_id, Some(7));
    assert!(!c.pharmacy_dispensed);
    assert_eq!(c.status, ConsultationStatus::Registered);
}

#[test]
fn provider_patch_keeps_notes_when_none() {
    let at = Utc::now();
    let mut c = sample("C1A2B3");
    ConsultationPatch::Provider {
        notes: Some("rest".into()),
        medication_refill: true,
        at,
    }
    .apply(&mut c);
    ConsultationPatch::Provider {
        notes: None,
        medication_refill: false,
        at,
    }
    .apply(&mut c);

    assert_eq!(c.provider_notes.as_deref(), Some("rest"));
    assert!(!c.medication_refill);
    assert_eq!(c.status, ConsultationStatus::ProviderUpdated);
    assert_eq!(c.provider_updated_at, Some(at));
}

#[parameterized(
    dispensed = { true, ConsultationStatus::MedDispensed },
    not_dispensed = { false, ConsultationStatus::PharmacyUpdated },
)]
fn pharmacy_patch_status(dispensed: bool, expected: ConsultationStatus) {
    let mut c = sample("C1A2B3");
    let patch = ConsultationPatch::Pharmacy {
        dispensed,
        at: Utc::now(),
    };
    patch.apply(&mut c);
    assert_eq!(c.status, expected);
    assert_eq!(patch.to_fields()["status"], expected.as_str());
}

#[test]
fn finalize_patch_fields() {
    let mut c = sample("C1A2B3");
    let patch = ConsultationPatch::Finalize { at: Utc::now() };
    patch.apply(&mut c);
    assert!(c.admin_finalized);
    let fields = patch.to_fields();
    assert_eq!(fields["admin_finalized"], true);
    assert_eq!(fields["status"], "finalized");
}

#[test]
fn provider_patch_fields_omit_missing_notes() {
    let patch = ConsultationPatch::Provider {
        notes: None,
        medication_refill: true,
        at: Utc::now(),
    };
    let fields = patch.to_fields();
    assert!(!fields.contains_key("provider_notes"));
    assert_eq!(fields["medication_refill"], true);
}

#[test]
fn patch_is_tagged_by_role() {
    let patch = ConsultationPatch::Finalize {
        at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
    };
    let json = serde_json::to_value(&patch).unwrap();
    assert_eq!(json["role"], "finalize");
}

#[test]
fn contact_prefers_primary_and_skips_blank() {
    let mut c = sample("C1A2B3");
    assert_eq!(c.contact(), Some("+255700000001"));
    c.contact_primary = None;
    c.contact_secondary = Some("  ".into());
    assert_eq!(c.contact(), None);
}

#[parameterized(
    blank_primary = { Some(""), Some("+255700000002"), Some("+255700000002") },
    spaces_primary = { Some("  "), Some("+255700000002"), Some("+255700000002") },
    missing_primary = { None, Some("+255700000002"), Some("+255700000002") },
    both_blank = { Some(""), Some(" "), None },
)]
fn contact_falls_back_to_secondary(
    primary: Option<&str>,
    secondary: Option<&str>,
    expected: Option<&str>,
) {
    let mut c = sample("C1A2B3");
    c.contact_primary = primary.map(str::to_string);
    c.contact_secondary = secondary.map(str::to_string);
    assert_eq!(c.contact(), expected);
}

#[test]
fn user_password_is_hashed() {
    let user = User::new("Jo", " Jo@Clinic.org ", "secret", Role::Provider, Utc::now());
    assert_eq!(user.email, "jo@clinic.org");
    assert_ne!(user.password_hash, "secret");
    assert_eq!(user.password_hash.len(), 64);
    assert!(user.verify_password("secret"));
    assert!(!user.verify_password("Secret"));
}

#[test]
fn session_display_name_falls_back_to_email() {
    let session = Session {
        email: "a@b.c".into(),
        role: Role::Admin,
        name: String::new(),
    };
    assert_eq!(session.display_name(), "a@b.c");
}
