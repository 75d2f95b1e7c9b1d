// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Forwards role-directed messages to the relay's notification and SMS
//! endpoints. Best effort: failures are logged and dropped.

use std::sync::Arc;

use tm_core::protocol::{NotifyRequest, SmsRequest};
use tm_core::{BusEvent, BusMessage};

use crate::relay::Relay;

/// What [`NotificationRelay::forward`] managed to hand over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Forwarded {
    pub notified: usize,
    pub sms_sent: bool,
}

pub struct NotificationRelay {
    relay: Arc<dyn Relay>,
}

impl NotificationRelay {
    pub fn new(relay: Arc<dyn Relay>) -> Self {
        NotificationRelay { relay }
    }

    /// Notifies each target role of `msg` and texts the patient on a
    /// provider update.
    pub async fn forward(&self, msg: &BusMessage) -> Forwarded {
        let mut forwarded = Forwarded::default();

        let payload = match serde_json::to_value(msg) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(id = %msg.id, "cannot encode notification: {}", e);
                return forwarded;
            }
        };

        for role in msg.targets() {
            let req = NotifyRequest {
                role,
                payload: payload.clone(),
                ts: msg.ts,
            };
            match self.relay.notify(req).await {
                Ok(()) => forwarded.notified += 1,
                Err(e) => tracing::warn!(id = %msg.id, %role, "notify failed: {}", e),
            }
        }

        if let Some(req) = provider_sms(msg) {
            match self.relay.sms(req).await {
                Ok(()) => forwarded.sms_sent = true,
                Err(e) => tracing::warn!(id = %msg.id, "sms failed: {}", e),
            }
        }

        forwarded
    }
}

/// Text sent to the patient after a provider update.
pub fn provider_sms_text(patient: &str, notes: Option<&str>) -> String {
    let notes = notes.map(str::trim).filter(|n| !n.is_empty());
    format!(
        "Provider update for {}: {}",
        patient,
        notes.unwrap_or("No notes")
    )
}

fn provider_sms(msg: &BusMessage) -> Option<SmsRequest> {
    let BusEvent::ProviderUpdate {
        consultation_code,
        patient_name,
        notes,
        contact,
    } = &msg.event
    else {
        return None;
    };
    let to = contact.as_deref().map(str::trim).filter(|c| !c.is_empty())?;
    let patient = patient_name.as_deref().unwrap_or("patient");
    Some(SmsRequest {
        to: to.to_string(),
        message: provider_sms_text(patient, notes.as_deref()),
        consultation_code: Some(consultation_code.to_string()),
        patient_name: patient_name.clone(),
        sender: msg.from_role.map(|r| r.to_string()),
    })
}

#[cfg(test)]
#[path = "notify_tests.rs"]
mod tests;
