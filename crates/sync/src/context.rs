// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! One staff context: a signed-in role working against the shared store.
//!
//! Every mutation follows the same path:
//!
//! ```text
//! repository write ──► outbox enqueue ──► bus publish ──► notifications ──► drain
//! ```
//!
//! Only the repository write can fail the call. Downstream problems are
//! logged and left for the next drain.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tm_core::protocol::LoginRequest;
use tm_core::{
    BusEvent, BusMessage, Config, Consultation, ConsultationPatch, ConsultationStatus, FeeTotals,
    KeyGenerator, LocalStore, Mutation, NaturalKey, NewPatient, Outbox, Recipient, Record,
    Repository, Role, Schedule, Session, User,
};

use crate::bus::{EphemeralChannel, MessageBus};
use crate::engine::{DrainReport, SyncEngine};
use crate::error::{Error, Result};
use crate::notify::NotificationRelay;
use crate::relay::{HttpRelay, Relay};
use crate::remote::{RemoteStore, RestRemoteStore};

/// Column the consultation list is ordered by, newest first.
const CONSULTATION_ORDER: &str = "cashier_registered_at";

pub struct Context {
    repo: Repository,
    outbox: Outbox,
    keys: KeyGenerator,
    bus: Arc<MessageBus>,
    engine: SyncEngine,
    notifier: NotificationRelay,
    remote: Option<Arc<dyn RemoteStore>>,
    relay: Arc<dyn Relay>,
}

impl Context {
    /// Opens a context from configuration.
    ///
    /// Uses the remote store when one is configured, the relay otherwise.
    /// `name` identifies this context's writes in the shared store.
    pub fn open(config: &Config, name: &str, channel: Option<EphemeralChannel>) -> Result<Self> {
        let store = LocalStore::open(&config.store_path(), writer_id(name))?;
        let remote: Option<Arc<dyn RemoteStore>> = match config.remote_configured() {
            Some(remote) => Some(Arc::new(RestRemoteStore::new(remote)?)),
            None => {
                tracing::info!("no remote store configured, queueing to relay");
                None
            }
        };
        let relay: Arc<dyn Relay> = Arc::new(HttpRelay::new(&config.relay)?);
        Self::with_backends(store, config, remote, relay, channel)
    }

    /// Opens a context over explicit backends.
    pub fn with_backends(
        store: LocalStore,
        config: &Config,
        remote: Option<Arc<dyn RemoteStore>>,
        relay: Arc<dyn Relay>,
        channel: Option<EphemeralChannel>,
    ) -> Result<Self> {
        let outbox = Outbox::new(store.clone());
        let bus = Arc::new(MessageBus::open(
            store.clone(),
            config.bus.clone(),
            channel,
        )?);
        let engine = SyncEngine::new(
            outbox.clone(),
            remote.clone(),
            Arc::clone(&relay),
            config.sync.max_rejections,
        );
        tracing::debug!(writer = store.writer(), remote = remote.is_some(), "context opened");
        Ok(Context {
            repo: Repository::new(store),
            outbox,
            keys: KeyGenerator::new(),
            bus,
            engine,
            notifier: NotificationRelay::new(Arc::clone(&relay)),
            remote,
            relay,
        })
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Shared handle to the bus, e.g. to spawn [`MessageBus::listen`].
    pub fn bus(&self) -> Arc<MessageBus> {
        Arc::clone(&self.bus)
    }

    // -- accounts --

    /// Creates a local account and signs it in.
    pub async fn sign_up(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<Session> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(Error::InvalidInput(
                "please provide email and password".into(),
            ));
        }
        let user = User::new(name, email, password, role, Utc::now());
        self.repo.insert(user.clone()).map_err(|e| match e {
            tm_core::Error::DuplicateKey { key, .. } => Error::EmailTaken(key),
            e => Error::Core(e),
        })?;
        tracing::info!(email = %user.email, %role, "account created");
        self.start_session(&user).await
    }

    /// Signs in with a local account.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let email = tm_core::model::normalize_email(email);
        let user: User = self
            .repo
            .find_by_key(&email)?
            .ok_or_else(|| Error::UserNotFound(email.clone()))?;
        if !user.verify_password(password) {
            return Err(Error::InvalidCredentials);
        }
        self.start_session(&user).await
    }

    pub fn sign_out(&self) -> Result<()> {
        self.repo.clear_session()?;
        Ok(())
    }

    /// The signed-in user, shared by every context of the store.
    pub fn session(&self) -> Result<Option<Session>> {
        Ok(self.repo.session()?)
    }

    async fn start_session(&self, user: &User) -> Result<Session> {
        let session = user.session();
        self.repo.set_session(&session)?;
        let login = LoginRequest {
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
        };
        if let Err(e) = self.relay.login(login).await {
            tracing::warn!(email = %user.email, "login not recorded: {}", e);
        }
        Ok(session)
    }

    // -- clinic workflow --

    /// Registers a patient and queues the new consultation.
    pub async fn register_patient(&self, mut patient: NewPatient) -> Result<Consultation> {
        patient.validate()?;
        if patient.created_by.is_none() {
            patient.created_by = self.session()?.map(|s| s.email);
        }
        let consultation = Consultation::register(self.keys.consultation(), patient, Utc::now());
        self.repo.insert(consultation.clone())?;
        self.outbox.enqueue(consultation.clone())?;

        let event = BusEvent::ConsultationCreated {
            consultation_code: consultation.consultation_code.clone(),
            patient_name: consultation.patient_name.clone(),
            fee: consultation.fee,
        };
        self.announce(event, Recipient::All).await;
        tracing::info!(code = %consultation.consultation_code, fee = consultation.fee, "patient registered");
        Ok(consultation)
    }

    /// Records provider notes and tells the pharmacy.
    pub async fn provider_update(
        &self,
        code: &str,
        notes: Option<String>,
        medication_refill: bool,
    ) -> Result<Consultation> {
        let patch = ConsultationPatch::Provider {
            notes,
            medication_refill,
            at: Utc::now(),
        };
        let updated = self.apply_patch(code, patch)?;
        let event = BusEvent::ProviderUpdate {
            consultation_code: updated.consultation_code.clone(),
            patient_name: Some(updated.patient_name.clone()),
            notes: updated.provider_notes.clone(),
            contact: updated.contact().map(str::to_string),
        };
        self.announce(event, Recipient::Role(Role::Pharmacist)).await;
        Ok(updated)
    }

    /// Records whether medication was dispensed.
    pub async fn pharmacy_update(&self, code: &str, dispensed: bool) -> Result<Consultation> {
        let patch = ConsultationPatch::Pharmacy {
            dispensed,
            at: Utc::now(),
        };
        let updated = self.apply_patch(code, patch)?;
        let event = BusEvent::PharmacyUpdate {
            consultation_code: updated.consultation_code.clone(),
            patient_name: Some(updated.patient_name.clone()),
            dispensed,
        };
        self.announce(event, Recipient::All).await;
        Ok(updated)
    }

    /// Closes a consultation.
    pub async fn finalize(&self, code: &str) -> Result<Consultation> {
        let updated = self.apply_patch(code, ConsultationPatch::Finalize { at: Utc::now() })?;
        let event = BusEvent::ConsultationUpdate {
            consultation_code: updated.consultation_code.clone(),
            status: ConsultationStatus::Finalized,
        };
        self.announce(event, Recipient::All).await;
        Ok(updated)
    }

    /// Broadcasts an admin schedule to the given roles.
    pub async fn send_schedule(
        &self,
        date: NaiveDate,
        message: &str,
        targets: Vec<Role>,
    ) -> Result<Schedule> {
        let message = message.trim();
        if message.is_empty() {
            return Err(Error::InvalidInput("schedule message is required".into()));
        }
        if targets.is_empty() {
            return Err(Error::InvalidInput(
                "schedule needs at least one target role".into(),
            ));
        }
        let schedule = Schedule {
            schedule_code: self.keys.schedule(),
            date,
            message: message.to_string(),
            targets,
            created_by: self.session()?.map(|s| s.email),
            ts: Utc::now(),
        };
        self.repo.insert(schedule.clone())?;
        self.outbox.enqueue(schedule.clone())?;

        let event = BusEvent::Schedule {
            schedule_code: schedule.schedule_code.clone(),
            date: schedule.date,
            message: schedule.message.clone(),
            targets: schedule.targets.clone(),
        };
        self.announce(event, Recipient::All).await;
        Ok(schedule)
    }

    /// Consultations, newest first.
    ///
    /// Reads the remote store when one is configured and reachable, the
    /// local repository otherwise.
    pub async fn fetch_consultations(&self) -> Result<Vec<Consultation>> {
        if let Some(remote) = &self.remote {
            match remote
                .list_all(Consultation::COLLECTION, CONSULTATION_ORDER)
                .await
            {
                Ok(rows) => {
                    return Ok(rows
                        .into_iter()
                        .filter_map(|row| match serde_json::from_value(row) {
                            Ok(c) => Some(c),
                            Err(e) => {
                                tracing::warn!("skipping unreadable remote row: {}", e);
                                None
                            }
                        })
                        .collect());
                }
                Err(e) => tracing::warn!("remote list failed, using local copy: {}", e),
            }
        }
        let mut local: Vec<Consultation> = self.repo.get()?;
        // Stored in registration order; ties stay newest first.
        local.reverse();
        local.sort_by(|a, b| b.cashier_registered_at.cmp(&a.cashier_registered_at));
        Ok(local)
    }

    /// Fee totals over the local consultations.
    pub fn fee_totals(&self) -> Result<FeeTotals> {
        let consultations: Vec<Consultation> = self.repo.get()?;
        Ok(FeeTotals::compute(&consultations, Utc::now()))
    }

    /// Logged bus messages addressed to `role`.
    pub fn messages_for(&self, role: Role) -> Result<Vec<BusMessage>> {
        self.bus.messages(|m| m.is_for(role))
    }

    /// Drains the outbox after connectivity comes back.
    pub async fn connectivity_regained(&self) -> Result<DrainReport> {
        tracing::info!("connectivity regained, draining outbox");
        self.drain().await
    }

    /// Drains the outbox and announces `sync_completed` when anything was
    /// delivered.
    async fn drain(&self) -> Result<DrainReport> {
        let report = self.engine.drain().await?;
        if report.delivered > 0 {
            let event = BusEvent::SyncCompleted {
                delivered: report.delivered,
                remaining: report.remaining,
            };
            if let Err(e) = self.bus.publish(event, Recipient::All) {
                tracing::warn!("failed to announce sync: {}", e);
            }
        }
        Ok(report)
    }

    fn apply_patch(&self, code: &str, patch: ConsultationPatch) -> Result<Consultation> {
        let key = NaturalKey::parse(code)?;
        let updated: Consultation = self
            .repo
            .update_by_key(key.as_str(), |c: &mut Consultation| patch.apply(c))?;
        self.outbox
            .enqueue(Mutation::UpdateConsultation { key, patch })?;
        Ok(updated)
    }

    /// Publishes, forwards to the relay and drains, logging any failure.
    async fn announce(&self, event: BusEvent, to: Recipient) {
        match self.bus.publish(event, to) {
            Ok(msg) => {
                self.notifier.forward(&msg).await;
            }
            Err(e) => tracing::warn!("publish failed: {}", e),
        }
        if let Err(e) = self.drain().await {
            tracing::warn!("drain failed: {}", e);
        }
    }
}

/// Store writer id: the context name plus a per-open suffix, so two contexts
/// opened under the same name still see each other's writes.
fn writer_id(name: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{name}:{}", &suffix[..8])
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
