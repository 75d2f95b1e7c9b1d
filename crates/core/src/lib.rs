// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tm-core: Shared library for the telemed clinic contexts
//!
//! This crate provides the record types, the durable local store shared by
//! every context, the outbox of pending remote mutations, the message bus
//! envelope and the relay wire bodies used by both `tm-sync` and `tm-relay`.

pub mod config;
pub mod error;
pub mod key;
pub mod message;
pub mod model;
pub mod outbox;
pub mod protocol;
pub mod report;
pub mod repository;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use key::{ClockSource, KeyGenerator, NaturalKey, SystemClock};
pub use message::{BusEvent, BusMessage, Recipient};
pub use model::{
    Consultation, ConsultationPatch, ConsultationStatus, NewPatient, Role, Schedule, Session, User,
};
pub use outbox::{Delivery, Mutation, Outbox, OutboxItem, OutboxState, RecordSnapshot, Settled};
pub use report::{group_by_patient, FeeTotals, PeriodTotal};
pub use repository::{Record, Repository};
pub use store::{LocalStore, Stamp, Versioned};
