// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Outbox of mutations awaiting acknowledgment from the remote store.
//!
//! The outbox is a JSON array under the `outbox` key, oldest first. Items stay
//! until a downstream acknowledges them; nothing is dropped on failure.
//!
//! Item lifecycle:
//!
//! ```text
//! PENDING ──► IN_FLIGHT ──► ACKED (removed)
//!    ▲            │
//!    └── FAILED ◄─┘──► REJECTED (after max_rejections remote rejections)
//! ```
//!
//! `IN_FLIGHT` only exists inside the draining context; an item persisted in
//! that state is treated as pending.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::key::NaturalKey;
use crate::model::{Consultation, ConsultationPatch, Schedule};
use crate::repository::Record;
use crate::store::{keys, LocalStore, Versioned};

/// Full snapshot of a created record, tagged by table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "row", rename_all = "snake_case")]
pub enum RecordSnapshot {
    Consultations(Consultation),
    Schedules(Schedule),
}

impl RecordSnapshot {
    /// Remote table the snapshot belongs to.
    pub fn table(&self) -> &'static str {
        match self {
            RecordSnapshot::Consultations(_) => Consultation::COLLECTION,
            RecordSnapshot::Schedules(_) => Schedule::COLLECTION,
        }
    }

    /// Column holding the natural key in that table.
    pub fn key_field(&self) -> &'static str {
        match self {
            RecordSnapshot::Consultations(_) => Consultation::KEY_FIELD,
            RecordSnapshot::Schedules(_) => Schedule::KEY_FIELD,
        }
    }

    pub fn natural_key(&self) -> &str {
        match self {
            RecordSnapshot::Consultations(c) => c.natural_key(),
            RecordSnapshot::Schedules(s) => s.natural_key(),
        }
    }

    /// The row as sent to the remote store.
    pub fn to_row(&self) -> Result<Value> {
        let row = match self {
            RecordSnapshot::Consultations(c) => serde_json::to_value(c)?,
            RecordSnapshot::Schedules(s) => serde_json::to_value(s)?,
        };
        Ok(row)
    }
}

/// A pending change to the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    /// Insert a record if the remote does not have it yet.
    Create { record: RecordSnapshot },
    /// Patch an existing consultation.
    UpdateConsultation {
        key: NaturalKey,
        patch: ConsultationPatch,
    },
}

impl Mutation {
    pub fn table(&self) -> &'static str {
        match self {
            Mutation::Create { record } => record.table(),
            Mutation::UpdateConsultation { .. } => Consultation::COLLECTION,
        }
    }

    pub fn natural_key(&self) -> &str {
        match self {
            Mutation::Create { record } => record.natural_key(),
            Mutation::UpdateConsultation { key, .. } => key.as_str(),
        }
    }
}

impl From<Consultation> for Mutation {
    fn from(c: Consultation) -> Self {
        Mutation::Create {
            record: RecordSnapshot::Consultations(c),
        }
    }
}

impl From<Schedule> for Mutation {
    fn from(s: Schedule) -> Self {
        Mutation::Create {
            record: RecordSnapshot::Schedules(s),
        }
    }
}

/// Delivery state of an outbox item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxState {
    #[default]
    Pending,
    InFlight,
    /// Rejected by the remote too many times; kept for inspection, never retried.
    Rejected,
}

/// One queued mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxItem {
    pub id: String,
    pub mutation: Mutation,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub rejections: u32,
    #[serde(default)]
    pub state: OutboxState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl OutboxItem {
    pub fn new(mutation: Mutation) -> Self {
        OutboxItem {
            id: uuid::Uuid::new_v4().to_string(),
            mutation,
            enqueued_at: Utc::now(),
            attempts: 0,
            rejections: 0,
            state: OutboxState::Pending,
            last_error: None,
        }
    }

    /// True unless the item has been rejected for good.
    pub fn is_deliverable(&self) -> bool {
        self.state != OutboxState::Rejected
    }
}

/// Result of one delivery attempt, fed back through [`Outbox::settle`].
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Acknowledged downstream; the item is removed.
    Acked,
    /// Downstream unreachable; retried on the next drain.
    Failed(String),
    /// Downstream refused the mutation; counts towards the rejection cap.
    Rejected(String),
}

/// What [`Outbox::settle`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Settled {
    pub removed: usize,
    pub requeued: usize,
    /// Items that reached the rejection cap in this settlement.
    pub newly_rejected: usize,
    /// Items left in the outbox afterwards, of any state.
    pub remaining: usize,
}

/// Durable FIFO of [`OutboxItem`]s.
#[derive(Debug, Clone)]
pub struct Outbox {
    store: LocalStore,
}

impl Outbox {
    pub fn new(store: LocalStore) -> Self {
        Outbox { store }
    }

    /// Appends a mutation and returns the queued item.
    pub fn enqueue(&self, mutation: impl Into<Mutation>) -> Result<OutboxItem> {
        let item = OutboxItem::new(mutation.into());
        self.store
            .update::<Vec<OutboxItem>, _, _>(keys::OUTBOX, |items| {
                items.push(item.clone());
                Ok(())
            })?;
        tracing::debug!(id = %item.id, key = item.mutation.natural_key(), "enqueued");
        Ok(item)
    }

    /// Every item with the version it was read at.
    pub fn snapshot(&self) -> Result<Versioned<Vec<OutboxItem>>> {
        self.store.read(keys::OUTBOX)
    }

    /// Every item, oldest first, including rejected ones.
    pub fn all(&self) -> Result<Vec<OutboxItem>> {
        Ok(self.snapshot()?.value)
    }

    /// Items still eligible for delivery, oldest first.
    pub fn pending(&self) -> Result<Vec<OutboxItem>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(OutboxItem::is_deliverable)
            .collect())
    }

    /// Items parked after too many rejections.
    pub fn rejected(&self) -> Result<Vec<OutboxItem>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|item| !item.is_deliverable())
            .collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.all()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Applies the results of a drain to the current outbox.
    ///
    /// Runs against a fresh read, so items enqueued by other contexts while
    /// the drain was in progress are preserved. Outcomes for items that are
    /// already gone (acked by another context) are ignored.
    pub fn settle(&self, outcomes: &[(String, Delivery)], max_rejections: u32) -> Result<Settled> {
        self.store
            .update::<Vec<OutboxItem>, _, _>(keys::OUTBOX, |items| {
                let mut settled = Settled::default();
                let acked: HashSet<&str> = outcomes
                    .iter()
                    .filter(|(_, d)| *d == Delivery::Acked)
                    .map(|(id, _)| id.as_str())
                    .collect();

                let before = items.len();
                items.retain(|item| !acked.contains(item.id.as_str()));
                settled.removed = before - items.len();

                for (id, delivery) in outcomes {
                    let Some(item) = items.iter_mut().find(|item| &item.id == id) else {
                        continue;
                    };
                    match delivery {
                        Delivery::Acked => {}
                        Delivery::Failed(error) => {
                            item.attempts += 1;
                            item.state = OutboxState::Pending;
                            item.last_error = Some(error.clone());
                            settled.requeued += 1;
                        }
                        Delivery::Rejected(error) => {
                            item.attempts += 1;
                            item.rejections += 1;
                            item.last_error = Some(error.clone());
                            if item.rejections >= max_rejections {
                                item.state = OutboxState::Rejected;
                                settled.newly_rejected += 1;
                            } else {
                                item.state = OutboxState::Pending;
                                settled.requeued += 1;
                            }
                        }
                    }
                }

                settled.remaining = items.len();
                Ok(settled)
            })
    }

    /// Removes exactly the given items, all at once.
    pub fn remove(&self, ids: &[String]) -> Result<usize> {
        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        self.store
            .update::<Vec<OutboxItem>, _, _>(keys::OUTBOX, |items| {
                let before = items.len();
                items.retain(|item| !ids.contains(item.id.as_str()));
                Ok(before - items.len())
            })
    }

    /// Manually drops one item.
    pub fn purge(&self, id: &str) -> Result<OutboxItem> {
        self.store
            .update::<Vec<OutboxItem>, _, _>(keys::OUTBOX, |items| {
                let pos = items
                    .iter()
                    .position(|item| item.id == id)
                    .ok_or_else(|| Error::OutboxItemNotFound(id.to_string()))?;
                Ok(items.remove(pos))
            })
    }

    /// Drops every rejected item and returns how many were dropped.
    pub fn purge_rejected(&self) -> Result<usize> {
        self.store
            .update::<Vec<OutboxItem>, _, _>(keys::OUTBOX, |items| {
                let before = items.len();
                items.retain(OutboxItem::is_deliverable);
                Ok(before - items.len())
            })
    }

    /// Empties the outbox.
    pub fn clear(&self) -> Result<()> {
        self.store.set(keys::OUTBOX, &Vec::<OutboxItem>::new())?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "outbox_tests.rs"]
mod tests;
