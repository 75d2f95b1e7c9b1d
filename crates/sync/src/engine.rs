// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Outbox drain.
//!
//! With a remote store configured, each pending item is delivered on its own
//! and acknowledged individually. Without one, all pending items are handed
//! to the relay in a single batch that either fully succeeds or changes
//! nothing.

use std::collections::HashSet;
use std::sync::Arc;

use tm_core::{Consultation, Delivery, Mutation, Outbox, Record};

use crate::error::Result;
use crate::relay::Relay;
use crate::remote::{RemoteError, RemoteStore};

/// Counts from one drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Items a delivery was tried for.
    pub attempted: usize,
    /// Items acknowledged and removed.
    pub delivered: usize,
    /// Items that hit a transient failure and stay queued.
    pub failed: usize,
    /// Items the remote refused in this cycle.
    pub rejected: usize,
    /// Items that reached the rejection cap in this cycle.
    pub parked: usize,
    /// Items skipped because an earlier item for the same key failed.
    pub deferred: usize,
    /// Items left in the outbox afterwards, parked ones included.
    pub remaining: usize,
}

/// Delivers outbox items downstream.
pub struct SyncEngine {
    outbox: Outbox,
    remote: Option<Arc<dyn RemoteStore>>,
    relay: Arc<dyn Relay>,
    max_rejections: u32,
    draining: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        outbox: Outbox,
        remote: Option<Arc<dyn RemoteStore>>,
        relay: Arc<dyn Relay>,
        max_rejections: u32,
    ) -> Self {
        SyncEngine {
            outbox,
            remote,
            relay,
            max_rejections,
            draining: tokio::sync::Mutex::new(()),
        }
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// True when deliveries go to a remote store rather than the relay.
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Runs one drain cycle.
    ///
    /// A drain already running in this context makes the call a no-op.
    pub async fn drain(&self) -> Result<DrainReport> {
        let Ok(_guard) = self.draining.try_lock() else {
            tracing::debug!("drain already in progress");
            return Ok(DrainReport {
                remaining: self.outbox.len()?,
                ..DrainReport::default()
            });
        };

        let report = match &self.remote {
            Some(remote) => self.drain_to_remote(remote.as_ref()).await?,
            None => self.drain_to_relay().await?,
        };
        tracing::debug!(?report, "drain finished");
        Ok(report)
    }

    async fn drain_to_remote(&self, remote: &dyn RemoteStore) -> Result<DrainReport> {
        let items = self.outbox.pending()?;
        let mut report = DrainReport::default();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut outcomes = Vec::with_capacity(items.len());

        for item in items {
            let key = item.mutation.natural_key().to_string();
            if blocked.contains(&key) {
                report.deferred += 1;
                continue;
            }
            report.attempted += 1;

            let delivery = match deliver(remote, &item.mutation).await {
                Ok(()) => {
                    report.delivered += 1;
                    Delivery::Acked
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(id = %item.id, key, "delivery failed: {}", e);
                    report.failed += 1;
                    blocked.insert(key);
                    Delivery::Failed(e.to_string())
                }
                Err(e) => {
                    tracing::warn!(id = %item.id, key, "delivery rejected: {}", e);
                    report.rejected += 1;
                    blocked.insert(key);
                    Delivery::Rejected(e.to_string())
                }
            };
            outcomes.push((item.id, delivery));
        }

        let settled = self.outbox.settle(&outcomes, self.max_rejections)?;
        report.parked = settled.newly_rejected;
        report.remaining = settled.remaining;
        Ok(report)
    }

    async fn drain_to_relay(&self) -> Result<DrainReport> {
        let items = self.outbox.pending()?;
        if items.is_empty() {
            return Ok(DrainReport {
                remaining: self.outbox.len()?,
                ..DrainReport::default()
            });
        }

        let ids: Vec<String> = items.iter().map(|item| item.id.clone()).collect();
        let mut report = DrainReport {
            attempted: items.len(),
            ..DrainReport::default()
        };

        match self.relay.post_queue(items).await {
            Ok(_) => {
                report.delivered = self.outbox.remove(&ids)?;
            }
            Err(e) => {
                tracing::warn!(count = ids.len(), "relay queue post failed: {}", e);
                report.failed = ids.len();
            }
        }
        report.remaining = self.outbox.len()?;
        Ok(report)
    }
}

async fn deliver(
    remote: &dyn RemoteStore,
    mutation: &Mutation,
) -> std::result::Result<(), RemoteError> {
    match mutation {
        Mutation::Create { record } => {
            let row = record
                .to_row()
                .map_err(|e| RemoteError::Rejected(format!("unserializable record: {e}")))?;
            remote
                .upsert_by_natural_key(record.table(), record.key_field(), row)
                .await
        }
        Mutation::UpdateConsultation { key, patch } => {
            remote
                .update_by_natural_key(
                    Consultation::COLLECTION,
                    Consultation::KEY_FIELD,
                    key.as_str(),
                    patch.to_fields(),
                )
                .await
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
