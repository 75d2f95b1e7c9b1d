// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-context message bus.
//!
//! A published message travels on up to three paths:
//!
//! ```text
//! publish ──► durable log (comm:messages:v1)
//!        ├──► ephemeral channel (contexts of this process)
//!        ├──► fallback signal key (every context sharing the store)
//!        └──► local handlers
//! ```
//!
//! Receivers may see the same message on more than one path; every delivery
//! is de-duplicated by message id before handlers run.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tm_core::config::BusConfig;
use tm_core::store::keys;
use tm_core::{BusEvent, BusMessage, LocalStore, Recipient, Session};

use crate::error::Result;

/// Default capacity of an [`EphemeralChannel`].
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// In-process broadcast channel shared by the contexts of one process.
///
/// Cloning shares the channel.
#[derive(Clone)]
pub struct EphemeralChannel {
    tx: broadcast::Sender<BusMessage>,
}

impl EphemeralChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        EphemeralChannel { tx }
    }

    fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }

    fn send(&self, msg: BusMessage) {
        // No receivers is not an error: nobody else is listening yet.
        let _ = self.tx.send(msg);
    }
}

impl Default for EphemeralChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

type Handler = Arc<dyn Fn(&BusMessage) + Send + Sync>;

/// Bounded set of recently delivered message ids.
struct SeenSet {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenSet {
    fn new(capacity: usize) -> Self {
        SeenSet {
            order: VecDeque::new(),
            ids: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Records `id`; false if it was already present.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }
}

/// Publish/subscribe endpoint of one context.
pub struct MessageBus {
    store: LocalStore,
    config: BusConfig,
    channel: Option<EphemeralChannel>,
    receiver: Option<Mutex<broadcast::Receiver<BusMessage>>>,
    handlers: Mutex<Vec<Handler>>,
    seen: Mutex<SeenSet>,
    last_signal: Mutex<u64>,
    /// Id of the newest log entry already scanned.
    log_mark: Mutex<Option<String>>,
    opened_at: DateTime<Utc>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MessageBus {
    /// Opens the bus over the shared store, optionally attached to an
    /// ephemeral channel.
    ///
    /// Signals written before the bus opened are not replayed.
    pub fn open(
        store: LocalStore,
        config: BusConfig,
        channel: Option<EphemeralChannel>,
    ) -> Result<Self> {
        let last_signal = store.stamp(keys::SIGNAL)?.map(|s| s.version).unwrap_or(0);
        let receiver = channel.as_ref().map(|c| Mutex::new(c.subscribe()));
        Ok(MessageBus {
            seen: Mutex::new(SeenSet::new(config.dedupe_window)),
            store,
            config,
            channel,
            receiver,
            handlers: Mutex::new(Vec::new()),
            last_signal: Mutex::new(last_signal),
            log_mark: Mutex::new(None),
            opened_at: Utc::now(),
        })
    }

    /// Registers a handler run for every newly delivered message.
    pub fn on_message(&self, handler: impl Fn(&BusMessage) + Send + Sync + 'static) {
        lock(&self.handlers).push(Arc::new(handler));
    }

    /// Publishes an event and delivers it to this context's own handlers.
    ///
    /// Only reading the session can fail; transport failures are logged and
    /// local delivery still happens.
    pub fn publish(&self, event: BusEvent, to: Recipient) -> Result<BusMessage> {
        let from_role = self
            .store
            .read_opt::<Session>(keys::SESSION)?
            .map(|s| s.role);
        let msg = BusMessage::new(event, from_role, to);

        self.append_to_log(&msg);

        if let Some(channel) = &self.channel {
            channel.send(msg.clone());
        }

        if let Err(e) = self.store.set(keys::SIGNAL, &msg) {
            tracing::warn!(id = %msg.id, "failed to write fallback signal: {}", e);
        }

        tracing::debug!(id = %msg.id, kind = msg.event.type_name(), to = %msg.to, "published");
        self.deliver(&msg);
        Ok(msg)
    }

    /// Delivers whatever arrived since the last call and returns how many
    /// messages reached the handlers.
    pub fn pump(&self) -> Result<usize> {
        let mut delivered = 0;

        for msg in self.drain_channel() {
            self.append_to_log(&msg);
            if self.deliver(&msg) {
                delivered += 1;
            }
        }

        let Some(stamp) = self.store.stamp(keys::SIGNAL)? else {
            return Ok(delivered);
        };
        {
            let mut last = lock(&self.last_signal);
            if stamp.version == *last {
                return Ok(delivered);
            }
            *last = stamp.version;
        }

        if stamp.writer != self.store.writer() {
            if let Some(msg) = self.store.read_opt::<BusMessage>(keys::SIGNAL)? {
                if self.deliver(&msg) {
                    delivered += 1;
                }
            }
        }

        // A signal can be overwritten between two probes; the log still has
        // every message. Only entries past the last scanned one are new; if
        // that entry was trimmed away the whole log is.
        let log: Vec<BusMessage> = self.store.read(keys::MESSAGES)?.value;
        let start = {
            let mark = lock(&self.log_mark);
            mark.as_ref()
                .and_then(|id| log.iter().position(|m| &m.id == id))
                .map_or(0, |i| i + 1)
        };
        for msg in log[start..].iter().filter(|m| m.ts >= self.opened_at) {
            if self.deliver(msg) {
                delivered += 1;
            }
        }
        if let Some(newest) = log.last() {
            *lock(&self.log_mark) = Some(newest.id.clone());
        }

        Ok(delivered)
    }

    /// Calls [`pump`](Self::pump) every `poll_interval_ms`, forever.
    pub async fn listen(&self) {
        let period = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.pump() {
                tracing::warn!("message pump failed: {}", e);
            }
        }
    }

    /// Logged messages matching `filter`, oldest first.
    pub fn messages(&self, filter: impl Fn(&BusMessage) -> bool) -> Result<Vec<BusMessage>> {
        let log: Vec<BusMessage> = self.store.read(keys::MESSAGES)?.value;
        Ok(log.into_iter().filter(|m| filter(m)).collect())
    }

    fn drain_channel(&self) -> Vec<BusMessage> {
        let Some(receiver) = &self.receiver else {
            return Vec::new();
        };
        let mut rx = lock(receiver);
        let mut received = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(msg) => received.push(msg),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "ephemeral channel lagged, relying on signal");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        received
    }

    /// Appends to the durable log unless already present, trimming the
    /// oldest entries beyond capacity. Failures are logged, not returned.
    fn append_to_log(&self, msg: &BusMessage) {
        let capacity = self.config.log_capacity.max(1);
        let appended = self
            .store
            .update::<Vec<BusMessage>, _, _>(keys::MESSAGES, |log| {
                if log.iter().any(|m| m.id == msg.id) {
                    return Ok(());
                }
                log.push(msg.clone());
                if log.len() > capacity {
                    let excess = log.len() - capacity;
                    log.drain(..excess);
                }
                Ok(())
            });
        if let Err(e) = appended {
            tracing::warn!(id = %msg.id, "failed to append to message log: {}", e);
        }
    }

    /// Runs handlers for a message not seen before; false if it was a
    /// duplicate.
    fn deliver(&self, msg: &BusMessage) -> bool {
        if !lock(&self.seen).insert(&msg.id) {
            return false;
        }
        let handlers: Vec<Handler> = lock(&self.handlers).clone();
        for handler in handlers {
            handler(msg);
        }
        true
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
