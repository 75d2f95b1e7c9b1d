// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tm-sync: Offline-first sync and messaging for the telemed contexts
//!
//! A [`Context`] writes to the shared local store first, queues the change in
//! the outbox and announces it on the [`MessageBus`]. The [`SyncEngine`]
//! drains the outbox to the remote store, or to the relay when no remote is
//! configured.

pub mod bus;
pub mod context;
pub mod engine;
pub mod error;
pub mod notify;
pub mod relay;
pub mod remote;

pub use bus::{EphemeralChannel, MessageBus};
pub use context::Context;
pub use engine::{DrainReport, SyncEngine};
pub use error::{Error, Result};
pub use notify::{Forwarded, NotificationRelay};
pub use relay::{HttpRelay, MemoryRelay, Relay, RelayError};
pub use remote::{MemoryRemoteStore, RemoteError, RemoteStore, RestRemoteStore};
