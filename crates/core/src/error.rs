// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for tm-core operations.

use thiserror::Error;

/// All possible errors that can occur in tm-core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("record not found: {collection}/{key}")]
    RecordNotFound { collection: String, key: String },

    #[error("duplicate natural key: {collection}/{key}")]
    DuplicateKey { collection: String, key: String },

    #[error("version conflict on '{key}': expected {expected}, found {actual}")]
    VersionConflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("gave up writing '{key}' after {attempts} conflicting attempts")]
    Contention { key: String, attempts: u32 },

    #[error("outbox item not found: {0}")]
    OutboxItemNotFound(String),

    #[error("invalid role: '{0}'\n  hint: valid roles are: cashier, provider, pharmacist, admin")]
    InvalidRole(String),

    #[error("invalid status: '{0}'\n  hint: valid statuses are: registered, provider-updated, pharmacy-updated, med-dispensed, finalized")]
    InvalidStatus(String),

    #[error("invalid natural key: '{0}'")]
    InvalidKey(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A specialized Result type for tm-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
