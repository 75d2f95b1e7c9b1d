// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

/// Errors raised while serving relay requests.
#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] tm_core::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("invalid stored timestamp '{0}'")]
    Timestamp(String),
}

pub type Result<T> = std::result::Result<T, Error>;
