// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

use crate::relay::RelayError;
use crate::remote::RemoteError;

/// Errors returned by context operations.
///
/// Remote and relay failures during a mutation are logged, not returned; they
/// only surface from calls that talk to a downstream directly.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] tm_core::Error),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("an account with email '{0}' already exists\n  hint: sign in instead")]
    EmailTaken(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("{0}")]
    InvalidInput(String),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// True if the error is a missing record the caller asked for by key.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Core(tm_core::Error::RecordNotFound { .. }) | Error::UserNotFound(_)
        )
    }
}

/// A specialized Result type for tm-sync operations.
pub type Result<T> = std::result::Result<T, Error>;
