// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Natural keys for records.
//!
//! A natural key is generated by the context that creates a record and is the
//! only join key with the remote store. Format: `{prefix}{time}{suffix}` where
//! `time` is the upper-case base-36 millisecond clock and `suffix` is
//! [`SUFFIX_LEN`] random base-36 characters.
//!
//! The generator never issues the same clock component twice, so keys from a
//! single generator sort by creation order and collide only across contexts
//! that hit the same millisecond *and* the same random suffix.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// Number of random characters appended to every key.
pub const SUFFIX_LEN: usize = 4;

/// Prefix for consultation codes.
pub const CONSULTATION_PREFIX: char = 'C';

/// Prefix for schedule codes.
pub const SCHEDULE_PREFIX: char = 'S';

const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A record's natural key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NaturalKey(String);

impl NaturalKey {
    /// Parses and validates a natural key.
    ///
    /// Keys are an upper-case ASCII letter followed by at least two upper-case
    /// alphanumeric characters.
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the leading prefix letter.
    pub fn prefix(&self) -> char {
        self.0.chars().next().unwrap_or(CONSULTATION_PREFIX)
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NaturalKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        let valid = matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
            && s.len() >= 3
            && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
        if !valid {
            return Err(Error::InvalidKey(s.to_string()));
        }
        Ok(NaturalKey(s.to_string()))
    }
}

impl AsRef<str> for NaturalKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for NaturalKey {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for NaturalKey {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Trait for getting the current wall clock time.
///
/// This allows injecting a mock clock for testing.
pub trait ClockSource: Send + Sync {
    /// Returns the current time in milliseconds since Unix epoch.
    fn now_ms(&self) -> u64;
}

/// System clock implementation using `std::time::SystemTime`.
#[derive(Debug, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

impl<C: ClockSource> ClockSource for &C {
    fn now_ms(&self) -> u64 {
        (*self).now_ms()
    }
}

/// Generates natural keys with a monotonic time component.
pub struct KeyGenerator<C: ClockSource = SystemClock> {
    clock: C,
    last_ms: Mutex<u64>,
}

impl KeyGenerator<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for KeyGenerator<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ClockSource> KeyGenerator<C> {
    /// Creates a generator with a custom clock source.
    pub fn with_clock(clock: C) -> Self {
        KeyGenerator {
            clock,
            last_ms: Mutex::new(0),
        }
    }

    /// Generates a key with the given prefix letter.
    ///
    /// If the wall clock stalls or goes backwards the time component is bumped
    /// past the last one issued.
    pub fn generate(&self, prefix: char) -> NaturalKey {
        let ms = {
            let mut last = self.last_ms.lock().unwrap_or_else(|e| e.into_inner());
            let physical = self.clock.now_ms();
            *last = if physical > *last { physical } else { *last + 1 };
            *last
        };

        let mut rng = rand::thread_rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
            .collect();

        NaturalKey(format!("{}{}{}", prefix.to_ascii_uppercase(), to_base36(ms), suffix))
    }

    /// Generates a consultation code.
    pub fn consultation(&self) -> NaturalKey {
        self.generate(CONSULTATION_PREFIX)
    }

    /// Generates a schedule code.
    pub fn schedule(&self) -> NaturalKey {
        self.generate(SCHEDULE_PREFIX)
    }
}

/// Encodes a number as upper-case base-36.
pub fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

#[cfg(test)]
#[path = "key_tests.rs"]
mod tests;
