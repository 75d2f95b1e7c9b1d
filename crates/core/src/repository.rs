// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Typed access to record collections in the local store.
//!
//! Each collection is stored as one JSON array under its own key. Reads and
//! writes replace the full snapshot; read-modify-write helpers re-read right
//! before mutating and retry on a version conflict.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};
use crate::model::Session;
use crate::store::{keys, LocalStore, Versioned};

/// A record stored as an element of a named collection.
pub trait Record: Serialize + DeserializeOwned + Clone {
    /// Store key of the collection, also the remote table name.
    const COLLECTION: &'static str;
    /// Name of the natural key column.
    const KEY_FIELD: &'static str;

    /// The record's natural key.
    fn natural_key(&self) -> &str;
}

/// Record repository over a [`LocalStore`].
#[derive(Debug, Clone)]
pub struct Repository {
    store: LocalStore,
}

impl Repository {
    pub fn new(store: LocalStore) -> Self {
        Repository { store }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// All records of a collection, in stored order.
    pub fn get<R: Record>(&self) -> Result<Vec<R>> {
        Ok(self.snapshot::<R>()?.value)
    }

    /// All records together with the version they were read at.
    pub fn snapshot<R: Record>(&self) -> Result<Versioned<Vec<R>>> {
        self.store.read(R::COLLECTION)
    }

    /// Replaces the full collection, if unchanged since `read_version`.
    pub fn put<R: Record>(&self, records: &[R], read_version: u64) -> Result<u64> {
        self.store.write(R::COLLECTION, records, read_version)
    }

    /// Looks up one record by natural key.
    pub fn find_by_key<R: Record>(&self, key: &str) -> Result<Option<R>> {
        Ok(self
            .get::<R>()?
            .into_iter()
            .find(|r| r.natural_key() == key))
    }

    /// Appends a record.
    ///
    /// Fails with [`Error::DuplicateKey`] if the natural key is already taken.
    pub fn insert<R: Record>(&self, record: R) -> Result<()> {
        self.store.update::<Vec<R>, _, _>(R::COLLECTION, |records| {
            if records
                .iter()
                .any(|r| r.natural_key() == record.natural_key())
            {
                return Err(Error::DuplicateKey {
                    collection: R::COLLECTION.to_string(),
                    key: record.natural_key().to_string(),
                });
            }
            records.push(record.clone());
            Ok(())
        })
    }

    /// Mutates one record in place and returns its new value.
    ///
    /// Fails with [`Error::RecordNotFound`] if no record has the key.
    pub fn update_by_key<R, F>(&self, key: &str, mut f: F) -> Result<R>
    where
        R: Record,
        F: FnMut(&mut R),
    {
        self.store.update::<Vec<R>, _, _>(R::COLLECTION, |records| {
            let record = records
                .iter_mut()
                .find(|r| r.natural_key() == key)
                .ok_or_else(|| Error::RecordNotFound {
                    collection: R::COLLECTION.to_string(),
                    key: key.to_string(),
                })?;
            f(record);
            Ok(record.clone())
        })
    }

    /// Inserts or replaces records by natural key, keeping the order of
    /// records already present.
    pub fn merge<R: Record>(&self, incoming: &[R]) -> Result<()> {
        self.store.update::<Vec<R>, _, _>(R::COLLECTION, |records| {
            for record in incoming {
                match records
                    .iter_mut()
                    .find(|r| r.natural_key() == record.natural_key())
                {
                    Some(existing) => *existing = record.clone(),
                    None => records.push(record.clone()),
                }
            }
            Ok(())
        })
    }

    /// The signed-in session, if any.
    pub fn session(&self) -> Result<Option<Session>> {
        self.store.read_opt(keys::SESSION)
    }

    pub fn set_session(&self, session: &Session) -> Result<()> {
        self.store.set(keys::SESSION, session)?;
        Ok(())
    }

    pub fn clear_session(&self) -> Result<()> {
        self.store.remove(keys::SESSION)
    }
}

#[cfg(test)]
#[path = "repository_tests.rs"]
mod tests;
