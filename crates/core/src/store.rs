//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: murmur — a peer-to-peer terminal chat system.
//

//! Repository implementations backing [`crate::entities::Repository`].
//!
//! `FileConnectionDetailsRepository` persists rows as a single JSON document,
//! loaded and rewritten whole on every mutation — the same pattern the
//! software-HSM key-metadata store uses for its key index, scaled down to a
//! single local chat database rather than a relational server.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use crate::entities::{ConnectionDetails, Entity, Repository, User};
use crate::error::StorageError;

const CONNECTION_DETAILS_FIELDS: &[&str] = &["host_unique_id", "client_unique_id"];
const USER_FIELDS: &[&str] = &["unique_id", "name"];

fn field(row: &ConnectionDetails, name: &str) -> Option<String> {
    match name {
        "host_unique_id" => Some(row.host_unique_id.clone()),
        "client_unique_id" => Some(row.client_unique_id.clone()),
        _ => None,
    }
}

fn user_field(row: &User, name: &str) -> Option<String> {
    match name {
        "unique_id" => Some(row.unique_id.clone()),
        "name" => Some(row.name.clone()),
        _ => None,
    }
}

/// A `ConnectionDetails` repository backed by a single JSON file on disk.
pub struct FileConnectionDetailsRepository {
    path: PathBuf,
    rows: Mutex<HashMap<i64, ConnectionDetails>>,
    next_id: AtomicI64,
}

impl FileConnectionDetailsRepository {
    /// Open (creating if absent) the JSON-backed connection-details table.
    pub fn open(path: PathBuf) -> Result<Self, StorageError> {
        let rows: HashMap<i64, ConnectionDetails> = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| StorageError::Io(e.to_string()))?;
            if content.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&content).map_err(|e| StorageError::Io(e.to_string()))?
            }
        } else {
            HashMap::new()
        };
        let next_id = rows.keys().copied().max().unwrap_or(0) + 1;
        Ok(Self {
            path,
            rows: Mutex::new(rows),
            next_id: AtomicI64::new(next_id),
        })
    }

    fn persist(&self, rows: &HashMap<i64, ConnectionDetails>) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(rows).map_err(|e| StorageError::Io(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        std::fs::write(&self.path, json).map_err(|e| StorageError::Io(e.to_string()))
    }
}

#[async_trait]
impl Repository<ConnectionDetails> for FileConnectionDetailsRepository {
    async fn get_one(&self, id: i64) -> Result<ConnectionDetails, StorageError> {
        self.rows
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn get_one_by(&self, f: &str, value: &str) -> Result<Option<ConnectionDetails>, StorageError> {
        if !CONNECTION_DETAILS_FIELDS.contains(&f) {
            return Err(StorageError::UnknownField(f.to_string()));
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .find(|row| field(row, f).as_deref() == Some(value))
            .cloned())
    }

    async fn get_all(&self) -> Result<Vec<ConnectionDetails>, StorageError> {
        Ok(self.rows.lock().unwrap().values().cloned().collect())
    }

    async fn get_all_by(&self, f: &str, value: &str) -> Result<Vec<ConnectionDetails>, StorageError> {
        if !CONNECTION_DETAILS_FIELDS.contains(&f) {
            return Err(StorageError::UnknownField(f.to_string()));
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|row| field(row, f).as_deref() == Some(value))
            .cloned()
            .collect())
    }

    async fn create(&self, mut entity: ConnectionDetails) -> Result<ConnectionDetails, StorageError> {
        let mut rows = self.rows.lock().unwrap();
        let clash = rows.values().any(|row| {
            row.host_unique_id == entity.host_unique_id && row.client_unique_id == entity.client_unique_id
        });
        if clash {
            return Err(StorageError::UniqueViolation(
                "(host_unique_id, client_unique_id)".into(),
            ));
        }
        entity.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        rows.insert(entity.id(), entity.clone());
        self.persist(&rows)?;
        Ok(entity)
    }

    async fn update(&self, entity: ConnectionDetails) -> Result<ConnectionDetails, StorageError> {
        let mut rows = self.rows.lock().unwrap();
        if !rows.contains_key(&entity.id()) {
            return Err(StorageError::NotFound);
        }
        rows.insert(entity.id(), entity.clone());
        self.persist(&rows)?;
        Ok(entity)
    }

    async fn delete(&self, id: i64) -> Result<(), StorageError> {
        let mut rows = self.rows.lock().unwrap();
        rows.remove(&id);
        self.persist(&rows)
    }
}

/// An in-memory `ConnectionDetails` repository, used by tests and as the
/// default when no storage path is configured.
#[derive(Default)]
pub struct InMemoryConnectionDetailsRepository {
    rows: Mutex<HashMap<i64, ConnectionDetails>>,
    next_id: AtomicI64,
}

impl InMemoryConnectionDetailsRepository {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl Repository<ConnectionDetails> for InMemoryConnectionDetailsRepository {
    async fn get_one(&self, id: i64) -> Result<ConnectionDetails, StorageError> {
        self.rows.lock().unwrap().get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn get_one_by(&self, f: &str, value: &str) -> Result<Option<ConnectionDetails>, StorageError> {
        if !CONNECTION_DETAILS_FIELDS.contains(&f) {
            return Err(StorageError::UnknownField(f.to_string()));
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .find(|row| field(row, f).as_deref() == Some(value))
            .cloned())
    }

    async fn get_all(&self) -> Result<Vec<ConnectionDetails>, StorageError> {
        Ok(self.rows.lock().unwrap().values().cloned().collect())
    }

    async fn get_all_by(&self, f: &str, value: &str) -> Result<Vec<ConnectionDetails>, StorageError> {
        if !CONNECTION_DETAILS_FIELDS.contains(&f) {
            return Err(StorageError::UnknownField(f.to_string()));
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|row| field(row, f).as_deref() == Some(value))
            .cloned()
            .collect())
    }

    async fn create(&self, mut entity: ConnectionDetails) -> Result<ConnectionDetails, StorageError> {
        let mut rows = self.rows.lock().unwrap();
        let clash = rows.values().any(|row| {
            row.host_unique_id == entity.host_unique_id && row.client_unique_id == entity.client_unique_id
        });
        if clash {
            return Err(StorageError::UniqueViolation(
                "(host_unique_id, client_unique_id)".into(),
            ));
        }
        entity.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        rows.insert(entity.id(), entity.clone());
        Ok(entity)
    }

    async fn update(&self, entity: ConnectionDetails) -> Result<ConnectionDetails, StorageError> {
        let mut rows = self.rows.lock().unwrap();
        if !rows.contains_key(&entity.id()) {
            return Err(StorageError::NotFound);
        }
        rows.insert(entity.id(), entity.clone());
        Ok(entity)
    }

    async fn delete(&self, id: i64) -> Result<(), StorageError> {
        self.rows.lock().unwrap().remove(&id);
        Ok(())
    }
}

/// An in-memory `User` repository satisfying the §4.7 `UserRepository`
/// contract; the relational mechanics beyond this narrow interface are an
/// external collaborator's responsibility.
#[derive(Default)]
pub struct InMemoryUserRepository {
    rows: Mutex<HashMap<i64, User>>,
    next_id: AtomicI64,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl Repository<User> for InMemoryUserRepository {
    async fn get_one(&self, id: i64) -> Result<User, StorageError> {
        self.rows.lock().unwrap().get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn get_one_by(&self, f: &str, value: &str) -> Result<Option<User>, StorageError> {
        if !USER_FIELDS.contains(&f) {
            return Err(StorageError::UnknownField(f.to_string()));
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .find(|row| user_field(row, f).as_deref() == Some(value))
            .cloned())
    }

    async fn get_all(&self) -> Result<Vec<User>, StorageError> {
        Ok(self.rows.lock().unwrap().values().cloned().collect())
    }

    async fn get_all_by(&self, f: &str, value: &str) -> Result<Vec<User>, StorageError> {
        if !USER_FIELDS.contains(&f) {
            return Err(StorageError::UnknownField(f.to_string()));
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|row| user_field(row, f).as_deref() == Some(value))
            .cloned()
            .collect())
    }

    async fn create(&self, mut entity: User) -> Result<User, StorageError> {
        let mut rows = self.rows.lock().unwrap();
        if rows.values().any(|row| row.unique_id == entity.unique_id) {
            return Err(StorageError::UniqueViolation("unique_id".into()));
        }
        entity.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        rows.insert(entity.id(), entity.clone());
        Ok(entity)
    }

    async fn update(&self, entity: User) -> Result<User, StorageError> {
        let mut rows = self.rows.lock().unwrap();
        if !rows.contains_key(&entity.id()) {
            return Err(StorageError::NotFound);
        }
        rows.insert(entity.id(), entity.clone());
        Ok(entity)
    }

    async fn delete(&self, id: i64) -> Result<(), StorageError> {
        self.rows.lock().unwrap().remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_repo_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connection_details.json");

        {
            let repo = FileConnectionDetailsRepository::open(path.clone()).unwrap();
            repo.create(ConnectionDetails {
                id: 0,
                host_unique_id: "u-A".into(),
                client_unique_id: "u-B".into(),
                encryption_key: "ek".into(),
                decryption_key: "dk".into(),
                key_derivation_salt: "salt".into(),
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        }

        let reopened = FileConnectionDetailsRepository::open(path).unwrap();
        let rows = reopened.get_all_by("host_unique_id", "u-A").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].client_unique_id, "u-B");
    }

    #[tokio::test]
    async fn duplicate_composite_key_is_rejected() {
        let repo = InMemoryConnectionDetailsRepository::new();
        let row = ConnectionDetails {
            id: 0,
            host_unique_id: "u-A".into(),
            client_unique_id: "u-B".into(),
            encryption_key: "ek".into(),
            decryption_key: "dk".into(),
            key_derivation_salt: "salt".into(),
            created_at: chrono::Utc::now(),
        };
        repo.create(row.clone()).await.unwrap();
        assert!(repo.create(row).await.is_err());
    }

    #[tokio::test]
    async fn unknown_field_lookup_is_rejected() {
        let repo = InMemoryConnectionDetailsRepository::new();
        assert!(repo.get_all_by("password", "x").await.is_err());
    }
}
