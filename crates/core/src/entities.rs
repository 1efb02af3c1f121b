//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: murmur — a peer-to-peer terminal chat system.
//

//! Entity shapes and the generic repository contract consumed by the core
//! (spec §3, §4.7). Only `ConnectionDetails` is persisted in-core; `User` and
//! the repository trait are the narrow interface the identity/chat facade is
//! expected to satisfy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// An entity addressable by a stable integer id.
pub trait Entity {
    fn id(&self) -> i64;
}

/// Local user identity (spec §3). `unique_id` is immutable once created;
/// `last_login` is the only field mutated post-creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub unique_id: String,
    pub name: String,
    pub password_hash: String,
    pub last_login: Option<DateTime<Utc>>,
}

impl Entity for User {
    fn id(&self) -> i64 {
        self.id
    }
}

impl User {
    pub fn new(id: i64, unique_id: String, name: String, password_hash: String) -> Self {
        Self {
            id,
            unique_id,
            name,
            password_hash,
            last_login: None,
        }
    }
}

/// Persistent symmetric-key trust record between two unique ids (spec §3).
/// `encryption_key`/`decryption_key` are always the KEK-wrapped, base64-
/// encoded ciphertext form; plaintext keys never reach this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDetails {
    pub id: i64,
    pub host_unique_id: String,
    pub client_unique_id: String,
    pub encryption_key: String,
    pub decryption_key: String,
    pub key_derivation_salt: String,
    pub created_at: DateTime<Utc>,
}

impl Entity for ConnectionDetails {
    fn id(&self) -> i64 {
        self.id
    }
}

/// Generic repository capability required of every entity store (spec §9
/// "Repositories as generics"). `*_by` field names are validated by each
/// implementation against a fixed allow-list to prevent injection.
#[async_trait]
pub trait Repository<T: Entity + Send + Sync>: Send + Sync {
    async fn get_one(&self, id: i64) -> Result<T, StorageError>;
    async fn get_one_by(&self, field: &str, value: &str) -> Result<Option<T>, StorageError>;
    async fn get_all(&self) -> Result<Vec<T>, StorageError>;
    async fn get_all_by(&self, field: &str, value: &str) -> Result<Vec<T>, StorageError>;
    async fn create(&self, entity: T) -> Result<T, StorageError>;
    async fn update(&self, entity: T) -> Result<T, StorageError>;
    async fn delete(&self, id: i64) -> Result<(), StorageError>;
}

/// Verify a plaintext password against a stored bcrypt-class hash (spec §4.7,
/// out-of-scope collaborator, specified here only as the narrow interface).
pub fn verify_password(plaintext: &str, hash: &str) -> bool {
    bcrypt::verify(plaintext, hash).unwrap_or(false)
}

/// Hash a plaintext password for storage at sign-up.
pub fn hash_password(plaintext: &str) -> Result<String, StorageError> {
    bcrypt::hash(plaintext, bcrypt::DEFAULT_COST).map_err(|e| StorageError::Io(e.to_string()))
}
