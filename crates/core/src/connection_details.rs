//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: murmur — a peer-to-peer terminal chat system.
//

//! ConnectionDetails store and key-encrypting key (spec §4.5).
//!
//! Session keys are never persisted in the clear: every `upsert` wraps both
//! keys under the installation KEK before handing them to the repository,
//! and every `get` unwraps them back into an in-memory-only plaintext
//! struct.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use rand::RngCore;
use tokio::time::{sleep, Duration};

use crate::entities::{ConnectionDetails, Repository};
use crate::error::StorageError;
use crate::secure::{SessionKey, KEY_LEN, NONCE_LEN};

const MAX_RETRIES: u32 = 5;
const RETRY_BACKOFF_MS: u64 = 70;

/// The single installation-wide key used only to wrap session keys at rest
/// (spec §4.5, GLOSSARY). Sourced from an OS keyring/env secret in
/// production; a fixed constant is acceptable for test fixtures.
pub struct Kek(Aes256Gcm);

impl Kek {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&bytes)))
    }

    /// Wrap a plaintext session key as `base64(nonce || ciphertext || tag)`.
    fn wrap(&self, plaintext: &[u8; KEY_LEN]) -> String {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        // AES-256-GCM with a fresh random key and nonce cannot fail to seal.
        let ciphertext = self.0.encrypt(nonce, plaintext.as_slice()).expect("KEK seal");
        let mut wrapped = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        wrapped.extend_from_slice(&nonce_bytes);
        wrapped.extend_from_slice(&ciphertext);
        STANDARD.encode(wrapped)
    }

    fn unwrap(&self, wrapped: &str) -> Result<SessionKey, StorageError> {
        let bytes = STANDARD
            .decode(wrapped)
            .map_err(|e| StorageError::Io(format!("invalid wrapped key encoding: {e}")))?;
        if bytes.len() < NONCE_LEN {
            return Err(StorageError::Io("wrapped key shorter than nonce".into()));
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .0
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| StorageError::Io("KEK unwrap failed".into()))?;
        let key: [u8; KEY_LEN] = plaintext
            .try_into()
            .map_err(|_| StorageError::Io("unwrapped key has wrong length".into()))?;
        Ok(SessionKey::from_bytes(key))
    }
}

/// The in-memory, plaintext-key form of a `ConnectionDetails` row, returned
/// only from `get` and never persisted as such.
pub struct UnwrappedConnectionDetails {
    pub encryption_key: SessionKey,
    pub decryption_key: SessionKey,
}

/// Persists and retrieves per-peer key material at rest, wrapped under the
/// KEK (spec §4.5).
pub struct ConnectionDetailsStore<R> {
    repo: R,
    kek: Kek,
}

impl<R> ConnectionDetailsStore<R>
where
    R: Repository<ConnectionDetails>,
{
    pub fn new(repo: R, kek: Kek) -> Self {
        Self { repo, kek }
    }

    async fn find_row(
        &self,
        host_uid: &str,
        client_uid: &str,
    ) -> Result<Option<ConnectionDetails>, StorageError> {
        let rows = self.repo.get_all_by("host_unique_id", host_uid).await?;
        Ok(rows.into_iter().find(|r| r.client_unique_id == client_uid))
    }

    pub async fn get(
        &self,
        host_uid: &str,
        client_uid: &str,
    ) -> Result<Option<UnwrappedConnectionDetails>, StorageError> {
        let Some(row) = self.find_row(host_uid, client_uid).await? else {
            return Ok(None);
        };
        Ok(Some(UnwrappedConnectionDetails {
            encryption_key: self.kek.unwrap(&row.encryption_key)?,
            decryption_key: self.kek.unwrap(&row.decryption_key)?,
        }))
    }

    pub async fn upsert(
        &self,
        host_uid: &str,
        client_uid: &str,
        encryption_key: &SessionKey,
        decryption_key: &SessionKey,
    ) -> Result<(), StorageError> {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let existing = self.find_row(host_uid, client_uid).await?;
            let row = ConnectionDetails {
                id: existing.as_ref().map(|r| r.id).unwrap_or_default(),
                host_unique_id: host_uid.to_string(),
                client_unique_id: client_uid.to_string(),
                encryption_key: self.kek.wrap(encryption_key.as_bytes()),
                decryption_key: self.kek.wrap(decryption_key.as_bytes()),
                key_derivation_salt: STANDARD.encode(salt),
                created_at: existing
                    .as_ref()
                    .map(|r| r.created_at)
                    .unwrap_or_else(Utc::now),
            };

            let result = if let Some(existing) = existing {
                self.repo.update(ConnectionDetails { id: existing.id, ..row }).await
            } else {
                self.repo.create(row).await
            };

            match result {
                Ok(_) => return Ok(()),
                Err(StorageError::Busy) if attempt < MAX_RETRIES => {
                    sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn delete(&self, host_uid: &str, client_uid: &str) -> Result<(), StorageError> {
        match self.find_row(host_uid, client_uid).await? {
            Some(row) => self.repo.delete(row.id).await,
            None => Ok(()), // idempotent
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryConnectionDetailsRepository;

    fn kek() -> Kek {
        Kek::from_bytes([7u8; KEY_LEN])
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips_plaintext_keys() {
        let store = ConnectionDetailsStore::new(InMemoryConnectionDetailsRepository::new(), kek());
        let out = SessionKey::generate();
        let inn = SessionKey::generate();

        store.upsert("u-A", "u-B", &out, &inn).await.unwrap();
        let got = store.get("u-A", "u-B").await.unwrap().unwrap();

        assert_eq!(got.encryption_key.as_bytes(), out.as_bytes());
        assert_eq!(got.decryption_key.as_bytes(), inn.as_bytes());
    }

    #[tokio::test]
    async fn get_on_absent_pair_returns_none() {
        let store = ConnectionDetailsStore::new(InMemoryConnectionDetailsRepository::new(), kek());
        assert!(store.get("u-A", "u-B").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = ConnectionDetailsStore::new(InMemoryConnectionDetailsRepository::new(), kek());
        store.delete("u-A", "u-B").await.unwrap();
        store.delete("u-A", "u-B").await.unwrap();
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row_on_rekey() {
        let store = ConnectionDetailsStore::new(InMemoryConnectionDetailsRepository::new(), kek());
        let out1 = SessionKey::generate();
        let inn1 = SessionKey::generate();
        store.upsert("u-A", "u-B", &out1, &inn1).await.unwrap();

        let out2 = SessionKey::generate();
        let inn2 = SessionKey::generate();
        store.upsert("u-A", "u-B", &out2, &inn2).await.unwrap();

        let got = store.get("u-A", "u-B").await.unwrap().unwrap();
        assert_eq!(got.encryption_key.as_bytes(), out2.as_bytes());
    }
}
