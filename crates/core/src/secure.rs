//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: murmur — a peer-to-peer terminal chat system.
//
// secure.rs - authenticated-encryption upgrade for a FramedConn (spec §4.1).

use crate::error::WireError;
use crate::message::Message;
use crate::wire::{FramedConn, MessageConn};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use async_trait::async_trait;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncWrite};
use zeroize::Zeroize;

/// Byte length of an AES-256-GCM key.
pub const KEY_LEN: usize = 32;
/// Byte length of the random nonce prefixed to every secure frame.
pub const NONCE_LEN: usize = 12;

/// A 32-byte AES-256-GCM session key that is zeroized on drop.
#[derive(Clone)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Wraps a [`FramedConn`] and a pair of AEAD contexts. The connection
/// encrypts with `outbound` and decrypts with `inbound`; these are distinct
/// keys, one generated by each side during the handshake (spec §3, §4.1).
pub struct SecureConn<S> {
    inner: FramedConn<S>,
    outbound: Aes256Gcm,
    inbound: Aes256Gcm,
}

impl<S> SecureConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(inner: FramedConn<S>, outbound: &SessionKey, inbound: &SessionKey) -> Self {
        Self {
            inner,
            outbound: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(outbound.as_bytes())),
            inbound: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(inbound.as_bytes())),
        }
    }
}

#[async_trait]
impl<S> MessageConn for SecureConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self) -> Result<Message, WireError> {
        let frame = self.inner.read_frame().await?;
        if frame.len() < NONCE_LEN {
            return Err(WireError::Crypto("secure frame shorter than nonce".into()));
        }
        let (nonce_bytes, ciphertext) = frame.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .inbound
            .decrypt(nonce, ciphertext)
            .map_err(|_| WireError::Crypto("AEAD authentication failed".into()))?;
        Message::decode(&plaintext)
    }

    async fn write(&mut self, msg: &Message) -> Result<(), WireError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .outbound
            .encrypt(nonce, msg.encode().as_slice())
            .map_err(|_| WireError::Crypto("AEAD seal failed".into()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);
        self.inner.write_frame(&payload).await
    }

    async fn close(&mut self) -> Result<(), WireError> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::DEFAULT_MAX_FRAME_LEN;
    use tokio::io::duplex;

    fn conns() -> (FramedConn<tokio::io::DuplexStream>, FramedConn<tokio::io::DuplexStream>) {
        let (a, b) = duplex(4096);
        (
            FramedConn::new(a, DEFAULT_MAX_FRAME_LEN),
            FramedConn::new(b, DEFAULT_MAX_FRAME_LEN),
        )
    }

    #[tokio::test]
    async fn round_trips_when_keys_are_crossed_correctly() {
        let (ca, cb) = conns();
        let k1 = SessionKey::generate();
        let k2 = SessionKey::generate();

        let mut a = SecureConn::new(ca, &k1, &k2);
        let mut b = SecureConn::new(cb, &k2, &k1);

        let msg = Message::with_action("send_phrase").set("phrase", "0001-0002-0003-0004");
        a.write(&msg).await.unwrap();
        let got = b.read().await.unwrap();
        assert_eq!(got.header("phrase"), Some("0001-0002-0003-0004"));
    }

    #[tokio::test]
    async fn empty_body_round_trips() {
        let (ca, cb) = conns();
        let k1 = SessionKey::generate();
        let k2 = SessionKey::generate();
        let mut a = SecureConn::new(ca, &k1, &k2);
        let mut b = SecureConn::new(cb, &k2, &k1);

        a.write(&Message::with_action("echo_phrase")).await.unwrap();
        let got = b.read().await.unwrap();
        assert_eq!(got.body(), b"");
    }

    #[tokio::test]
    async fn mismatched_keys_fail_closed() {
        let (ca, cb) = conns();
        let k1 = SessionKey::generate();
        let k2 = SessionKey::generate();
        let wrong = SessionKey::generate();

        let mut a = SecureConn::new(ca, &k1, &k2);
        let mut b = SecureConn::new(cb, &wrong, &k1);

        a.write(&Message::with_action("authenticate")).await.unwrap();
        let err = b.read().await.unwrap_err();
        assert!(matches!(err, WireError::Crypto(_)));
    }

    #[tokio::test]
    async fn bit_flipped_ciphertext_fails_decryption() {
        let k_out = SessionKey::generate();
        let k_in = SessionKey::generate();

        // Seal a frame exactly as `SecureConn::write` would, then flip one
        // ciphertext byte before it's ever read back.
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(k_out.as_bytes()));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let mut ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Message::with_action("authenticate").encode().as_slice(),
            )
            .unwrap();
        *ciphertext.last_mut().unwrap() ^= 0xFF;
        let mut frame = nonce_bytes.to_vec();
        frame.extend_from_slice(&ciphertext);

        let (x, y) = duplex(4096);
        let mut writer = FramedConn::new(x, DEFAULT_MAX_FRAME_LEN);
        writer.write_frame(&frame).await.unwrap();

        let mut reader = SecureConn::new(FramedConn::new(y, DEFAULT_MAX_FRAME_LEN), &k_in, &k_out);
        let err = reader.read().await.unwrap_err();
        assert!(matches!(err, WireError::Crypto(_)));
    }

    #[tokio::test]
    async fn same_plaintext_encrypts_differently_each_time() {
        let key = SessionKey::generate();
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        let plaintext = Message::with_action("ping").encode();

        let mut nonce1 = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce1);
        let mut nonce2 = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce2);

        let c1 = cipher
            .encrypt(Nonce::from_slice(&nonce1), plaintext.as_slice())
            .unwrap();
        let c2 = cipher
            .encrypt(Nonce::from_slice(&nonce2), plaintext.as_slice())
            .unwrap();
        assert_ne!(c1, c2);
    }
}
