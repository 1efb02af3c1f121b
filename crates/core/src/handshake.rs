//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: murmur — a peer-to-peer terminal chat system.
//

//! Handshake state machine (spec §4.2): identity exchange, trust-state
//! negotiation, key exchange on first contact, upgrade to a secure
//! connection, and challenge/echo proof of key agreement.

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection_details::ConnectionDetailsStore;
use crate::entities::{ConnectionDetails, Repository};
use crate::error::ChatError;
use crate::message::Message;
use crate::secure::{SecureConn, SessionKey, KEY_LEN};
use crate::wire::{FramedConn, MessageConn};

const KNOWN: &str = "KNOWN";
const UNKNOWN: &str = "UNKNOWN";

/// The outcome of a successful handshake: a ready-to-use secure connection
/// plus the peer's claimed (and now trusted-for-this-session) unique id.
pub struct HandshakeOutcome<S> {
    pub secure: SecureConn<S>,
    pub peer_unique_id: String,
}

/// Run the handshake as the side that dialed the connection.
pub async fn run_initiator<S, R>(
    conn: FramedConn<S>,
    self_unique_id: &str,
    self_name: &str,
    store: &ConnectionDetailsStore<R>,
) -> Result<HandshakeOutcome<S>, ChatError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    R: Repository<ConnectionDetails>,
{
    let mut conn = conn;

    // Phase 1: identity exchange. Initiator writes first.
    conn.write(
        &Message::with_action("authenticate")
            .set("user", self_name)
            .set("userId", self_unique_id),
    )
    .await?;
    let reply = conn.read().await?;
    let peer_unique_id = validate_authenticate(&reply, self_unique_id)?;

    // Phase 2: trust-state negotiation. Initiator writes first, then reads.
    let self_known = store.get(self_unique_id, &peer_unique_id).await?.is_some();
    let self_state = if self_known { KNOWN } else { UNKNOWN };
    conn.write(&Message::with_action("connection_state").set("state", self_state))
        .await?;
    let reply = conn.read().await?;
    let peer_state = require_header(&reply, "connection_state", "state")?;

    if self_state == UNKNOWN && peer_state != UNKNOWN {
        return Err(ChatError::Protocol(
            "asymmetric trust: acceptor claims knowledge the initiator cannot corroborate".into(),
        ));
    }
    let effective_unknown = self_state == UNKNOWN || peer_state == UNKNOWN;

    // Phase 3: key exchange, only on first contact. Initiator writes first, then reads.
    let (outbound, inbound) = if effective_unknown {
        let outbound = SessionKey::generate();
        conn.write(
            &Message::with_action("exchange_keys").set("passphrase", encode_key(&outbound)),
        )
        .await?;
        let reply = conn.read().await?;
        let inbound = parse_passphrase(&reply)?;
        store
            .upsert(self_unique_id, &peer_unique_id, &outbound, &inbound)
            .await?;
        (outbound, inbound)
    } else {
        let known = store
            .get(self_unique_id, &peer_unique_id)
            .await?
            .ok_or_else(|| ChatError::Protocol("declared KNOWN but no stored keys".into()))?;
        (known.encryption_key, known.decryption_key)
    };

    // Phase 4: upgrade.
    let mut secure = SecureConn::new(conn, &outbound, &inbound);

    // Phase 5: challenge/echo, over the secure connection. Initiator sends first.
    let phrase = generate_challenge_phrase();
    secure
        .write(&Message::with_action("send_phrase").set("phrase", phrase.clone()))
        .await?;
    let reply = match secure.read().await {
        Ok(reply) => reply,
        Err(e) => {
            store.delete(self_unique_id, &peer_unique_id).await?;
            return Err(ChatError::Wire(e));
        }
    };
    let echoed = require_header(&reply, "echo_phrase", "phrase")?;
    if echoed != phrase {
        store.delete(self_unique_id, &peer_unique_id).await?;
        return Err(ChatError::Protocol("challenge phrase mismatch".into()));
    }

    Ok(HandshakeOutcome { secure, peer_unique_id })
}

/// Run the handshake as the side the listener produced.
pub async fn run_acceptor<S, R>(
    conn: FramedConn<S>,
    self_unique_id: &str,
    self_name: &str,
    store: &ConnectionDetailsStore<R>,
) -> Result<HandshakeOutcome<S>, ChatError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    R: Repository<ConnectionDetails>,
{
    let mut conn = conn;

    // Phase 1: identity exchange. Acceptor reads first, then writes.
    let msg = conn.read().await?;
    let peer_unique_id = validate_authenticate(&msg, self_unique_id)?;
    conn.write(
        &Message::with_action("authenticate")
            .set("user", self_name)
            .set("userId", self_unique_id),
    )
    .await?;

    // Phase 2: trust-state negotiation. Acceptor reads the initiator's
    // declaration first, then computes and sends its own.
    let msg = conn.read().await?;
    let peer_state = require_header(&msg, "connection_state", "state")?;
    let self_known = store.get(self_unique_id, &peer_unique_id).await?.is_some();
    let self_state = if peer_state == UNKNOWN || !self_known {
        UNKNOWN
    } else {
        KNOWN
    };
    conn.write(&Message::with_action("connection_state").set("state", self_state))
        .await?;
    let effective_unknown = self_state == UNKNOWN || peer_state == UNKNOWN;

    // Phase 3: key exchange. Acceptor reads first, then writes.
    let (outbound, inbound) = if effective_unknown {
        let msg = conn.read().await?;
        let inbound = parse_passphrase(&msg)?;
        let outbound = SessionKey::generate();
        conn.write(
            &Message::with_action("exchange_keys").set("passphrase", encode_key(&outbound)),
        )
        .await?;
        store
            .upsert(self_unique_id, &peer_unique_id, &outbound, &inbound)
            .await?;
        (outbound, inbound)
    } else {
        let known = store
            .get(self_unique_id, &peer_unique_id)
            .await?
            .ok_or_else(|| ChatError::Protocol("declared KNOWN but no stored keys".into()))?;
        (known.encryption_key, known.decryption_key)
    };

    // Phase 4: upgrade.
    let mut secure = SecureConn::new(conn, &outbound, &inbound);

    // Phase 5: challenge/echo. Acceptor reads the phrase first, then echoes it.
    let msg = match secure.read().await {
        Ok(msg) => msg,
        Err(e) => {
            store.delete(self_unique_id, &peer_unique_id).await?;
            return Err(ChatError::Wire(e));
        }
    };
    let phrase = require_header(&msg, "send_phrase", "phrase")?;
    secure
        .write(&Message::with_action("echo_phrase").set("phrase", phrase))
        .await?;

    Ok(HandshakeOutcome { secure, peer_unique_id })
}

fn validate_authenticate(msg: &Message, self_unique_id: &str) -> Result<String, ChatError> {
    if msg.action() != Some("authenticate") {
        return Err(ChatError::Protocol("expected action \"authenticate\"".into()));
    }
    let peer_id = msg
        .header("userId")
        .ok_or_else(|| ChatError::Protocol("missing userId".into()))?;
    if peer_id == self_unique_id {
        return Err(ChatError::Protocol(
            "peer impersonation: userId equals self unique_id".into(),
        ));
    }
    Ok(peer_id.to_string())
}

fn require_header(msg: &Message, expected_action: &str, key: &str) -> Result<String, ChatError> {
    if msg.action() != Some(expected_action) {
        return Err(ChatError::Protocol(format!(
            "expected action \"{expected_action}\", got {:?}",
            msg.action()
        )));
    }
    msg.header(key)
        .map(str::to_string)
        .ok_or_else(|| ChatError::Protocol(format!("missing header \"{key}\"")))
}

fn encode_key(key: &SessionKey) -> String {
    STANDARD.encode(key.as_bytes())
}

fn parse_passphrase(msg: &Message) -> Result<SessionKey, ChatError> {
    let b64 = require_header(msg, "exchange_keys", "passphrase")?;
    let bytes = STANDARD
        .decode(b64)
        .map_err(|e| ChatError::Protocol(format!("invalid passphrase encoding: {e}")))?;
    let key: [u8; KEY_LEN] = bytes
        .try_into()
        .map_err(|_| ChatError::Protocol("passphrase decodes to the wrong key length".into()))?;
    Ok(SessionKey::from_bytes(key))
}

/// A 19-character challenge phrase, four random 4-digit groups separated by
/// hyphens (spec §4.2). Uses the thread's CSPRNG, not a weak PRNG (spec §9
/// Open Question 3).
fn generate_challenge_phrase() -> String {
    let mut rng = rand::thread_rng();
    (0..4)
        .map(|_| format!("{:04}", rng.gen_range(0..10_000)))
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_details::Kek;
    use crate::store::InMemoryConnectionDetailsRepository;
    use crate::wire::DEFAULT_MAX_FRAME_LEN;
    use tokio::io::duplex;

    fn fresh_store() -> ConnectionDetailsStore<InMemoryConnectionDetailsRepository> {
        ConnectionDetailsStore::new(InMemoryConnectionDetailsRepository::new(), Kek::from_bytes([9u8; KEY_LEN]))
    }

    fn pipe() -> (FramedConn<tokio::io::DuplexStream>, FramedConn<tokio::io::DuplexStream>) {
        let (a, b) = duplex(8192);
        (
            FramedConn::new(a, DEFAULT_MAX_FRAME_LEN),
            FramedConn::new(b, DEFAULT_MAX_FRAME_LEN),
        )
    }

    #[tokio::test]
    async fn first_contact_handshake_reaches_established_and_agrees_on_identity() {
        let (ca, cb) = pipe();
        let store_a = fresh_store();
        let store_b = fresh_store();

        let (a, b) = tokio::join!(
            run_initiator(ca, "u-A", "Alice", &store_a),
            run_acceptor(cb, "u-B", "Bob", &store_b),
        );
        let a = a.unwrap();
        let b = b.unwrap();

        assert_eq!(a.peer_unique_id, "u-B");
        assert_eq!(b.peer_unique_id, "u-A");

        assert!(store_a.get("u-A", "u-B").await.unwrap().is_some());
        assert!(store_b.get("u-B", "u-A").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn repeat_contact_skips_key_exchange_and_leaves_stores_unchanged() {
        let store_a = fresh_store();
        let store_b = fresh_store();

        let (ca, cb) = pipe();
        let (a1, b1) = tokio::join!(
            run_initiator(ca, "u-A", "Alice", &store_a),
            run_acceptor(cb, "u-B", "Bob", &store_b),
        );
        a1.unwrap();
        b1.unwrap();

        let before_a = store_a.get("u-A", "u-B").await.unwrap().unwrap();

        let (ca, cb) = pipe();
        let (a2, b2) = tokio::join!(
            run_initiator(ca, "u-A", "Alice", &store_a),
            run_acceptor(cb, "u-B", "Bob", &store_b),
        );
        let a2 = a2.unwrap();
        b2.unwrap();
        assert_eq!(a2.peer_unique_id, "u-B");

        let after_a = store_a.get("u-A", "u-B").await.unwrap().unwrap();
        assert_eq!(before_a.encryption_key.as_bytes(), after_a.encryption_key.as_bytes());
    }

    #[tokio::test]
    async fn lost_trust_on_one_side_aborts_the_initiator() {
        let store_a = fresh_store();
        let store_b = fresh_store();

        let (ca, cb) = pipe();
        let (a1, b1) = tokio::join!(
            run_initiator(ca, "u-A", "Alice", &store_a),
            run_acceptor(cb, "u-B", "Bob", &store_b),
        );
        a1.unwrap();
        b1.unwrap();

        store_a.delete("u-A", "u-B").await.unwrap();

        let (ca, cb) = pipe();
        let (a2, b2) = tokio::join!(
            run_initiator(ca, "u-A", "Alice", &store_a),
            run_acceptor(cb, "u-B", "Bob", &store_b),
        );
        assert!(a2.is_err());
        // The acceptor's read of the never-sent next message surfaces as a
        // closed/protocol error once the initiator aborts and drops the pipe.
        let _ = b2;

        assert!(store_a.get("u-A", "u-B").await.unwrap().is_none());
        assert!(store_b.get("u-B", "u-A").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn impersonation_is_rejected_before_trust_negotiation() {
        let store_a = fresh_store();
        let (ca, mut cb) = pipe();
        let store_a_task = store_a;

        let initiator = tokio::spawn(async move {
            run_initiator(ca, "u-A", "Alice", &store_a_task).await
        });

        // Malicious acceptor claims the initiator's own unique_id.
        let msg = cb.read().await.unwrap();
        assert_eq!(msg.action(), Some("authenticate"));
        cb.write(&Message::with_action("authenticate").set("user", "Mallory").set("userId", "u-A"))
            .await
            .unwrap();

        let result = initiator.await.unwrap();
        assert!(matches!(result, Err(ChatError::Protocol(_))));
    }

    #[test]
    fn challenge_phrase_matches_grouped_digit_format() {
        let phrase = generate_challenge_phrase();
        let groups: Vec<&str> = phrase.split('-').collect();
        assert_eq!(groups.len(), 4);
        for g in groups {
            assert_eq!(g.len(), 4);
            assert!(g.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
