//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: murmur — a peer-to-peer terminal chat system.
//
// user_controller.rs - per-logged-in-user supervisor of live connections (spec §4.3).

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::connection_details::ConnectionDetailsStore;
use crate::entities::{ConnectionDetails, Repository};
use crate::event_bus::EventBus;
use crate::events::Event;
use crate::handshake::{run_acceptor, run_initiator};
use crate::wire::{FramedConn, MessageConn};

struct ConnectionRecord {
    authenticated: bool,
    peer_unique_id: Option<String>,
    cancel: CancellationToken,
}

struct Inner<R> {
    self_unique_id: String,
    self_name: String,
    store: Arc<ConnectionDetailsStore<R>>,
    events: EventBus,
    running: AtomicBool,
    root_cancel: CancellationToken,
    connections: RwLock<HashMap<Uuid, ConnectionRecord>>,
}

/// Owns every live connection belonging to one logged-in local user and
/// drives each through its handshake and read loop (spec §4.3).
///
/// Generic over the raw byte stream `S` a freshly accepted/dialed connection
/// arrives as (a `TcpStream` in production, an in-memory duplex half in
/// tests) and the `ConnectionDetails` repository `R` backing the handshake's
/// trust store.
pub struct UserController<S, R> {
    inner: Arc<Inner<R>>,
    _stream: PhantomData<fn(S)>,
}

impl<S, R> Clone for UserController<S, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _stream: PhantomData,
        }
    }
}

impl<S, R> UserController<S, R>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    R: Repository<ConnectionDetails> + Send + Sync + 'static,
{
    pub fn new(
        self_unique_id: impl Into<String>,
        self_name: impl Into<String>,
        store: Arc<ConnectionDetailsStore<R>>,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                self_unique_id: self_unique_id.into(),
                self_name: self_name.into(),
                store,
                events,
                running: AtomicBool::new(true),
                root_cancel: CancellationToken::new(),
                connections: RwLock::new(HashMap::new()),
            }),
            _stream: PhantomData,
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }

    /// Record a new connection, emit `NewUnauthenticatedConnection`, and
    /// spawn its driver task. Returns the assigned `conn_id` immediately;
    /// the record is inserted before the task is spawned, never after.
    pub async fn register(&self, raw_conn: FramedConn<S>, is_initiator: bool) -> Uuid {
        let conn_id = Uuid::new_v4();
        let cancel = self.inner.root_cancel.child_token();

        self.inner.connections.write().await.insert(
            conn_id,
            ConnectionRecord {
                authenticated: false,
                peer_unique_id: None,
                cancel: cancel.clone(),
            },
        );
        self.inner.events.emit(Event::NewUnauthenticatedConnection { conn_id }).await;

        let controller = self.clone();
        tokio::spawn(async move {
            controller.drive(conn_id, raw_conn, is_initiator, cancel).await;
        });

        conn_id
    }

    async fn drive(&self, conn_id: Uuid, raw_conn: FramedConn<S>, is_initiator: bool, cancel: CancellationToken) {
        let handshake = async {
            if is_initiator {
                run_initiator(raw_conn, &self.inner.self_unique_id, &self.inner.self_name, &self.inner.store).await
            } else {
                run_acceptor(raw_conn, &self.inner.self_unique_id, &self.inner.self_name, &self.inner.store).await
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.inner.connections.write().await.remove(&conn_id);
                return;
            }
            result = handshake => result,
        };

        let mut secure = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.inner.events.emit(Event::ConnectionFailed { message: e.to_string() }).await;
                self.inner.connections.write().await.remove(&conn_id);
                return;
            }
        };

        {
            let mut connections = self.inner.connections.write().await;
            match connections.get_mut(&conn_id) {
                Some(record) => {
                    record.authenticated = true;
                    record.peer_unique_id = Some(secure.peer_unique_id.clone());
                }
                None => {
                    // close() already evicted this record while the handshake
                    // was in flight; tear down and exit without publishing.
                    let _ = secure.secure.close().await;
                    return;
                }
            }
        }
        self.inner
            .events
            .emit(Event::ConnectionEstablished {
                conn_id,
                peer_unique_id: secure.peer_unique_id.clone(),
            })
            .await;

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = secure.secure.read() => result,
            };
            match read {
                Ok(message) => {
                    self.inner
                        .events
                        .emit(Event::NewMessage { conn_id, message: Arc::new(message) })
                        .await;
                }
                Err(e) if e.is_closed() => break,
                Err(e) => {
                    self.inner
                        .events
                        .emit(Event::MessageReadError { conn_id, message: e.to_string() })
                        .await;
                }
            }
        }

        let _ = secure.secure.close().await;
        self.inner.connections.write().await.remove(&conn_id);
        self.inner.events.emit(Event::ConnectionClosed { conn_id }).await;
    }

    /// Stop accepting new traffic and force every live connection closed.
    /// Idempotent; safe to call concurrently with in-flight `register`
    /// calls and driver tasks, which observe the cancellation on their next
    /// awaited operation and exit on their own.
    pub fn close(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.root_cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_details::Kek;
    use crate::secure::KEY_LEN;
    use crate::store::InMemoryConnectionDetailsRepository;
    use crate::wire::DEFAULT_MAX_FRAME_LEN;
    use std::time::Duration;
    use tokio::io::duplex;

    type TestController = UserController<tokio::io::DuplexStream, InMemoryConnectionDetailsRepository>;

    fn controller(self_unique_id: &str) -> TestController {
        let store = Arc::new(ConnectionDetailsStore::new(
            InMemoryConnectionDetailsRepository::new(),
            Kek::from_bytes([3u8; KEY_LEN]),
        ));
        UserController::new(self_unique_id, "name", store, EventBus::new())
    }

    fn pipe() -> (FramedConn<tokio::io::DuplexStream>, FramedConn<tokio::io::DuplexStream>) {
        let (a, b) = duplex(8192);
        (FramedConn::new(a, DEFAULT_MAX_FRAME_LEN), FramedConn::new(b, DEFAULT_MAX_FRAME_LEN))
    }

    async fn wait_until_empty(controller: &TestController) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while controller.connection_count().await != 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("connections did not drain in time");
    }

    #[tokio::test]
    async fn full_handshake_establishes_and_relays_messages() {
        let a = controller("u-A");
        let b = controller("u-B");
        let (ca, cb) = pipe();

        let token = CancellationToken::new();
        let mut listener_a = a.inner.events.register(token.clone()).await;
        let mut listener_b = b.inner.events.register(token.clone()).await;

        let id_a = a.register(ca, true).await;
        let id_b = b.register(cb, false).await;

        let established_a = loop {
            match listener_a.next(&token).await.unwrap() {
                Event::ConnectionEstablished { conn_id, peer_unique_id } if conn_id == id_a => break peer_unique_id,
                _ => continue,
            }
        };
        let established_b = loop {
            match listener_b.next(&token).await.unwrap() {
                Event::ConnectionEstablished { conn_id, peer_unique_id } if conn_id == id_b => break peer_unique_id,
                _ => continue,
            }
        };
        assert_eq!(established_a, "u-B");
        assert_eq!(established_b, "u-A");
        assert_eq!(a.connection_count().await, 1);
        assert_eq!(b.connection_count().await, 1);
    }

    #[tokio::test]
    async fn register_assigns_distinct_ids_for_concurrent_callers() {
        let ctl = controller("u-A");
        let mut ids = Vec::new();
        for _ in 0..5 {
            let (raw, _peer) = pipe();
            ids.push(ctl.register(raw, true).await);
        }
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 5);
        assert_eq!(ctl.connection_count().await, 5);
        ctl.close();
        wait_until_empty(&ctl).await;
    }

    #[tokio::test]
    async fn close_forces_a_stalled_handshake_to_exit_and_clears_the_map() {
        let ctl = controller("u-A");
        let (raw, _peer_never_drives) = pipe();
        ctl.register(raw, true).await;
        assert_eq!(ctl.connection_count().await, 1);

        ctl.close();
        wait_until_empty(&ctl).await;
        assert!(!ctl.is_running());
    }

    #[tokio::test]
    async fn lifecycle_events_arrive_unauthenticated_before_established() {
        let a = controller("u-A");
        let b = controller("u-B");
        let (ca, cb) = pipe();

        let token = CancellationToken::new();
        let mut listener_a = a.inner.events.register(token.clone()).await;

        let id_a = a.register(ca, true).await;
        b.register(cb, false).await;

        let mut saw_unauth = false;
        loop {
            match listener_a.next(&token).await.unwrap() {
                Event::NewUnauthenticatedConnection { conn_id } if conn_id == id_a => saw_unauth = true,
                Event::ConnectionEstablished { conn_id, .. } if conn_id == id_a => break,
                _ => {}
            }
        }
        assert!(saw_unauth);
    }
}
