//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: murmur — a peer-to-peer terminal chat system.
//

//! Fan-out publish/subscribe event bus with bounded, lossy-on-backpressure
//! per-subscriber queues (spec §4.6).

use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::events::Event;

/// Default per-subscriber queue capacity (spec §3 "EventListener queue").
pub const DEFAULT_QUEUE_SIZE: usize = 100;

struct Subscriber {
    id: Uuid,
    tx: mpsc::Sender<Event>,
}

/// A subscription handle returned by [`EventBus::register`].
pub struct Listener {
    id: Uuid,
    rx: mpsc::Receiver<Event>,
    bus: Arc<EventBusInner>,
}

/// Error returned by [`Listener::next`] when its cancellation token fires
/// before another event arrives.
#[derive(Debug)]
pub struct Cancelled;

impl Listener {
    /// Await either the next event or cancellation.
    pub async fn next(&mut self, cancellation: &CancellationToken) -> Result<Event, Cancelled> {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(Cancelled),
            event = self.rx.recv() => event.ok_or(Cancelled),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let bus = self.bus.clone();
        let id = self.id;
        tokio::spawn(async move {
            bus.subscribers.write().await.retain(|s| s.id != id);
        });
    }
}

struct EventBusInner {
    subscribers: RwLock<Vec<Subscriber>>,
}

/// Fan-out event bus: every subscriber gets its own bounded queue; a full
/// queue causes that subscriber (and only that subscriber) to silently drop
/// the event (spec §4.6, §8 "Event-bus fan-out").
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                subscribers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a new subscriber with the default queue capacity. The
    /// subscriber is automatically removed once `cancellation` fires.
    pub async fn register(&self, cancellation: CancellationToken) -> Listener {
        self.register_with_capacity(cancellation, DEFAULT_QUEUE_SIZE).await
    }

    pub async fn register_with_capacity(
        &self,
        cancellation: CancellationToken,
        capacity: usize,
    ) -> Listener {
        let (tx, rx) = mpsc::channel(capacity);
        let id = Uuid::new_v4();
        self.inner.subscribers.write().await.push(Subscriber { id, tx });

        let inner = self.inner.clone();
        tokio::spawn(async move {
            cancellation.cancelled().await;
            inner.subscribers.write().await.retain(|s| s.id != id);
        });

        Listener {
            id,
            rx,
            bus: self.inner.clone(),
        }
    }

    /// Emit an event to every current subscriber in registration order.
    /// Events observed by a given subscriber preserve emission order; no
    /// cross-subscriber ordering is guaranteed. Non-blocking: a full
    /// subscriber queue drops the event for that subscriber only.
    pub async fn emit(&self, event: Event) {
        let subscribers = self.inner.subscribers.read().await;
        for sub in subscribers.iter() {
            let _ = sub.tx.try_send(event.clone());
        }
    }
}
