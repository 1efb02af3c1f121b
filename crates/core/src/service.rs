//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: murmur — a peer-to-peer terminal chat system.
//
// service.rs - the service/command contract and container the application
// main loop drives (spec §4.6, §9).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ChatError;
use crate::events::Event;

/// A unit of work produced by [`Service::map_event_to_commands`]. Commands
/// carry whatever state they need to act (typically a cheap handle clone of
/// the service that produced them) so `map_event_to_commands` stays pure:
/// it returns data, it never reaches for the event bus itself.
#[async_trait]
pub trait Command: Send {
    async fn execute(self: Box<Self>) -> Result<Vec<Event>, ChatError>;
}

/// A long-running collaborator registered with the [`ServiceContainer`].
#[async_trait]
pub trait Service: Send + Sync {
    /// One-time startup. Errors here abort the whole container's startup.
    async fn init(&self) -> Result<(), ChatError> {
        Ok(())
    }

    /// Run until `cancellation` fires. Spawned and awaited by `run_all`.
    async fn run(&self, cancellation: CancellationToken) -> Result<(), ChatError> {
        Ok(())
    }

    /// Translate one event into zero or more commands. MUST be pure: no
    /// awaiting, no side effects, no direct event-bus access.
    fn map_event_to_commands(&self, event: &Event) -> Vec<Box<dyn Command>>;

    /// One-time teardown, called exactly once during shutdown.
    async fn close(&self) -> Result<(), ChatError> {
        Ok(())
    }
}

/// Holds the fixed set of services the application wires up at startup and
/// drives their shared lifecycle (spec §4.6).
pub struct ServiceContainer {
    services: Vec<Arc<dyn Service>>,
}

impl ServiceContainer {
    pub fn new(services: Vec<Arc<dyn Service>>) -> Self {
        Self { services }
    }

    /// Run every service's `init` in order, stopping at the first error.
    pub async fn init_all(&self) -> Result<(), ChatError> {
        for service in &self.services {
            service.init().await?;
        }
        Ok(())
    }

    /// Spawn every service's `run` concurrently; returns their join handles
    /// so the caller can await the whole group (the `join_group` of spec §9).
    pub fn run_all(&self, cancellation: CancellationToken) -> Vec<JoinHandle<Result<(), ChatError>>> {
        self.services
            .iter()
            .map(|service| {
                let service = service.clone();
                let cancellation = cancellation.clone();
                tokio::spawn(async move { service.run(cancellation).await })
            })
            .collect()
    }

    /// Close every service, collecting (rather than short-circuiting on)
    /// errors, since shutdown must attempt to release every resource.
    pub async fn close_all(&self) -> Result<(), ChatError> {
        let mut errors = Vec::new();
        for service in &self.services {
            if let Err(e) = service.close().await {
                errors.push(e.to_string());
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ChatError::Protocol(errors.join("; ")))
        }
    }

    /// Collect commands from every registered service for one event.
    pub fn map_event_to_commands(&self, event: &Event) -> Vec<Box<dyn Command>> {
        self.services.iter().flat_map(|service| service.map_event_to_commands(event)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingService {
        init_calls: AtomicUsize,
        close_calls: AtomicUsize,
        fail_init: bool,
    }

    struct NoopCommand;
    #[async_trait]
    impl Command for NoopCommand {
        async fn execute(self: Box<Self>) -> Result<Vec<Event>, ChatError> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl Service for CountingService {
        async fn init(&self) -> Result<(), ChatError> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_init {
                return Err(ChatError::Config("boom".into()));
            }
            Ok(())
        }

        async fn run(&self, cancellation: CancellationToken) -> Result<(), ChatError> {
            cancellation.cancelled().await;
            Ok(())
        }

        fn map_event_to_commands(&self, _event: &Event) -> Vec<Box<dyn Command>> {
            vec![Box::new(NoopCommand)]
        }

        async fn close(&self) -> Result<(), ChatError> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn service(fail_init: bool) -> Arc<CountingService> {
        Arc::new(CountingService {
            init_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            fail_init,
        })
    }

    #[tokio::test]
    async fn init_all_short_circuits_on_first_error() {
        let a = service(false);
        let b = service(true);
        let c = service(false);
        let container = ServiceContainer::new(vec![a.clone(), b.clone(), c.clone()]);

        assert!(container.init_all().await.is_err());
        assert_eq!(a.init_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.init_calls.load(Ordering::SeqCst), 1);
        assert_eq!(c.init_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn run_all_completes_once_cancelled() {
        let a = service(false);
        let b = service(false);
        let container = ServiceContainer::new(vec![a, b]);
        let cancellation = CancellationToken::new();

        let handles = container.run_all(cancellation.clone());
        cancellation.cancel();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn close_all_invokes_every_service_even_after_an_error() {
        struct FailingClose(AtomicUsize);
        #[async_trait]
        impl Service for FailingClose {
            fn map_event_to_commands(&self, _event: &Event) -> Vec<Box<dyn Command>> {
                Vec::new()
            }
            async fn close(&self) -> Result<(), ChatError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(ChatError::Config("close failed".into()))
            }
        }

        let failing = Arc::new(FailingClose(AtomicUsize::new(0)));
        let ok = service(false);
        let container = ServiceContainer::new(vec![failing.clone(), ok.clone()]);

        assert!(container.close_all().await.is_err());
        assert_eq!(failing.0.load(Ordering::SeqCst), 1);
        assert_eq!(ok.close_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn map_event_to_commands_collects_across_all_services() {
        let a = service(false);
        let b = service(false);
        let container = ServiceContainer::new(vec![a, b]);
        let commands = container.map_event_to_commands(&Event::Quit);
        assert_eq!(commands.len(), 2);
    }
}
