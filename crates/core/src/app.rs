//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: murmur — a peer-to-peer terminal chat system.
//
// app.rs - the application main loop: subscribe, collect commands from
// every service for each event, execute them, republish follow-up events,
// until QuitEvent (spec §4.6, §5, §9).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::ChatError;
use crate::event_bus::EventBus;
use crate::events::Event;
use crate::service::{Service, ServiceContainer};

/// Builds an [`App`] from an event bus and a set of services, the way the
/// original `app.Builder` assembles its collaborators before `Run`.
pub struct AppBuilder {
    events: EventBus,
    services: Vec<Arc<dyn Service>>,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            events: EventBus::new(),
            services: Vec::new(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_service(mut self, service: Arc<dyn Service>) -> Self {
        self.services.push(service);
        self
    }

    pub fn build(self) -> App {
        App::new(self.events, ServiceContainer::new(self.services))
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the single process-wide cancellation token and drives the main
/// event/command loop until a `Quit` event is observed (spec §5, §9).
pub struct App {
    events: EventBus,
    container: ServiceContainer,
    root_cancel: CancellationToken,
}

impl App {
    pub fn new(events: EventBus, container: ServiceContainer) -> Self {
        Self {
            events,
            container,
            root_cancel: CancellationToken::new(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The root cancellation token, cancelled once on `Quit` and handed to
    /// every long-running collaborator the caller spawns alongside the app.
    pub fn cancellation(&self) -> CancellationToken {
        self.root_cancel.clone()
    }

    /// Run every service's `init`, spawn `run` for each, then loop: take the
    /// next event, collect commands from every service, execute them, and
    /// republish whatever events they produce, until `Quit` or the root
    /// token is otherwise cancelled.
    pub async fn run(&self) -> Result<(), ChatError> {
        self.container.init_all().await?;

        let mut listener = self.events.register(self.root_cancel.clone()).await;
        let run_handles = self.container.run_all(self.root_cancel.clone());

        loop {
            let event = match listener.next(&self.root_cancel).await {
                Ok(event) => event,
                Err(_cancelled) => break,
            };

            let is_quit = matches!(event, Event::Quit);
            for command in self.container.map_event_to_commands(&event) {
                match command.execute().await {
                    Ok(followups) => {
                        for followup in followups {
                            self.events.emit(followup).await;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "command execution failed");
                    }
                }
            }

            if is_quit {
                break;
            }
        }

        self.root_cancel.cancel();
        for handle in run_handles {
            let _ = handle.await;
        }
        self.container.close_all().await
    }
}
