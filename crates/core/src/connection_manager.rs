//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: murmur — a peer-to-peer terminal chat system.
//
// connection_manager.rs - listening socket owner and event-to-command
// translator for the process-wide current UserController (spec §4.4).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::connection_details::ConnectionDetailsStore;
use crate::entities::{ConnectionDetails, Repository, User};
use crate::error::ChatError;
use crate::event_bus::EventBus;
use crate::events::Event;
use crate::service::{Command, Service};
use crate::user_controller::UserController;
use crate::wire::{FramedConn, MessageConn, DEFAULT_MAX_FRAME_LEN};

struct Inner<R> {
    port: Option<u16>,
    store: Arc<ConnectionDetailsStore<R>>,
    events: EventBus,
    controller: RwLock<Option<UserController<TcpStream, R>>>,
}

/// Owns the listening socket (if any) and the single *current*
/// `UserController`, and translates domain events into commands (spec §4.4).
pub struct ConnectionManager<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for ConnectionManager<R> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<R> ConnectionManager<R>
where
    R: Repository<ConnectionDetails> + Send + Sync + 'static,
{
    pub fn new(port: Option<u16>, store: Arc<ConnectionDetailsStore<R>>, events: EventBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                port,
                store,
                events,
                controller: RwLock::new(None),
            }),
        }
    }

    /// Dial `host:port`, wrap the socket as a `FramedConn`, and hand it to
    /// the current controller as the initiator side. Fails if no controller
    /// is installed or if dialing fails.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), ChatError> {
        let maybe_ctl = { self.inner.controller.read().await.clone() };
        let ctl = maybe_ctl
            .ok_or_else(|| ChatError::Protocol("no UserController installed; cannot dial".into()))?;
        let stream = TcpStream::connect((host, port)).await?;
        let framed = FramedConn::new(stream, DEFAULT_MAX_FRAME_LEN);
        ctl.register(framed, true).await;
        Ok(())
    }

    /// Install a fresh `UserController` for the newly logged-in local user,
    /// closing and discarding whatever controller was previously current.
    pub async fn change_user_controller(&self, user: &User) {
        let fresh = UserController::new(
            user.unique_id.clone(),
            user.name.clone(),
            self.inner.store.clone(),
            self.inner.events.clone(),
        );
        let mut guard = self.inner.controller.write().await;
        if let Some(old) = guard.take() {
            old.close();
        }
        *guard = Some(fresh);
    }

    /// Tear down the current controller, leaving no controller installed.
    pub async fn remove_user_controller(&self) {
        let mut guard = self.inner.controller.write().await;
        if let Some(old) = guard.take() {
            old.close();
        }
    }

    /// Accept inbound sockets and route them to the installed controller.
    /// Does nothing (and returns immediately) if no server port is
    /// configured.
    pub async fn run_accept_loop(&self, cancellation: CancellationToken) -> Result<(), ChatError> {
        let Some(port) = self.inner.port else {
            return Ok(());
        };
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        self.accept_loop_over(listener, cancellation).await
    }

    async fn accept_loop_over(&self, listener: TcpListener, cancellation: CancellationToken) -> Result<(), ChatError> {
        loop {
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => return Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((socket, _addr)) => self.handle_accepted(socket).await,
                    Err(e) => {
                        self.inner.events.emit(Event::ConnectionAcceptError { message: e.to_string() }).await;
                    }
                },
            }
        }
    }

    async fn handle_accepted(&self, socket: TcpStream) {
        // Acquire the read lock only long enough to clone the controller
        // handle, then release it before registering. Holding it across
        // registration (or for the remainder of the loop) would starve
        // changeUserController/removeUserController's write lock for as
        // long as the accept loop runs (spec §9 Open Question 2).
        let maybe_ctl = { self.inner.controller.read().await.clone() };
        let framed = FramedConn::new(socket, DEFAULT_MAX_FRAME_LEN);
        match maybe_ctl {
            Some(ctl) => {
                ctl.register(framed, false).await;
            }
            None => {
                let mut framed = framed;
                let _ = framed.close().await;
            }
        }
    }
}

struct ConnectCommand<R> {
    manager: ConnectionManager<R>,
    host: String,
    port: u16,
}

#[async_trait]
impl<R: Repository<ConnectionDetails> + Send + Sync + 'static> Command for ConnectCommand<R> {
    async fn execute(self: Box<Self>) -> Result<Vec<Event>, ChatError> {
        match self.manager.connect(&self.host, self.port).await {
            Ok(()) => Ok(Vec::new()),
            Err(e) => Ok(vec![Event::ConnectionFailed { message: e.to_string() }]),
        }
    }
}

struct ChangeUserControllerCommand<R> {
    manager: ConnectionManager<R>,
    user: User,
}

#[async_trait]
impl<R: Repository<ConnectionDetails> + Send + Sync + 'static> Command for ChangeUserControllerCommand<R> {
    async fn execute(self: Box<Self>) -> Result<Vec<Event>, ChatError> {
        self.manager.change_user_controller(&self.user).await;
        Ok(Vec::new())
    }
}

struct RemoveUserControllerCommand<R> {
    manager: ConnectionManager<R>,
}

#[async_trait]
impl<R: Repository<ConnectionDetails> + Send + Sync + 'static> Command for RemoveUserControllerCommand<R> {
    async fn execute(self: Box<Self>) -> Result<Vec<Event>, ChatError> {
        self.manager.remove_user_controller().await;
        Ok(Vec::new())
    }
}

/// The pure event-to-command mapping table (spec §4.4). Kept as a free
/// function, not a method, so it can be exercised without a runtime.
pub fn map_event_to_commands<R>(manager: &ConnectionManager<R>, event: &Event) -> Vec<Box<dyn Command>>
where
    R: Repository<ConnectionDetails> + Send + Sync + 'static,
{
    match event {
        Event::Connect { host, port } => vec![Box::new(ConnectCommand {
            manager: manager.clone(),
            host: host.clone(),
            port: *port,
        })],
        Event::UserLoggedIn { user } => vec![Box::new(ChangeUserControllerCommand {
            manager: manager.clone(),
            user: user.clone(),
        })],
        Event::UserLoggedOut => vec![Box::new(RemoveUserControllerCommand { manager: manager.clone() })],
        _ => Vec::new(),
    }
}

#[async_trait]
impl<R: Repository<ConnectionDetails> + Send + Sync + 'static> Service for ConnectionManager<R> {
    async fn run(&self, cancellation: CancellationToken) -> Result<(), ChatError> {
        self.run_accept_loop(cancellation).await
    }

    fn map_event_to_commands(&self, event: &Event) -> Vec<Box<dyn Command>> {
        map_event_to_commands(self, event)
    }

    async fn close(&self) -> Result<(), ChatError> {
        self.remove_user_controller().await;
        Ok(())
    }
}
