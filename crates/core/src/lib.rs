//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: murmur — a peer-to-peer terminal chat system.
//

#![cfg_attr(docsrs, feature(doc_cfg))]

//! # murmur-core
//!
//! The secure-connection core of a peer-to-peer terminal chat system: a
//! framed wire protocol with an authenticated-encryption upgrade, a
//! mutual-authentication handshake that distinguishes first contact from a
//! known peer, per-user connection supervision, and the event-driven
//! service orchestration that binds them together.
//!
//! ## Architecture
//!
//! Data flows leaf to root:
//!
//! ```text
//! Transport (TCP)
//!   └─ FramedConn ── SecureConn (AEAD)
//!         └─ UserController (per user)  ── ConnectionDetailsStore ── KEK
//!               └─ ConnectionManager (process-wide)
//!                     └─ EventBus ── ServiceContainer ── App
//! ```
//!
//! - [`wire`] / [`secure`] — length-prefixed framing and its AEAD upgrade.
//! - [`message`] — the plaintext header/body encoding carried inside a frame.
//! - [`handshake`] — the five-phase mutual-authentication state machine.
//! - [`user_controller`] — per-logged-in-user connection supervisor.
//! - [`connection_manager`] — listening socket owner and command router.
//! - [`connection_details`] — the KEK-wrapped peer trust store.
//! - [`event_bus`] / [`service`] / [`app`] — the event/command orchestration
//!   skeleton the application main loop runs.
//! - [`entities`] / [`store`] — the narrow identity/chat persistence contract.
//! - [`config`] — immutable startup configuration from environment and flags.
//! - [`error`] — the unified error hierarchy.

pub mod app;
pub mod config;
pub mod connection_details;
pub mod connection_manager;
pub mod entities;
pub mod error;
pub mod event_bus;
pub mod events;
pub mod handshake;
pub mod message;
pub mod secure;
pub mod service;
pub mod store;
pub mod user_controller;
pub mod wire;

pub use app::{App, AppBuilder};
pub use config::{Config, ConfigOverrides, DEFAULT_PORT};
pub use connection_details::{ConnectionDetailsStore, Kek, UnwrappedConnectionDetails};
pub use connection_manager::ConnectionManager;
pub use entities::{hash_password, verify_password, ConnectionDetails, Entity, Repository, User};
pub use error::{ChatError, StorageError, WireError};
pub use event_bus::{Cancelled, EventBus, Listener};
pub use events::Event;
pub use handshake::{run_acceptor, run_initiator, HandshakeOutcome};
pub use message::Message;
pub use secure::{SecureConn, SessionKey};
pub use service::{Command, Service, ServiceContainer};
pub use store::{FileConnectionDetailsRepository, InMemoryConnectionDetailsRepository, InMemoryUserRepository};
pub use user_controller::UserController;
pub use wire::{FramedConn, MessageConn, DEFAULT_MAX_FRAME_LEN};
