//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: murmur — a peer-to-peer terminal chat system.
//

//! The closed event-variant set carried on the event bus (spec §9: "Model
//! events as a tagged sum; dispatch by exhaustive pattern match").

use crate::entities::User;
use crate::message::Message;
use std::sync::Arc;
use uuid::Uuid;

/// Domain events flowing through the [`crate::event_bus::EventBus`].
#[derive(Clone)]
pub enum Event {
    /// Shuts down the application main loop (spec §5, §8).
    Quit,

    /// A request to dial an outbound connection (spec §4.4).
    Connect { host: String, port: u16 },

    /// A local user has logged in; installs a `UserController` (spec §4.4, §4.7).
    UserLoggedIn { user: User },

    /// A local user has logged out; tears down the current `UserController`.
    UserLoggedOut,

    /// A local user account was created.
    UserCreated { user: User },

    /// A local user record was updated.
    UserUpdated { user: User },

    /// A freshly accepted/dialed connection has not yet completed its handshake.
    NewUnauthenticatedConnection { conn_id: Uuid },

    /// A connection completed its handshake and was upgraded to a `SecureConn`.
    ConnectionEstablished { conn_id: Uuid, peer_unique_id: String },

    /// A connection's driver task has exited and its record was removed.
    ConnectionClosed { conn_id: Uuid },

    /// Accepting an inbound socket failed.
    ConnectionAcceptError { message: String },

    /// A connection failed before or during its handshake.
    ConnectionFailed { message: String },

    /// A message was read off an established connection.
    NewMessage { conn_id: Uuid, message: Arc<Message> },

    /// A read on an established connection failed (non-fatal to the process).
    MessageReadError { conn_id: Uuid, message: String },
}
