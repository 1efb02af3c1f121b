//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: murmur — a peer-to-peer terminal chat system.
//

//! Unified error hierarchy for the murmur workspace.

use thiserror::Error;

/// Top-level unified error type for connection-lifecycle operations.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("wire error")]
    Wire(#[from] WireError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("storage error")]
    Storage(#[from] StorageError),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the framed/secure connection layer (spec §4.1, §7).
#[derive(Error, Debug)]
pub enum WireError {
    #[error("connection closed")]
    Closed,

    #[error("framing error: {0}")]
    Framing(String),

    #[error("cryptographic error: {0}")]
    Crypto(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// True for errors that represent an ordinary peer/local half-close rather
    /// than a genuine protocol or transport failure.
    pub fn is_closed(&self) -> bool {
        matches!(self, WireError::Closed)
    }
}

/// Errors from the `ConnectionDetails` store and repository layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("entity not found")]
    NotFound,

    #[error("unique constraint violated on {0}")]
    UniqueViolation(String),

    #[error("storage I/O error: {0}")]
    Io(String),

    #[error("storage busy, exhausted retries")]
    Busy,

    #[error("unknown repository field: {0}")]
    UnknownField(String),
}
