//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: murmur — a peer-to-peer terminal chat system.
//

//! Plaintext message encoding: a CRLF `key:value` header block terminated by
//! a blank line, followed immediately by an opaque body.
//!
//! This is the payload carried inside a single frame (see [`crate::wire`]).
//! Header keys used by the handshake: `action`, `user`, `userId`, `state`,
//! `passphrase`, `phrase`.

use crate::error::WireError;
use std::collections::HashMap;

/// A single protocol message: an unordered header map plus an opaque body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl Message {
    pub fn new(headers: HashMap<String, String>, body: Vec<u8>) -> Self {
        Self { headers, body }
    }

    /// Build a message with a single `action` header and no body.
    pub fn with_action(action: &str) -> Self {
        let mut headers = HashMap::new();
        headers.insert("action".to_string(), action.to_string());
        Self {
            headers,
            body: Vec::new(),
        }
    }

    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.insert(key.to_string(), value.into());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn action(&self) -> Option<&str> {
        self.header("action")
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Encode as `key:value\r\n` lines, a blank `\r\n`, then the raw body.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (key, value) in &self.headers {
            out.extend_from_slice(key.as_bytes());
            out.push(b':');
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    /// Decode a message previously produced by [`Message::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut headers = HashMap::new();
        let mut offset = 0;

        loop {
            let line_end = find_crlf(&bytes[offset..])
                .ok_or_else(|| WireError::Framing("unterminated header block".into()))?;
            let line = &bytes[offset..offset + line_end];
            offset += line_end + 2;

            if line.is_empty() {
                break;
            }

            let line = std::str::from_utf8(line)
                .map_err(|e| WireError::Framing(format!("non-utf8 header line: {e}")))?;
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| WireError::Framing(format!("malformed header line: {line}")))?;

            if headers.contains_key(key) {
                return Err(WireError::Framing(format!("duplicate header key: {key}")));
            }
            headers.insert(key.to_string(), value.to_string());
        }

        Ok(Self {
            headers,
            body: bytes[offset..].to_vec(),
        })
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
