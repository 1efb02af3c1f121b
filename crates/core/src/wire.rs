//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: murmur — a peer-to-peer terminal chat system.
//
// wire.rs - length-prefixed, reliable, full-duplex Message transport over an
// arbitrary bidirectional byte stream (spec §4.1).

use crate::error::WireError;
use crate::message::Message;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Default maximum frame payload: 16 MiB, per spec §4.1/§6.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A `Message`-level connection: either a plaintext [`FramedConn`] or an
/// authenticated-encrypted [`crate::secure::SecureConn`].
#[async_trait]
pub trait MessageConn: Send {
    async fn read(&mut self) -> Result<Message, WireError>;
    async fn write(&mut self, msg: &Message) -> Result<(), WireError>;
    async fn close(&mut self) -> Result<(), WireError>;
}

/// Length-prefixed framing over any bidirectional byte stream.
///
/// The wire format is a `u64` little-endian length `L` followed by exactly
/// `L` payload bytes; this is `tokio_util`'s `LengthDelimitedCodec` configured
/// for an 8-byte little-endian length field, which gives us the spec's exact
/// framing for free.
pub struct FramedConn<S> {
    inner: Framed<S, LengthDelimitedCodec>,
}

impl<S> FramedConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: S, max_frame_len: usize) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .little_endian()
            .length_field_length(8)
            .max_frame_length(max_frame_len)
            .new_codec();
        Self {
            inner: Framed::new(io, codec),
        }
    }

    /// Read one frame's raw payload bytes.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>, WireError> {
        match self.inner.next().await {
            None => Err(WireError::Closed),
            Some(Ok(bytes)) => Ok(bytes.to_vec()),
            Some(Err(e)) => Err(classify_io_error(e)),
        }
    }

    /// Write one frame carrying `payload` verbatim.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), WireError> {
        self.inner
            .send(payload.to_vec().into())
            .await
            .map_err(classify_io_error)
    }

    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }
}

/// Classify a `tokio_util` codec I/O error per the `Closed`/`Framing`/`Io`
/// taxonomy (spec §4.1, §7): broken pipe, reset, and EOF-style errors are
/// ordinary connection closure, not a transport failure worth surfacing.
fn classify_io_error(e: std::io::Error) -> WireError {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof => {
            WireError::Closed
        }
        ErrorKind::InvalidData => WireError::Framing(e.to_string()),
        _ => WireError::Io(e),
    }
}

#[async_trait]
impl<S> MessageConn for FramedConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self) -> Result<Message, WireError> {
        let bytes = self.read_frame().await?;
        Message::decode(&bytes)
    }

    async fn write(&mut self, msg: &Message) -> Result<(), WireError> {
        self.write_frame(&msg.encode()).await
    }

    async fn close(&mut self) -> Result<(), WireError> {
        AsyncWriteExt::shutdown(self.inner.get_mut())
            .await
            .map_err(WireError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trips_a_message_over_an_in_memory_pipe() {
        let (a, b) = duplex(4096);
        let mut a = FramedConn::new(a, DEFAULT_MAX_FRAME_LEN);
        let mut b = FramedConn::new(b, DEFAULT_MAX_FRAME_LEN);

        let msg = Message::with_action("authenticate")
            .set("userId", "u-A")
            .with_body(b"payload".to_vec());
        a.write(&msg).await.unwrap();

        let got = b.read().await.unwrap();
        assert_eq!(got.action(), Some("authenticate"));
        assert_eq!(got.header("userId"), Some("u-A"));
        assert_eq!(got.body(), b"payload");
    }

    #[tokio::test]
    async fn read_after_close_reports_closed() {
        let (a, b) = duplex(4096);
        let mut a = FramedConn::new(a, DEFAULT_MAX_FRAME_LEN);
        let mut b = FramedConn::new(b, DEFAULT_MAX_FRAME_LEN);

        a.close().await.unwrap();
        let err = b.read().await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn oversize_frame_is_a_framing_error() {
        let (a, b) = duplex(8192);
        let mut a = FramedConn::new(a, 16);
        let mut b = FramedConn::new(b, 16);

        // Spawn the write so the bounded duplex pipe doesn't deadlock against
        // the codec's own buffering.
        let writer = tokio::spawn(async move {
            let _ = a.write_frame(&[0u8; 64]).await;
        });
        let result = b.read_frame().await;
        let _ = writer.await;
        assert!(result.is_err());
    }
}
